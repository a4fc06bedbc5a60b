//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::replacer::ClockReplacer;
use briar_common::page::{PageId, PAGE_SIZE};
use briar_common::{BriarError, Result, StorageConfig};
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;

/// Pool bookkeeping guarded by a single metadata latch.
///
/// Pin counts only ever increase under this latch, so checking
/// `pin_count == 0` during eviction cannot race with a new fetch.
/// Unpinning (guard drop) is latch-free; a pin dropping to zero mid-check
/// just delays eviction to the next sweep.
struct PoolState {
    /// Page ID to frame ID mapping.
    page_table: HashMap<PageId, FrameId>,
    /// List of free frame IDs.
    free_list: Vec<FrameId>,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction
/// - Pin counting for concurrent access
/// - Fault-in from disk on miss, write-back of dirty victims
///
/// Pages are handed out exclusively through RAII guards which hold the
/// page's latch and pin for their lifetime.
pub struct BufferPoolManager {
    /// Number of frames in the pool.
    num_frames: usize,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Bookkeeping behind the metadata latch.
    state: Mutex<PoolState>,
    /// Page replacement policy.
    replacer: ClockReplacer,
    /// Backing storage.
    disk: Arc<DiskManager>,
    /// File that new pages are allocated in.
    file_id: u32,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over the given disk manager.
    ///
    /// Pages allocated through [`new_page_guarded`](Self::new_page_guarded)
    /// extend the file identified by `file_id`.
    pub fn new(num_frames: usize, disk: Arc<DiskManager>, file_id: u32) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            num_frames,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: ClockReplacer::new(num_frames),
            disk,
            file_id,
        }
    }

    /// Creates a buffer pool sized from the storage configuration.
    pub fn from_config(config: &StorageConfig, disk: Arc<DiskManager>, file_id: u32) -> Self {
        Self::new(config.buffer_pool_pages, disk, file_id)
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Queries the system for available memory and allocates 25% of it
    /// for the buffer pool. Minimum 1,000 frames to ensure useful caching
    /// even on low-memory systems.
    pub fn auto_sized(disk: Arc<DiskManager>, file_id: u32) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4; // 25% of available RAM
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(num_frames, disk, file_id)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Fetches a page with a shared latch.
    ///
    /// Faults the page in from disk if it is not resident. The page stays
    /// pinned and read-latched until the guard is dropped.
    pub fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        let frame = self.pin_frame(page_id)?;
        Ok(ReadPageGuard {
            frame,
            page_id,
            data: frame.read_data(),
        })
    }

    /// Fetches a page with an exclusive latch.
    ///
    /// Faults the page in from disk if it is not resident. The page stays
    /// pinned and write-latched until the guard is dropped, at which point
    /// it is marked dirty.
    pub fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        let frame = self.pin_frame(page_id)?;
        Ok(WritePageGuard {
            frame,
            page_id,
            data: frame.write_data(),
        })
    }

    /// Allocates a brand-new page and returns it write-latched and pinned.
    ///
    /// The new page is zero-filled; its ID is available via
    /// [`WritePageGuard::page_id`].
    pub fn new_page_guarded(&self) -> Result<WritePageGuard<'_>> {
        let page_id = self.disk.allocate_page(self.file_id)?;

        let mut state = self.state.lock();
        let frame = self.install_frame(&mut state, page_id, None)?;
        drop(state);

        Ok(WritePageGuard {
            frame,
            page_id,
            data: frame.write_data(),
        })
    }

    /// Deletes a page from the buffer pool.
    ///
    /// The caller must hold no guard on the page. The frame returns to the
    /// free list; the disk page number is not reused.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(frame_id) = state.page_table.remove(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];

            if frame.is_pinned() {
                state.page_table.insert(page_id, frame_id);
                return Err(BriarError::PagePinned {
                    page_id: page_id.as_u64(),
                });
            }

            self.replacer.remove(frame_id);
            frame.reset();
            state.free_list.push(frame_id);
        }

        Ok(())
    }

    /// Writes all dirty pages back to disk.
    ///
    /// The mapping is snapshotted first so page latches are never taken
    /// while the metadata latch is held. Returns the number of pages
    /// flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let entries: Vec<(PageId, FrameId)> = {
            let state = self.state.lock();
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect()
        };

        let mut flushed = 0;
        for (page_id, frame_id) in entries {
            let frame = &self.frames[frame_id.0 as usize];
            // Skip frames remapped since the snapshot
            if frame.page_id() != Some(page_id) || !frame.is_dirty() {
                continue;
            }
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
            drop(data);
            frame.set_dirty(false);
            flushed += 1;
        }

        self.disk.flush()?;
        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        for &frame_id in state.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.num_frames,
            free_frames: state.free_list.len(),
            used_frames: state.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }

    /// Looks up (or faults in) a page and pins its frame.
    ///
    /// The metadata latch is released before the caller acquires the page
    /// latch, so a blocked latch acquisition never stalls the whole pool.
    fn pin_frame(&self, page_id: PageId) -> Result<&BufferFrame> {
        if !page_id.is_valid() {
            return Err(BriarError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok(frame);
        }

        // Miss: read from disk while holding the metadata latch so the
        // read cannot interleave with an eviction write-back of the same
        // page. The frame becomes visible in the page table only after
        // its contents are loaded.
        let data = self.disk.read_page(page_id)?;
        self.install_frame(&mut state, page_id, Some(&data))
    }

    /// Claims a frame (free list first, then eviction), loads it, pins it,
    /// and publishes it in the page table.
    fn install_frame(
        &self,
        state: &mut PoolState,
        page_id: PageId,
        data: Option<&[u8; PAGE_SIZE]>,
    ) -> Result<&BufferFrame> {
        let frame_id = match state.free_list.pop() {
            Some(frame_id) => frame_id,
            None => {
                let victim = self
                    .replacer
                    .evict(|fid| self.frames[fid.0 as usize].pin_count() == 0)
                    .ok_or(BriarError::BufferPoolFull)?;

                let frame = &self.frames[victim.0 as usize];

                // Write back a dirty victim before unmapping it, so a
                // failure leaves the pool consistent.
                if frame.is_dirty() {
                    if let Some(old_page_id) = frame.page_id() {
                        let old_data = frame.read_data();
                        self.disk.write_page(old_page_id, &old_data)?;
                    }
                }

                if let Some(old_page_id) = frame.page_id() {
                    state.page_table.remove(&old_page_id);
                }

                victim
            }
        };

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        if let Some(src) = data {
            frame.copy_from(src);
        }
        frame.pin();
        self.replacer.record_access(frame_id);

        state.page_table.insert(page_id, frame_id);

        Ok(frame)
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII guard holding a shared latch and pin on one page.
pub struct ReadPageGuard<'a> {
    frame: &'a BufferFrame,
    page_id: PageId,
    data: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl ReadPageGuard<'_> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // The pin drops a moment before the latch (released when the field
        // drops). An evictor observing the zero pin count still serializes
        // behind the latch, which it must take to repurpose the frame.
        self.frame.unpin();
    }
}

/// RAII guard holding an exclusive latch and pin on one page.
///
/// The page is marked dirty when the guard drops.
pub struct WritePageGuard<'a> {
    frame: &'a BufferFrame,
    page_id: PageId,
    data: RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl WritePageGuard<'_> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns mutable access to the page data.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.frame.set_dirty(true);
        self.frame.unpin();
    }
}
