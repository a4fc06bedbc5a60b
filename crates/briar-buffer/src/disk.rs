//! Disk manager for page-level file I/O.

use briar_common::page::{PageId, PAGE_SIZE};
use briar_common::{BriarError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Manages reading and writing pages to disk files.
///
/// Each file_id maps to a separate data file. File 0 is typically
/// the main heap file, while higher file IDs are used for indexes.
pub struct DiskManager {
    /// Storage configuration.
    config: StorageConfig,
    /// Open file handles keyed by file_id.
    files: Mutex<HashMap<u32, FileHandle>>,
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager.
    ///
    /// The configured page size must match the compiled-in `PAGE_SIZE`;
    /// data files written with a different page size are unreadable.
    pub fn new(config: StorageConfig) -> Result<Self> {
        if config.page_size != PAGE_SIZE {
            return Err(BriarError::InvalidParameter {
                name: "page_size".to_string(),
                value: config.page_size.to_string(),
            });
        }
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the file path for a given file ID.
    fn file_path(&self, file_id: u32) -> PathBuf {
        self.config.data_dir.join(format!("{:08}.dat", file_id))
    }

    /// Opens or creates a data file.
    fn open_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();

        if files.contains_key(&file_id) {
            return Ok(());
        }

        let path = self.file_path(file_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        files.insert(file_id, FileHandle { file, num_pages });

        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| BriarError::IoError(format!("file {} not open", page_id.file_id)))?;

        if page_id.page_num >= handle.num_pages {
            return Err(BriarError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| BriarError::IoError(format!("file {} not open", page_id.file_id)))?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        // Update page count if we extended the file
        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a new page in the specified file.
    ///
    /// Returns the PageId of the newly allocated page.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        self.open_file(file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&file_id)
            .ok_or_else(|| BriarError::IoError(format!("file {} not open", file_id)))?;

        let page_num = handle.num_pages;
        let page_id = PageId::new(file_id, page_num);

        // Write an empty page to extend the file
        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_id)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.open_file(file_id)?;

        let files = self.files.lock();
        let handle = files
            .get(&file_id)
            .ok_or_else(|| BriarError::IoError(format!("file {} not open", file_id)))?;

        Ok(handle.num_pages)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        let files = self.files.lock();
        for handle in files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, handle) in files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
            ..Default::default()
        };
        (DiskManager::new(config).unwrap(), dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (disk, dir) = create_test_disk();
        assert_eq!(disk.data_dir(), dir.path());
    }

    #[test]
    fn test_rejects_mismatched_page_size() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            page_size: 4096,
            ..Default::default()
        };
        assert!(matches!(
            DiskManager::new(config),
            Err(BriarError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_allocate_page() {
        let (disk, _dir) = create_test_disk();

        let p0 = disk.allocate_page(1).unwrap();
        let p1 = disk.allocate_page(1).unwrap();

        assert_eq!(p0, PageId::new(1, 0));
        assert_eq!(p1, PageId::new(1, 1));
        assert_eq!(disk.num_pages(1).unwrap(), 2);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (disk, _dir) = create_test_disk();

        let page_id = disk.allocate_page(0).unwrap();
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;

        disk.write_page(page_id, &data).unwrap();

        let read = disk.read_page(page_id).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_read_nonexistent_page() {
        let (disk, _dir) = create_test_disk();

        let result = disk.read_page(PageId::new(0, 42));
        assert!(matches!(result, Err(BriarError::PageNotFound { .. })));
    }

    #[test]
    fn test_allocated_page_is_zeroed() {
        let (disk, _dir) = create_test_disk();

        let page_id = disk.allocate_page(0).unwrap();
        let data = disk.read_page(page_id).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_separate_files() {
        let (disk, _dir) = create_test_disk();

        let a = disk.allocate_page(0).unwrap();
        let b = disk.allocate_page(7).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 1;
        disk.write_page(a, &data).unwrap();
        data[0] = 2;
        disk.write_page(b, &data).unwrap();

        assert_eq!(disk.read_page(a).unwrap()[0], 1);
        assert_eq!(disk.read_page(b).unwrap()[0], 2);
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
            ..Default::default()
        };

        let page_id = {
            let disk = DiskManager::new(config.clone()).unwrap();
            let page_id = disk.allocate_page(0).unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[100] = 0x55;
            disk.write_page(page_id, &data).unwrap();
            page_id
        };

        let disk = DiskManager::new(config).unwrap();
        let data = disk.read_page(page_id).unwrap();
        assert_eq!(data[100], 0x55);
        assert_eq!(disk.num_pages(0).unwrap(), 1);
    }
}
