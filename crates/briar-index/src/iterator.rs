//! Forward iterator over B+ tree leaves.

use crate::page::LeafView;
use crate::types::Storable;
use briar_buffer::BufferPoolManager;
use briar_common::page::PageId;
use briar_common::Result;
use std::marker::PhantomData;
use std::sync::Arc;

/// Cursor over the leaf chain: a `(page id, slot)` position.
///
/// The cursor pins a leaf only while reading an entry or advancing, so no
/// latch is held between steps. Iteration is not isolated from concurrent
/// writers; a scan racing a structural change sees some consistent recent
/// state of each leaf it visits, nothing more.
pub struct IndexIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    slot: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K: Storable, V: Storable> IndexIterator<K, V> {
    /// Creates a cursor positioned at `slot` of the given leaf.
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, slot: usize) -> Self {
        Self {
            bpm,
            page_id,
            slot,
            _marker: PhantomData,
        }
    }

    /// Creates the end-of-scan sentinel cursor.
    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, PageId::INVALID, 0)
    }

    /// Returns true if the cursor is past the last entry.
    pub fn is_end(&self) -> bool {
        !self.page_id.is_valid()
    }

    /// Reads the entry under the cursor.
    ///
    /// Must not be called on an end cursor.
    pub fn entry(&self) -> Result<(K, V)> {
        let guard = self.bpm.fetch_read(self.page_id)?;
        let leaf = LeafView::<K, V>::attach(guard.data())?;
        Ok((leaf.key_at(self.slot), leaf.value_at(self.slot)))
    }

    /// Advances the cursor by one entry, following the sibling pointer
    /// across leaf boundaries. Past the rightmost entry the cursor
    /// becomes the end sentinel.
    pub fn advance(&mut self) -> Result<()> {
        let guard = self.bpm.fetch_read(self.page_id)?;
        let leaf = LeafView::<K, V>::attach(guard.data())?;

        if self.slot + 1 < leaf.size() {
            self.slot += 1;
            return Ok(());
        }

        let next = leaf.next_page_id();
        drop(guard);

        self.page_id = next; // INVALID on the rightmost leaf = end
        self.slot = 0;
        Ok(())
    }
}

impl<K: Storable, V: Storable> Iterator for IndexIterator<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        match self.entry() {
            Ok(entry) => {
                if let Err(e) = self.advance() {
                    self.page_id = PageId::INVALID;
                    return Some(Err(e));
                }
                Some(Ok(entry))
            }
            Err(e) => {
                self.page_id = PageId::INVALID;
                Some(Err(e))
            }
        }
    }
}

impl<K, V> PartialEq for IndexIterator<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.slot == other.slot
    }
}

impl<K, V> std::fmt::Debug for IndexIterator<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexIterator")
            .field("page_id", &self.page_id)
            .field("slot", &self.slot)
            .finish()
    }
}
