//! Disk-resident B+ tree.
//!
//! The tree maps fixed-width unique keys to fixed-width record IDs. All
//! page access goes through buffer pool guards; the tree itself owns no
//! page memory. A header page holds the current root page ID, so readers
//! always resolve the root through one stable handle.
//!
//! Write operations descend with pessimistic crab-latching: the header and
//! every ancestor that might be restructured stay write-latched until a
//! child that cannot split (insert) or underflow (remove) is reached, at
//! which point the chain above it is released. Read operations descend
//! holding at most two read latches, releasing the parent once the child
//! is latched; against crab-latched writers this keeps point lookups
//! per-key linearizable.

use crate::iterator::IndexIterator;
use crate::page::{
    internal_page_capacity, leaf_page_capacity, HeaderView, HeaderViewMut, InternalView,
    InternalViewMut, LeafView, LeafViewMut,
};
use crate::types::{DefaultComparator, KeyComparator, Storable, Transaction};
use briar_buffer::{BufferPoolManager, WritePageGuard};
use briar_common::page::{PageHeader, PageId, PageType};
use briar_common::{BriarError, Result};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

fn corrupt(page_id: PageId, reason: &str) -> BriarError {
    BriarError::PageCorrupted {
        page_id: page_id.as_u64(),
        reason: reason.to_string(),
    }
}

/// A B+ tree index over the buffer pool.
///
/// Keys are unique; inserting a duplicate fails without mutation. Values
/// are opaque fixed-width record identifiers.
pub struct BPlusTree<K, V, C = DefaultComparator> {
    /// Index name (diagnostics only).
    name: String,
    /// Page holding the root indirection; allocated by the caller.
    header_page_id: PageId,
    /// Buffer pool all page access goes through.
    bpm: Arc<BufferPoolManager>,
    /// Key ordering.
    comparator: C,
    /// Leaf page capacity.
    leaf_max_size: u16,
    /// Internal page capacity.
    internal_max_size: u16,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    /// Creates a B+ tree over a caller-allocated header page.
    ///
    /// The header page is formatted to hold the empty-tree sentinel, so
    /// constructing a tree over a used header discards the old tree.
    pub fn new(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        if !(2..=leaf_page_capacity::<K, V>() as u16).contains(&leaf_max_size) {
            return Err(BriarError::InvalidParameter {
                name: "leaf_max_size".to_string(),
                value: leaf_max_size.to_string(),
            });
        }
        if !(3..=internal_page_capacity::<K>() as u16).contains(&internal_max_size) {
            return Err(BriarError::InvalidParameter {
                name: "internal_max_size".to_string(),
                value: internal_max_size.to_string(),
            });
        }

        let mut guard = bpm.fetch_write(header_page_id)?;
        HeaderViewMut::init(guard.data_mut(), header_page_id);
        drop(guard);

        Ok(Self {
            name: name.into(),
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.root_page_id()?.is_valid())
    }

    /// Returns the current root page ID (`PageId::INVALID` when empty).
    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.bpm.fetch_read(self.header_page_id)?;
        Ok(HeaderView::attach(guard.data())?.root_page_id())
    }

    /// Point lookup: appends the value stored under `key` to `result`.
    ///
    /// Returns true if the key exists.
    pub fn get_value(&self, key: &K, result: &mut Vec<V>) -> Result<bool> {
        let guard = self.bpm.fetch_read(self.header_page_id)?;
        let root_id = HeaderView::attach(guard.data())?.root_page_id();
        drop(guard);

        if !root_id.is_valid() {
            return Ok(false);
        }

        let mut guard = self.bpm.fetch_read(root_id)?;
        loop {
            match PageHeader::page_type_of(guard.data()) {
                Some(PageType::BTreeLeaf) => break,
                Some(PageType::BTreeInternal) => {
                    let child_id = {
                        let node = InternalView::<K>::attach(guard.data())?;
                        node.child_at(node.child_slot(&self.comparator, key))
                    };
                    // The parent latch is released only after the child is
                    // acquired, so a writer restructuring the child cannot
                    // slip between the two.
                    guard = self.bpm.fetch_read(child_id)?;
                }
                _ => return Err(corrupt(guard.page_id(), "expected index page")),
            }
        }

        let leaf = LeafView::<K, V>::attach(guard.data())?;
        match leaf.search(&self.comparator, key) {
            Some(slot) if self.comparator.compare(&leaf.key_at(slot), key) == Ordering::Equal => {
                result.push(leaf.value_at(slot));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Inserts a key/value pair.
    ///
    /// Returns false (without mutating) if the key already exists.
    pub fn insert(&self, key: &K, value: &V, _txn: &Transaction) -> Result<bool> {
        let mut header_guard = self.bpm.fetch_write(self.header_page_id)?;
        let mut root_id = HeaderView::attach(header_guard.data())?.root_page_id();

        if !root_id.is_valid() {
            // Empty tree: start a new root leaf.
            let mut root_guard = self.bpm.new_page_guarded()?;
            root_id = root_guard.page_id();
            LeafViewMut::<K, V>::init(root_guard.data_mut(), root_id, self.leaf_max_size);
            HeaderViewMut::attach(header_guard.data_mut())?.set_root_page_id(root_id);
        }

        // Crab-latched descent. `header` and `path` hold every ancestor
        // that may be restructured if the leaf splits all the way up.
        let mut header = Some(header_guard);
        let mut path: Vec<WritePageGuard<'_>> = Vec::new();
        let mut guard = self.bpm.fetch_write(root_id)?;

        loop {
            match PageHeader::page_type_of(guard.data()) {
                Some(PageType::BTreeLeaf) => {
                    if LeafView::<K, V>::attach(guard.data())?.size()
                        < self.leaf_max_size as usize
                    {
                        header = None;
                        path.clear();
                    }
                    break;
                }
                Some(PageType::BTreeInternal) => {
                    let (safe, child_id) = {
                        let node = InternalView::<K>::attach(guard.data())?;
                        let slot = node.child_slot(&self.comparator, key);
                        (
                            node.size() < self.internal_max_size as usize,
                            node.child_at(slot),
                        )
                    };
                    if safe {
                        header = None;
                        path.clear();
                    }
                    path.push(guard);
                    guard = self.bpm.fetch_write(child_id)?;
                }
                _ => return Err(corrupt(guard.page_id(), "expected index page")),
            }
        }

        {
            let mut leaf = LeafViewMut::<K, V>::attach(guard.data_mut())?;
            let found = leaf.as_view().search(&self.comparator, key);
            if let Some(slot) = found {
                if self.comparator.compare(&leaf.key_at(slot), key) == Ordering::Equal {
                    return Ok(false);
                }
            }
            let pos = found.map_or(0, |slot| slot + 1);
            leaf.insert_at(pos, key, value);
            if leaf.size() <= self.leaf_max_size as usize {
                return Ok(true);
            }
        }

        // Leaf overflow: split, then push the promoted separator upward.
        let mut new_guard = self.bpm.new_page_guarded()?;
        let new_page_id = new_guard.page_id();
        let (mut promoted_key, mut left_first_key) = {
            let mut leaf = LeafViewMut::<K, V>::attach(guard.data_mut())?;
            let mut new_leaf =
                LeafViewMut::<K, V>::init(new_guard.data_mut(), new_page_id, self.leaf_max_size);
            let size = leaf.size();
            let half = size / 2;
            new_leaf.put_entries_raw(0, leaf.as_view().entries_raw(half, size));
            new_leaf.set_size(size - half);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_size(half);
            leaf.set_next_page_id(new_page_id);
            (new_leaf.key_at(0), leaf.key_at(0))
        };
        let mut promoted_child = new_page_id;
        let mut left_id = guard.page_id();
        drop(new_guard);
        drop(guard);

        loop {
            let Some(mut parent_guard) = path.pop() else {
                // The root itself split: grow the tree by one level.
                let mut header_guard = header.take().ok_or_else(|| {
                    BriarError::Internal("root split reached without header latch".to_string())
                })?;
                let mut root_guard = self.bpm.new_page_guarded()?;
                let new_root_id = root_guard.page_id();
                {
                    let mut root = InternalViewMut::<K>::init(
                        root_guard.data_mut(),
                        new_root_id,
                        self.internal_max_size,
                    );
                    root.set_size(2);
                    // Slot 0's key is unused for routing; the old root's
                    // first key is a harmless convention.
                    root.set_key_at(0, &left_first_key);
                    root.set_child_at(0, left_id);
                    root.set_key_at(1, &promoted_key);
                    root.set_child_at(1, promoted_child);
                }
                HeaderViewMut::attach(header_guard.data_mut())?.set_root_page_id(new_root_id);
                return Ok(true);
            };

            let fits = {
                let mut node = InternalViewMut::<K>::attach(parent_guard.data_mut())?;
                let pos = node.as_view().upper_slot(&self.comparator, &promoted_key);
                node.insert_at(pos, &promoted_key, promoted_child);
                node.size() <= self.internal_max_size as usize
            };
            if fits {
                return Ok(true);
            }

            let mut new_guard = self.bpm.new_page_guarded()?;
            let new_id = new_guard.page_id();
            {
                let mut node = InternalViewMut::<K>::attach(parent_guard.data_mut())?;
                let mut new_node = InternalViewMut::<K>::init(
                    new_guard.data_mut(),
                    new_id,
                    self.internal_max_size,
                );
                let size = node.size();
                let half = size / 2;
                new_node.put_entries_raw(0, node.as_view().entries_raw(half, size));
                new_node.set_size(size - half);
                node.set_size(half);
                promoted_key = new_node.key_at(0);
                left_first_key = node.key_at(0);
            }
            promoted_child = new_id;
            left_id = parent_guard.page_id();
        }
    }

    /// Removes a key. Removing an absent key is a silent no-op.
    pub fn remove(&self, key: &K, _txn: &Transaction) -> Result<()> {
        let header_guard = self.bpm.fetch_write(self.header_page_id)?;
        let root_id = HeaderView::attach(header_guard.data())?.root_page_id();
        if !root_id.is_valid() {
            return Ok(());
        }

        let min_leaf = (self.leaf_max_size as usize + 1) / 2;
        let min_internal = (self.internal_max_size as usize + 1) / 2;

        // Crab-latched descent recording the child slot taken at each
        // level; ancestors are released once a node cannot underflow.
        let mut header = Some(header_guard);
        let mut path: Vec<(WritePageGuard<'_>, usize)> = Vec::new();
        let mut guard = self.bpm.fetch_write(root_id)?;

        loop {
            let is_root = path.is_empty();
            match PageHeader::page_type_of(guard.data()) {
                Some(PageType::BTreeLeaf) => {
                    let size = LeafView::<K, V>::attach(guard.data())?.size();
                    let safe = if is_root { size > 1 } else { size > min_leaf };
                    if safe {
                        header = None;
                        path.clear();
                    }
                    break;
                }
                Some(PageType::BTreeInternal) => {
                    let (size, slot, child_id) = {
                        let node = InternalView::<K>::attach(guard.data())?;
                        let slot = node.child_slot(&self.comparator, key);
                        (node.size(), slot, node.child_at(slot))
                    };
                    let safe = if is_root { size > 2 } else { size > min_internal };
                    if safe {
                        header = None;
                        path.clear();
                    }
                    path.push((guard, slot));
                    guard = self.bpm.fetch_write(child_id)?;
                }
                _ => return Err(corrupt(guard.page_id(), "expected index page")),
            }
        }

        {
            let found = {
                let leaf = LeafView::<K, V>::attach(guard.data())?;
                match leaf.search(&self.comparator, key) {
                    Some(slot)
                        if self.comparator.compare(&leaf.key_at(slot), key)
                            == Ordering::Equal =>
                    {
                        Some(slot)
                    }
                    _ => None,
                }
            };
            let Some(slot) = found else {
                return Ok(());
            };
            LeafViewMut::<K, V>::attach(guard.data_mut())?.remove_at(slot);
        }

        if path.is_empty() {
            // Root is a leaf; it may legally go below min_size, and an
            // empty root collapses the tree to nothing.
            if LeafView::<K, V>::attach(guard.data())?.size() == 0 {
                let mut header_guard = header.take().ok_or_else(|| {
                    BriarError::Internal("root collapse reached without header latch".to_string())
                })?;
                HeaderViewMut::attach(header_guard.data_mut())?
                    .set_root_page_id(PageId::INVALID);
                let old_root = guard.page_id();
                drop(guard);
                self.discard_page(old_root)?;
            }
            return Ok(());
        }

        if LeafView::<K, V>::attach(guard.data())?.size() >= min_leaf {
            return Ok(());
        }

        // Leaf underflow: repair against a sibling, then climb while the
        // parents keep losing entries to merges.
        let (mut parent_guard, pos) = match path.pop() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        if !self.repair_leaf_underflow(&mut parent_guard, pos, guard)? {
            return Ok(());
        }

        let mut guard = parent_guard;
        loop {
            if path.is_empty() {
                // `guard` is the root (or a node whose ancestors were
                // provably uninvolved, in which case it cannot be down to
                // one entry). A root internal page with a single child
                // collapses by promoting that child.
                let (size, only_child) = {
                    let node = InternalView::<K>::attach(guard.data())?;
                    (node.size(), node.child_at(0))
                };
                if size == 1 {
                    let mut header_guard = header.take().ok_or_else(|| {
                        BriarError::Internal(
                            "root collapse reached without header latch".to_string(),
                        )
                    })?;
                    HeaderViewMut::attach(header_guard.data_mut())?.set_root_page_id(only_child);
                    let old_root = guard.page_id();
                    drop(guard);
                    self.discard_page(old_root)?;
                }
                return Ok(());
            }

            if InternalView::<K>::attach(guard.data())?.size() >= min_internal {
                return Ok(());
            }

            let (mut parent_guard, pos) = match path.pop() {
                Some(entry) => entry,
                None => return Ok(()),
            };
            if !self.repair_internal_underflow(&mut parent_guard, pos, guard)? {
                return Ok(());
            }
            guard = parent_guard;
        }
    }

    /// Returns a cursor at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<K, V>> {
        let guard = self.bpm.fetch_read(self.header_page_id)?;
        let root_id = HeaderView::attach(guard.data())?.root_page_id();
        drop(guard);

        if !root_id.is_valid() {
            return Ok(self.end());
        }

        let mut guard = self.bpm.fetch_read(root_id)?;
        loop {
            match PageHeader::page_type_of(guard.data()) {
                Some(PageType::BTreeLeaf) => break,
                Some(PageType::BTreeInternal) => {
                    let child_id = InternalView::<K>::attach(guard.data())?.child_at(0);
                    guard = self.bpm.fetch_read(child_id)?;
                }
                _ => return Err(corrupt(guard.page_id(), "expected index page")),
            }
        }

        if LeafView::<K, V>::attach(guard.data())?.size() == 0 {
            return Ok(self.end());
        }
        Ok(IndexIterator::new(Arc::clone(&self.bpm), guard.page_id(), 0))
    }

    /// Returns a cursor positioned by `key`: at the largest key not
    /// greater than `key`, or `end()` if every key in the target leaf is
    /// greater.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K, V>> {
        let guard = self.bpm.fetch_read(self.header_page_id)?;
        let root_id = HeaderView::attach(guard.data())?.root_page_id();
        drop(guard);

        if !root_id.is_valid() {
            return Ok(self.end());
        }

        let mut guard = self.bpm.fetch_read(root_id)?;
        loop {
            match PageHeader::page_type_of(guard.data()) {
                Some(PageType::BTreeLeaf) => break,
                Some(PageType::BTreeInternal) => {
                    let child_id = {
                        let node = InternalView::<K>::attach(guard.data())?;
                        node.child_at(node.child_slot(&self.comparator, key))
                    };
                    guard = self.bpm.fetch_read(child_id)?;
                }
                _ => return Err(corrupt(guard.page_id(), "expected index page")),
            }
        }

        let slot = LeafView::<K, V>::attach(guard.data())?.search(&self.comparator, key);
        match slot {
            Some(slot) => Ok(IndexIterator::new(
                Arc::clone(&self.bpm),
                guard.page_id(),
                slot,
            )),
            None => Ok(self.end()),
        }
    }

    /// Returns the end-of-scan sentinel cursor.
    pub fn end(&self) -> IndexIterator<K, V> {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    /// Repairs an underflowing leaf against a sibling.
    ///
    /// Returns true if the siblings merged (the parent lost an entry and
    /// may now underflow itself), false if a redistribution finished the
    /// repair locally.
    fn repair_leaf_underflow(
        &self,
        parent_guard: &mut WritePageGuard<'_>,
        pos: usize,
        mut cur_guard: WritePageGuard<'_>,
    ) -> Result<bool> {
        if pos != 0 {
            let sib_id = InternalView::<K>::attach(parent_guard.data())?.child_at(pos - 1);
            let mut sib_guard = self.bpm.fetch_write(sib_id)?;

            let (cur_size, sib_size) = {
                let cur = LeafView::<K, V>::attach(cur_guard.data())?;
                let sib = LeafView::<K, V>::attach(sib_guard.data())?;
                (cur.size(), sib.size())
            };
            let total = cur_size + sib_size;

            if total <= self.leaf_max_size as usize {
                // Merge current into the left sibling and splice the chain.
                {
                    let cur = LeafView::<K, V>::attach(cur_guard.data())?;
                    let mut sib = LeafViewMut::<K, V>::attach(sib_guard.data_mut())?;
                    sib.put_entries_raw(sib_size, cur.entries_raw(0, cur_size));
                    sib.set_size(total);
                    sib.set_next_page_id(cur.next_page_id());
                }
                let cur_id = cur_guard.page_id();
                drop(cur_guard);
                self.discard_page(cur_id)?;
                InternalViewMut::<K>::attach(parent_guard.data_mut())?.remove_at(pos);
                return Ok(true);
            }

            // Redistribute: take the left sibling's tail.
            let keep = total / 2;
            let moved = sib_size - keep;
            {
                let sib = LeafView::<K, V>::attach(sib_guard.data())?;
                let mut cur = LeafViewMut::<K, V>::attach(cur_guard.data_mut())?;
                cur.shift_entries_right(0, moved);
                cur.put_entries_raw(0, sib.entries_raw(keep, sib_size));
                cur.set_size(cur_size + moved);
            }
            LeafViewMut::<K, V>::attach(sib_guard.data_mut())?.set_size(keep);
            let new_first = LeafView::<K, V>::attach(cur_guard.data())?.key_at(0);
            InternalViewMut::<K>::attach(parent_guard.data_mut())?.set_key_at(pos, &new_first);
            Ok(false)
        } else {
            // Leftmost child: the partner is the right sibling.
            let sib_id = InternalView::<K>::attach(parent_guard.data())?.child_at(1);
            let mut sib_guard = self.bpm.fetch_write(sib_id)?;

            let (cur_size, sib_size) = {
                let cur = LeafView::<K, V>::attach(cur_guard.data())?;
                let sib = LeafView::<K, V>::attach(sib_guard.data())?;
                (cur.size(), sib.size())
            };
            let total = cur_size + sib_size;

            if total <= self.leaf_max_size as usize {
                // Merge the right sibling into current.
                {
                    let sib = LeafView::<K, V>::attach(sib_guard.data())?;
                    let mut cur = LeafViewMut::<K, V>::attach(cur_guard.data_mut())?;
                    cur.put_entries_raw(cur_size, sib.entries_raw(0, sib_size));
                    cur.set_size(total);
                    cur.set_next_page_id(sib.next_page_id());
                }
                let sib_page_id = sib_guard.page_id();
                drop(sib_guard);
                self.discard_page(sib_page_id)?;
                InternalViewMut::<K>::attach(parent_guard.data_mut())?.remove_at(1);
                return Ok(true);
            }

            // Redistribute: take the right sibling's head.
            let keep = total / 2;
            let moved = keep - cur_size;
            {
                let sib = LeafView::<K, V>::attach(sib_guard.data())?;
                let mut cur = LeafViewMut::<K, V>::attach(cur_guard.data_mut())?;
                cur.put_entries_raw(cur_size, sib.entries_raw(0, moved));
                cur.set_size(keep);
            }
            {
                let mut sib = LeafViewMut::<K, V>::attach(sib_guard.data_mut())?;
                sib.shift_entries_left(moved, moved);
                sib.set_size(sib_size - moved);
            }
            let new_first = LeafView::<K, V>::attach(sib_guard.data())?.key_at(0);
            InternalViewMut::<K>::attach(parent_guard.data_mut())?.set_key_at(1, &new_first);
            Ok(false)
        }
    }

    /// Repairs an underflowing internal page against a sibling.
    ///
    /// Merges pull the parent separator down into the slot 0 key position
    /// of the absorbed run; redistributions rotate entries through the
    /// parent. All writes use destination offsets computed from the
    /// pre-merge sizes. Returns true if the siblings merged.
    fn repair_internal_underflow(
        &self,
        parent_guard: &mut WritePageGuard<'_>,
        pos: usize,
        mut cur_guard: WritePageGuard<'_>,
    ) -> Result<bool> {
        if pos != 0 {
            let (sib_id, sep) = {
                let parent = InternalView::<K>::attach(parent_guard.data())?;
                (parent.child_at(pos - 1), parent.key_at(pos))
            };
            let mut sib_guard = self.bpm.fetch_write(sib_id)?;

            let (cur_size, sib_size) = {
                let cur = InternalView::<K>::attach(cur_guard.data())?;
                let sib = InternalView::<K>::attach(sib_guard.data())?;
                (cur.size(), sib.size())
            };
            let total = cur_size + sib_size;

            if total <= self.internal_max_size as usize {
                // Merge current into the left sibling under the separator.
                {
                    let cur = InternalView::<K>::attach(cur_guard.data())?;
                    let mut sib = InternalViewMut::<K>::attach(sib_guard.data_mut())?;
                    sib.put_entries_raw(sib_size, cur.entries_raw(0, cur_size));
                    sib.set_key_at(sib_size, &sep);
                    sib.set_size(total);
                }
                let cur_id = cur_guard.page_id();
                drop(cur_guard);
                self.discard_page(cur_id)?;
                InternalViewMut::<K>::attach(parent_guard.data_mut())?.remove_at(pos);
                return Ok(true);
            }

            // Redistribute: rotate the left sibling's tail through the
            // parent. The key at the new boundary moves up; the old
            // separator moves down in front of current's first child.
            let keep = total / 2;
            let moved = sib_size - keep;
            let new_sep = InternalView::<K>::attach(sib_guard.data())?.key_at(keep);
            {
                let sib = InternalView::<K>::attach(sib_guard.data())?;
                let mut cur = InternalViewMut::<K>::attach(cur_guard.data_mut())?;
                cur.shift_entries_right(0, moved);
                cur.set_key_at(moved, &sep);
                cur.put_entries_raw(0, sib.entries_raw(keep, sib_size));
                cur.set_size(cur_size + moved);
            }
            InternalViewMut::<K>::attach(sib_guard.data_mut())?.set_size(keep);
            InternalViewMut::<K>::attach(parent_guard.data_mut())?.set_key_at(pos, &new_sep);
            Ok(false)
        } else {
            let (sib_id, sep) = {
                let parent = InternalView::<K>::attach(parent_guard.data())?;
                (parent.child_at(1), parent.key_at(1))
            };
            let mut sib_guard = self.bpm.fetch_write(sib_id)?;

            let (cur_size, sib_size) = {
                let cur = InternalView::<K>::attach(cur_guard.data())?;
                let sib = InternalView::<K>::attach(sib_guard.data())?;
                (cur.size(), sib.size())
            };
            let total = cur_size + sib_size;

            if total <= self.internal_max_size as usize {
                // Merge the right sibling into current under the separator.
                {
                    let sib = InternalView::<K>::attach(sib_guard.data())?;
                    let mut cur = InternalViewMut::<K>::attach(cur_guard.data_mut())?;
                    cur.put_entries_raw(cur_size, sib.entries_raw(0, sib_size));
                    cur.set_key_at(cur_size, &sep);
                    cur.set_size(total);
                }
                let sib_page_id = sib_guard.page_id();
                drop(sib_guard);
                self.discard_page(sib_page_id)?;
                InternalViewMut::<K>::attach(parent_guard.data_mut())?.remove_at(1);
                return Ok(true);
            }

            // Redistribute: rotate the right sibling's head through the
            // parent.
            let keep = total / 2;
            let moved = keep - cur_size;
            let new_sep = InternalView::<K>::attach(sib_guard.data())?.key_at(moved);
            {
                let sib = InternalView::<K>::attach(sib_guard.data())?;
                let mut cur = InternalViewMut::<K>::attach(cur_guard.data_mut())?;
                cur.put_entries_raw(cur_size, sib.entries_raw(0, moved));
                cur.set_key_at(cur_size, &sep);
                cur.set_size(keep);
            }
            {
                let mut sib = InternalViewMut::<K>::attach(sib_guard.data_mut())?;
                sib.shift_entries_left(moved, moved);
                sib.set_size(sib_size - moved);
            }
            InternalViewMut::<K>::attach(parent_guard.data_mut())?.set_key_at(1, &new_sep);
            Ok(false)
        }
    }

    /// Frees a page, tolerating a transient pin from a concurrent
    /// iterator cursor. A still-pinned page merely stays resident until
    /// evicted; it is already unreachable from the tree.
    fn discard_page(&self, page_id: PageId) -> Result<()> {
        match self.bpm.delete_page(page_id) {
            Ok(()) => Ok(()),
            Err(BriarError::PagePinned { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
