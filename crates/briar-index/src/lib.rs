//! Disk-resident B+ tree index for BriarDB.
//!
//! This crate provides:
//! - A B+ tree mapping fixed-width unique keys to record IDs, with all
//!   node access going through buffer pool page guards
//! - Crab-latched insert and remove with split, merge, and redistribution
//! - Point lookups and forward range scans over the leaf sibling chain
//! - Typed, discriminator-checked views over header/leaf/internal pages

mod iterator;
mod page;
mod tree;
mod types;

pub use iterator::IndexIterator;
pub use page::{
    internal_page_capacity, leaf_page_capacity, HeaderView, HeaderViewMut, InternalView,
    InternalViewMut, LeafView, LeafViewMut,
};
pub use tree::BPlusTree;
pub use types::{DefaultComparator, KeyComparator, RecordId, Storable, Transaction};
