//! Buffer pool management for BriarDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - Clock eviction policy for cache management
//! - Pin counting for concurrent access
//! - Per-page read/write latches exposed through RAII page guards
//! - Fault-in from disk on miss and write-back of dirty victims

mod disk;
mod frame;
mod pool;
mod replacer;

pub use disk::DiskManager;
pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPoolManager, BufferPoolStats, ReadPageGuard, WritePageGuard};
pub use replacer::ClockReplacer;
