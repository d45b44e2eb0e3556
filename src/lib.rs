//! Karst - the core of a disk-backed storage engine
//!
//! Two tightly coupled subsystems make up the crate: a fixed-capacity
//! buffer pool that mediates all access to pages on secondary storage, and
//! a clustered B+ tree index built on top of that pool. Every key lookup,
//! range scan, insert, and delete traverses both.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): the device boundary
//!   - `DiskManager`: reads/writes fixed-size pages and allocates page IDs
//!   - `DiskScheduler`: background-thread disk I/O queue
//!   - `HeaderPage`: page 0, maps index names to root page IDs
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: pins pages into frames, evicts with LRU-K
//!   - `LruKReplacer`: backward-k-distance replacement policy
//!   - `PageTable`: page ID to frame ID mapping
//!   - `FrameHeader`: per-frame metadata, pin count, and page latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin-and-latch handles
//!
//! - **Index** (`index`): ordered key to record mapping
//!   - `BPlusTree`: point lookup, range scan, insert, remove with
//!     latch crabbing
//!   - `BTreeIterator`: forward iteration over the leaf list
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use karst::buffer::BufferPoolManager;
//! use karst::index::{BPlusTree, DefaultKeyComparator, Transaction};
//! use karst::storage::disk::DiskManager;
//! use karst::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm.clone(), DefaultKeyComparator, 64, 64);
//! let mut txn = Transaction::new();
//!
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0)), &mut txn).unwrap();
//! assert!(tree.get_value(42).unwrap().is_some());
//!
//! bpm.flush_all_pages().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, KarstError, PageId, RecordId, Result, SlotId};
