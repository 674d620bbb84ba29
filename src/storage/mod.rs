//! Storage Module
//!
//! Persistent storage layer using an SSTable-like format.
//!
//! ## Responsibilities
//! - Persist data to disk in sorted format
//! - Point lookups, either blocking or routed through the ring
//! - Per-entry checksums so reads can verify what came off disk

mod sstable;
mod manager;

pub use sstable::{EntryHandle, SSTable, SSTableBuilder, SSTableReader};
pub use manager::StorageManager;
