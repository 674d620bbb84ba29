//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! Lookups routed through the async reader run with the persisted-only read
//! tier and never consult the memtable; it is still searched by plain
//! synchronous reads and by lookups that allow every tier.

mod table;

pub use table::MemTable;

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}
