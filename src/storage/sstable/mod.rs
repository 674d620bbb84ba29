//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "RKV1" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][CRC: u32][Key][Value]      │
//! │   ... repeated for each entry ...                       │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [KeyLen: u32][Offset: u64][EntryLen: u32][Key]        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | DataCRC: u32 (4) | Padding (4) │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every entry is read with a single positional read of `EntryLen` bytes, which
//! is what lets a point lookup become exactly one ring submission.

mod builder;
mod reader;

use std::path::PathBuf;

pub use builder::SSTableBuilder;
pub use reader::{EntryHandle, SSTableReader};

use crate::error::{Result, RingKvError};

// =============================================================================
// Shared Constants (used by builder and reader)
// =============================================================================

/// Magic bytes identifying a ringkv SSTable file
pub(crate) const MAGIC: &[u8; 4] = b"RKV1";

/// Current SSTable format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: IndexOffset (8) + DataCRC (4) + Padding (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Entry header size: KeyLen (4) + ValLen (4) + CRC (4) = 12 bytes
pub(crate) const ENTRY_HEADER_SIZE: usize = 12;

/// Sentinel value indicating a tombstone (deleted key)
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Metadata returned when an SSTable is finished
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Path to the SSTable file
    pub path: PathBuf,
    /// Number of entries in this SSTable
    pub entry_count: u64,
    /// Smallest key (for range filtering)
    pub min_key: Vec<u8>,
    /// Largest key (for range filtering)
    pub max_key: Vec<u8>,
    /// File size in bytes
    pub file_size: u64,
}

impl SSTable {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Returns false if key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }
}

// =============================================================================
// Entry Codec
// =============================================================================

/// Checksum of one entry: covers both length fields, the key and the value
pub(crate) fn entry_crc(key_len: u32, val_len: u32, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&key_len.to_le_bytes());
    hasher.update(&val_len.to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

pub(crate) fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    buf.get(pos..pos + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| RingKvError::Corruption(format!("truncated u32 at {}", pos)))
}

pub(crate) fn read_u64(buf: &[u8], pos: usize) -> Result<u64> {
    buf.get(pos..pos + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| RingKvError::Corruption(format!("truncated u64 at {}", pos)))
}

/// Decode one data-block entry read in full from disk
///
/// Returns `Ok(Some(value))` for a live entry and `Ok(None)` for a tombstone.
pub(crate) fn decode_entry(
    expected_key: &[u8],
    buf: &[u8],
    verify_checksum: bool,
) -> Result<Option<Vec<u8>>> {
    let key_len = read_u32(buf, 0)?;
    let val_len = read_u32(buf, 4)?;
    let stored_crc = read_u32(buf, 8)?;

    let key_start = ENTRY_HEADER_SIZE;
    let key_end = key_start + key_len as usize;
    let key = buf
        .get(key_start..key_end)
        .ok_or_else(|| RingKvError::Corruption("entry shorter than its key".to_string()))?;

    if key != expected_key {
        return Err(RingKvError::Corruption(
            "index points at an entry for another key".to_string(),
        ));
    }

    let value = if val_len == TOMBSTONE_MARKER {
        &[][..]
    } else {
        buf.get(key_end..key_end + val_len as usize).ok_or_else(|| {
            RingKvError::Corruption("entry shorter than its value".to_string())
        })?
    };

    if verify_checksum && entry_crc(key_len, val_len, key, value) != stored_crc {
        return Err(RingKvError::Corruption(format!(
            "checksum mismatch for key {:?}",
            String::from_utf8_lossy(key)
        )));
    }

    if val_len == TOMBSTONE_MARKER {
        Ok(None)
    } else {
        Ok(Some(value.to_vec()))
    }
}
