//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups via an in-memory index.
//! Entries are read positionally, so a reader can be shared behind an `Arc`
//! and serve any number of concurrent lookups with `&self`.

use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{Result, RingKvError};
use crate::uring::SubmitQueue;

use super::{decode_entry, read_u32, read_u64, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Location of one entry in the data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    pub offset: u64,
    pub len: u32,
}

/// Reader for SSTable files with in-memory index
pub struct SSTableReader {
    path: PathBuf,
    file: File,
    /// In-memory index: key → entry location
    index: BTreeMap<Vec<u8>, EntryHandle>,
    entry_count: u64,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Loads the entire index into memory for fast lookups.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(RingKvError::Storage(format!(
                "SSTable too small: {} bytes",
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact_at(&mut header, 0)?;

        if &header[0..4] != MAGIC {
            return Err(RingKvError::Storage(format!(
                "Invalid SSTable magic: expected RKV1, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(RingKvError::Storage(format!(
                "Unsupported SSTable version: {}",
                version
            )));
        }

        let entry_count = read_u64(&header, 6)?;

        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact_at(&mut footer, file_size - FOOTER_SIZE)?;
        let index_offset = read_u64(&footer, 0)?;

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(RingKvError::Corruption(format!(
                "index offset {} out of bounds",
                index_offset
            )));
        }

        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact_at(&mut index_data, index_offset)?;

        // [key_len(4)][offset(8)][entry_len(4)][key]
        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos < index_data.len() {
            let key_len = read_u32(&index_data, pos)? as usize;
            let offset = read_u64(&index_data, pos + 4)?;
            let len = read_u32(&index_data, pos + 12)?;
            pos += 16;

            let key = index_data
                .get(pos..pos + key_len)
                .ok_or_else(|| RingKvError::Corruption("truncated index key".to_string()))?
                .to_vec();
            pos += key_len;

            if offset + len as u64 > index_offset {
                return Err(RingKvError::Corruption(format!(
                    "entry at {} overruns the data block",
                    offset
                )));
            }

            index.insert(key, EntryHandle { offset, len });
        }

        if index.len() as u64 != entry_count {
            return Err(RingKvError::Corruption(format!(
                "header claims {} entries, index holds {}",
                entry_count,
                index.len()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
            entry_count,
        })
    }

    /// Where the entry for `key` lives, if this table has one
    pub fn locate(&self, key: &[u8]) -> Option<EntryHandle> {
        self.index.get(key).copied()
    }

    /// Get a value by key with a blocking positional read
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key found but is a tombstone (deleted)
    /// - `Err(KeyNotFound)`: key not in this SSTable
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.locate(key).ok_or(RingKvError::KeyNotFound)?;

        let mut buf = vec![0u8; handle.len as usize];
        self.file.read_exact_at(&mut buf, handle.offset)?;

        decode_entry(key, &buf, true)
    }

    /// Get a value by key, reading the entry through the ring
    ///
    /// Same contract as [`get`](Self::get). The calling task suspends until
    /// the submission's completion has been reaped.
    pub async fn get_async(
        &self,
        key: &[u8],
        queue: &SubmitQueue,
        verify_checksum: bool,
    ) -> Result<Option<Vec<u8>>> {
        let handle = self.locate(key).ok_or(RingKvError::KeyNotFound)?;

        let regions = queue
            .read(self.fd(), handle.offset, &[handle.len as usize])
            .await?;

        let buf = regions.first().map(|b| b.as_ref()).unwrap_or(&[]);
        if buf.len() < handle.len as usize {
            return Err(RingKvError::Corruption(format!(
                "short read at {}: wanted {} bytes, got {}",
                handle.offset,
                handle.len,
                buf.len()
            )));
        }

        decode_entry(key, buf, verify_checksum)
    }

    /// File descriptor the ring reads from
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Get the minimum key in this SSTable (for range filtering)
    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    /// Get the maximum key in this SSTable (for range filtering)
    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }
}
