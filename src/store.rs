//! Store Module
//!
//! The key-value store the async reader performs lookups against.
//!
//! ## Responsibilities
//! - Coordinate MemTable and Storage
//! - Serialize writes, allow concurrent reads
//! - Trigger flushes when the MemTable is full
//! - Serve point lookups whose disk reads go through a [`SubmitQueue`]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, RingKvError};
use crate::memtable::{MemTable, MemTableEntry};
use crate::status::Status;
use crate::storage::StorageManager;
use crate::uring::SubmitQueue;

// =============================================================================
// Read options
// =============================================================================

/// Which tiers a lookup may consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadTier {
    /// MemTable first, then SSTables
    #[default]
    All,

    /// SSTables only
    PersistedOnly,
}

/// Per-lookup options
#[derive(Clone, Default)]
pub struct ReadOptions {
    pub read_tier: ReadTier,
    pub verify_checksums: bool,

    /// When set, disk reads are submitted through this queue and the lookup
    /// suspends until their completions are reaped
    pub submit_queue: Option<Arc<SubmitQueue>>,
}

impl std::fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOptions")
            .field("read_tier", &self.read_tier)
            .field("verify_checksums", &self.verify_checksums)
            .field("submit_queue", &self.submit_queue.is_some())
            .finish()
    }
}

// =============================================================================
// PinnedBuffer
// =============================================================================

/// Output buffer shared between a lookup and whoever extracts its result
#[derive(Debug, Clone, Default)]
pub struct PinnedBuffer {
    inner: Arc<Mutex<BytesMut>>,
}

impl PinnedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents
    pub fn set(&self, value: &[u8]) {
        let mut buf = self.inner.lock();
        buf.clear();
        buf.extend_from_slice(value);
    }

    /// Take the contents, leaving the buffer empty
    pub fn take(&self) -> Bytes {
        self.inner.lock().split().freeze()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point lookups that may suspend on ring reads
pub trait AsyncStore: Send + Sync {
    /// Look up `key`, writing a found value into `value`
    ///
    /// The returned future never fails: errors are reported in the `Status`.
    fn async_get(&self, opts: &ReadOptions, key: &[u8], value: PinnedBuffer)
        -> BoxFuture<'static, Status>;
}

// =============================================================================
// Store
// =============================================================================

struct StoreInner {
    config: Config,
    memtable: MemTable,
    storage: StorageManager,

    /// Serializes write operations (put/delete/flush)
    write_lock: Mutex<()>,
}

/// The main store handle
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/flush): Serialized by `write_lock`
/// - **Reads** (get/async_get): Lock-free at the SSTable level; each lookup
///   takes a snapshot of the open readers and reads positionally
///
/// Cloning is cheap and every clone refers to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Create the data and SSTable directories
    /// 3. Load existing SSTables
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.data_dir)?;
        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);
        let storage = StorageManager::open(&storage_dir)?;

        tracing::info!(
            dir = %config.data_dir.display(),
            sstables = storage.sstable_count(),
            "store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                memtable: MemTable::new(),
                storage,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Open with default config rooted at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Get a value by key with blocking reads
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. SSTables (newest to oldest)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.inner.memtable.get(key) {
            return match entry {
                MemTableEntry::Value(value) => Ok(Some(value)),
                MemTableEntry::Tombstone => Ok(None),
            };
        }

        self.inner.storage.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _write_guard = self.inner.write_lock.lock();

        let new_size = self.inner.memtable.put(key.to_vec(), value.to_vec());
        if new_size >= self.inner.config.memtable_size_limit {
            self.flush_internal()?;
        }
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _write_guard = self.inner.write_lock.lock();

        let new_size = self.inner.memtable.delete(key.to_vec());
        if new_size >= self.inner.config.memtable_size_limit {
            self.flush_internal()?;
        }
        Ok(())
    }

    /// Flush the memtable to a new SSTable regardless of its size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.inner.write_lock.lock();
        self.flush_internal()
    }

    /// Called with the write lock held
    fn flush_internal(&self) -> Result<()> {
        if self.inner.memtable.is_empty() {
            return Ok(());
        }

        let metadata = self.inner.storage.flush(&self.inner.memtable)?;
        self.inner.memtable.clear();

        tracing::debug!(
            entries = metadata.entry_count(),
            sstables = self.inner.storage.sstable_count(),
            "memtable flushed"
        );
        Ok(())
    }

    /// Flush any remaining data
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    pub fn memtable_size(&self) -> usize {
        self.inner.memtable.size()
    }

    pub fn memtable_entry_count(&self) -> usize {
        self.inner.memtable.entry_count()
    }

    pub fn sstable_count(&self) -> usize {
        self.inner.storage.sstable_count()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl AsyncStore for Store {
    fn async_get(
        &self,
        opts: &ReadOptions,
        key: &[u8],
        value: PinnedBuffer,
    ) -> BoxFuture<'static, Status> {
        let inner = Arc::clone(&self.inner);
        let opts = opts.clone();
        let key = key.to_vec();

        Box::pin(async move {
            match inner.lookup(&opts, &key).await {
                Ok(Some(found)) => {
                    value.set(&found);
                    Status::ok()
                }
                Ok(None) => Status::not_found(),
                Err(e) => {
                    tracing::debug!(error = %e, "lookup failed");
                    Status::from(e)
                }
            }
        })
    }
}

impl StoreInner {
    async fn lookup(&self, opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if opts.read_tier == ReadTier::All {
            if let Some(entry) = self.memtable.get(key) {
                return Ok(match entry {
                    MemTableEntry::Value(v) => Some(v),
                    MemTableEntry::Tombstone => None,
                });
            }
        }

        for table in self.storage.tables() {
            if !table.might_contain(key) {
                continue;
            }

            let found = match &opts.submit_queue {
                Some(queue) => table.get_async(key, queue, opts.verify_checksums).await,
                None => table.get(key),
            };

            match found {
                Ok(value) => return Ok(value),
                Err(RingKvError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }
}
