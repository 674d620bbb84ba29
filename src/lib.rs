//! # ringkv
//!
//! An embedded sorted-table key-value store with asynchronous point reads
//! driven by io_uring:
//! - Point lookups that suspend on ring reads instead of blocking a thread
//! - Coalescing of concurrent reads of the same bytes into one submission
//! - Checksummed SSTable entries, verified on every ring-backed read
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      AsyncReader                             │
//! │           get → AsyncResult, peek / reap completions         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ async_get (persisted tier, checksums)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │               MemTable + StorageManager                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ SSTableReader::get_async
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     SubmitQueue                              │
//! │     coalescer (PendingIo) → Ring → completion dispatcher     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │ KernelRing  │          │ InProcessRing│
//!   │ (io_uring)  │          │  (preadv)    │
//!   └─────────────┘          └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod status;

pub mod memtable;
pub mod storage;
pub mod uring;
pub mod store;
pub mod reader;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, RingKvError};
pub use config::{Config, RingBackend};
pub use status::{Code, Severity, Status, SubCode};
pub use store::{AsyncStore, PinnedBuffer, ReadOptions, ReadTier, Store};
pub use reader::{AsyncReader, AsyncResult};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ringkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
