//! Configuration for ringkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, RingKvError};

/// Main configuration for a ringkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── sstables/        (SSTable files)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Ring Configuration
    // -------------------------------------------------------------------------
    /// Number of submission-queue entries the ring can hold
    pub ring_capacity: u32,

    /// Which ring implementation drives asynchronous reads
    pub ring_backend: RingBackend,
}

/// Ring implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBackend {
    /// Kernel io_uring instance (Linux only)
    Kernel,

    /// In-process ring that performs the reads at submit time
    InProcess,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./ringkv_data"),
            memtable_size_limit: 64 * 1024 * 1024, // 64 MB
            ring_capacity: 256,
            ring_backend: RingBackend::Kernel,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 {
            return Err(RingKvError::Config(
                "ring_capacity must be positive".to_string(),
            ));
        }
        if self.memtable_size_limit == 0 {
            return Err(RingKvError::Config(
                "memtable_size_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the ring capacity (submission-queue entries)
    pub fn ring_capacity(mut self, entries: u32) -> Self {
        self.config.ring_capacity = entries;
        self
    }

    /// Select the ring implementation
    pub fn ring_backend(mut self, backend: RingBackend) -> Self {
        self.config.ring_backend = backend;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
