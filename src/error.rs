//! Error types for ringkv
//!
//! Provides a unified error type for all operations. Errors never cross the
//! lookup boundary as-is: `AsyncReader` converts them into a [`Status`].
//!
//! [`Status`]: crate::status::Status

use thiserror::Error;

/// Result type alias using RingKvError
pub type Result<T> = std::result::Result<T, RingKvError>;

/// Unified error type for ringkv operations
#[derive(Debug, Error)]
pub enum RingKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Ring Errors
    // -------------------------------------------------------------------------
    #[error("Ring initialization failed: {0}")]
    RingInit(std::io::Error),

    #[error("Submission queue full")]
    SubmissionQueueFull,

    #[error("Submission failed: {0}")]
    Submit(std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
