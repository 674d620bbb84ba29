//! Lookup status
//!
//! The tri-level outcome (code, sub-code, severity) reported for every
//! asynchronous lookup, plus an optional detail message.

use std::fmt;

use crate::error::RingKvError;

/// Outcome category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    Ok = 0,
    NotFound = 1,
    Corruption = 2,
    NotSupported = 3,
    InvalidArgument = 4,
    IoError = 5,
    Incomplete = 7,
    Busy = 11,
    TryAgain = 13,
}

/// Refinement of [`Code`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubCode {
    None = 0,
    NoSpace = 4,
    PathNotFound = 9,
    /// No free submission slot in the ring
    IoUringSqeFull = 15,
    /// The kernel rejected the submission flush
    IoUringSubmitError = 16,
    /// A submitted read completed with a negative result
    IoUringCompletionError = 17,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    NoError = 0,
    SoftError = 1,
    HardError = 2,
    FatalError = 3,
    UnrecoverableError = 4,
}

/// Status of a finished operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub sub_code: SubCode,
    pub severity: Severity,
    /// Detail text, e.g. the kernel's error string
    pub message: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self::new(Code::Ok, SubCode::None, Severity::NoError, None)
    }

    pub fn not_found() -> Self {
        Self::new(Code::NotFound, SubCode::None, Severity::NoError, None)
    }

    /// Per-lookup I/O failure
    ///
    /// Carries no severity: a full queue or a rejected flush affects only the
    /// lookup that hit it, and the caller decides whether to retry.
    pub fn io_error(sub_code: SubCode, message: Option<String>) -> Self {
        Self::new(Code::IoError, sub_code, Severity::NoError, message)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(
            Code::Corruption,
            SubCode::None,
            Severity::HardError,
            Some(message.into()),
        )
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::new(
            Code::Incomplete,
            SubCode::None,
            Severity::NoError,
            Some(message.into()),
        )
    }

    fn new(code: Code, sub_code: SubCode, severity: Severity, message: Option<String>) -> Self {
        Self {
            code,
            sub_code,
            severity,
            message,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }

    /// The (code, sub-code, severity) triple
    pub fn parts(&self) -> (Code, SubCode, Severity) {
        (self.code, self.sub_code, self.severity)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code)?;
        if self.sub_code != SubCode::None {
            write!(f, " ({:?})", self.sub_code)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl From<&RingKvError> for Status {
    fn from(err: &RingKvError) -> Self {
        match err {
            RingKvError::SubmissionQueueFull => Status::io_error(SubCode::IoUringSqeFull, None),
            RingKvError::Submit(e) => {
                Status::io_error(SubCode::IoUringSubmitError, Some(e.to_string()))
            }
            RingKvError::Io(e) if e.raw_os_error().is_some() => {
                Status::io_error(SubCode::IoUringCompletionError, Some(e.to_string()))
            }
            RingKvError::Io(e) => Status::io_error(SubCode::None, Some(e.to_string())),
            RingKvError::RingInit(e) => Status::new(
                Code::IoError,
                SubCode::None,
                Severity::FatalError,
                Some(e.to_string()),
            ),
            RingKvError::Corruption(msg) => Status::corruption(msg.clone()),
            RingKvError::KeyNotFound => Status::not_found(),
            RingKvError::Storage(msg) => Status::io_error(SubCode::None, Some(msg.clone())),
            RingKvError::Config(msg) => Status::new(
                Code::InvalidArgument,
                SubCode::None,
                Severity::NoError,
                Some(msg.clone()),
            ),
        }
    }
}

impl From<RingKvError> for Status {
    fn from(err: RingKvError) -> Self {
        Status::from(&err)
    }
}
