//! Ring abstraction
//!
//! The submission/completion queue pair the driver talks to. [`KernelRing`]
//! is the io_uring-backed implementation; [`InProcessRing`] performs the reads
//! itself at flush time and is used where io_uring is not available.
//!
//! Both implementations count a slot as occupied from `push` until the
//! matching completion has been popped, so a ring of capacity N never has
//! more than N unreaped operations and can never overflow its completion queue.
//!
//! [`KernelRing`]: super::KernelRing

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;

/// Returned by [`Ring::push`] when no submission slot is free
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("submission queue full")]
pub struct RingFull;

/// One submission queue entry
#[derive(Debug, Clone, Copy)]
pub enum SqEntry {
    /// Vectored positional read into caller-owned buffers
    ReadV {
        fd: RawFd,
        iovecs: *const libc::iovec,
        iovcnt: u32,
        offset: u64,
        user_data: u64,
    },

    /// Placeholder that completes without touching any file
    Nop { user_data: u64 },
}

impl SqEntry {
    pub fn user_data(&self) -> u64 {
        match self {
            SqEntry::ReadV { user_data, .. } | SqEntry::Nop { user_data } => *user_data,
        }
    }
}

/// One completion queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub user_data: u64,
    /// Bytes transferred, or a negated errno
    pub result: i32,
}

/// A submission/completion queue pair
pub trait Ring: Send {
    /// Maximum number of unreaped operations
    fn capacity(&self) -> u32;

    /// Queue an entry without flushing it to the kernel
    ///
    /// # Safety
    ///
    /// Every iovec referenced by `entry`, and the memory it describes, must stay
    /// valid and untouched until the completion carrying the entry's
    /// `user_data` has been popped.
    unsafe fn push(&mut self, entry: &SqEntry) -> Result<(), RingFull>;

    /// Hand queued entries to the kernel, returning how many were consumed
    fn submit(&mut self) -> io::Result<usize>;

    /// Non-blocking check for at least one completion
    fn peek(&mut self) -> bool;

    /// Take the oldest completion, if any
    fn pop(&mut self) -> Option<Completion>;

    /// Entries pushed whose completions have not been popped yet
    fn unreaped(&self) -> u32;

    /// Block until at least `min_complete` completions are ready
    fn wait(&mut self, min_complete: usize) -> io::Result<()>;

    /// Descriptor that polls readable once a completion is ready
    ///
    /// Rings that have one are waited on without holding the driver lock;
    /// the others are asked to [`wait`](Ring::wait) under it.
    fn completion_fd(&self) -> Option<RawFd> {
        None
    }
}

// =============================================================================
// In-process ring
// =============================================================================

/// Ring that executes reads with `preadv` when flushed
///
/// Completions are produced in submission order. Useful on kernels or in
/// sandboxes where io_uring is disabled, and for deterministic tests.
pub struct InProcessRing {
    capacity: u32,
    queued: VecDeque<SqEntry>,
    completed: VecDeque<Completion>,
}

// SAFETY: the raw iovec pointers in queued entries point at buffers owned by
// the submission's context, which outlives the entry (see `Ring::push`).
unsafe impl Send for InProcessRing {}

impl InProcessRing {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            queued: VecDeque::new(),
            completed: VecDeque::new(),
        }
    }

    fn occupied(&self) -> usize {
        self.queued.len() + self.completed.len()
    }

    fn execute(entry: &SqEntry) -> i32 {
        match *entry {
            SqEntry::ReadV {
                fd,
                iovecs,
                iovcnt,
                offset,
                ..
            } => {
                // SAFETY: validity of `iovecs` is guaranteed by the caller of `push`.
                let n = unsafe {
                    libc::preadv(fd, iovecs, iovcnt as libc::c_int, offset as libc::off_t)
                };
                if n < 0 {
                    -io::Error::last_os_error()
                        .raw_os_error()
                        .unwrap_or(libc::EIO)
                } else {
                    n as i32
                }
            }
            SqEntry::Nop { .. } => 0,
        }
    }
}

impl Ring for InProcessRing {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    unsafe fn push(&mut self, entry: &SqEntry) -> Result<(), RingFull> {
        if self.occupied() >= self.capacity as usize {
            return Err(RingFull);
        }
        self.queued.push_back(*entry);
        Ok(())
    }

    fn submit(&mut self) -> io::Result<usize> {
        let mut submitted = 0;
        while let Some(entry) = self.queued.pop_front() {
            let result = Self::execute(&entry);
            self.completed.push_back(Completion {
                user_data: entry.user_data(),
                result,
            });
            submitted += 1;
        }
        Ok(submitted)
    }

    fn peek(&mut self) -> bool {
        !self.completed.is_empty()
    }

    fn pop(&mut self) -> Option<Completion> {
        self.completed.pop_front()
    }

    fn unreaped(&self) -> u32 {
        self.occupied() as u32
    }

    fn wait(&mut self, min_complete: usize) -> io::Result<()> {
        if self.completed.len() < min_complete {
            self.submit()?;
        }
        if self.completed.len() < min_complete {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "not enough operations in flight to wait for",
            ));
        }
        Ok(())
    }
}
