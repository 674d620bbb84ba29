//! io_uring-backed ring

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use io_uring::{opcode, types, IoUring};

use super::ring::{Completion, Ring, RingFull, SqEntry};

/// Kernel io_uring instance
pub struct KernelRing {
    ring: IoUring,
    capacity: u32,
    /// Entries pushed but not yet popped from the completion queue
    unreaped: u32,
}

impl KernelRing {
    /// Create a ring with `capacity` submission-queue entries
    pub fn new(capacity: u32) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ring capacity must be positive",
            ));
        }

        let ring = IoUring::new(capacity)?;
        tracing::debug!(
            capacity,
            sq_entries = ring.params().sq_entries(),
            cq_entries = ring.params().cq_entries(),
            "io_uring initialized"
        );

        Ok(Self {
            ring,
            capacity,
            unreaped: 0,
        })
    }
}

impl Ring for KernelRing {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    unsafe fn push(&mut self, entry: &SqEntry) -> Result<(), RingFull> {
        if self.unreaped >= self.capacity {
            return Err(RingFull);
        }

        let sqe = match *entry {
            SqEntry::ReadV {
                fd,
                iovecs,
                iovcnt,
                offset,
                user_data,
            } => opcode::Readv::new(types::Fd(fd), iovecs, iovcnt)
                .offset(offset)
                .build()
                .user_data(user_data),
            SqEntry::Nop { user_data } => opcode::Nop::new().build().user_data(user_data),
        };

        // SAFETY: forwarded from this function's contract.
        self.ring.submission().push(&sqe).map_err(|_| RingFull)?;
        self.unreaped += 1;
        Ok(())
    }

    fn submit(&mut self) -> io::Result<usize> {
        loop {
            match self.ring.submit() {
                Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                other => return other,
            }
        }
    }

    fn peek(&mut self) -> bool {
        !self.ring.completion().is_empty()
    }

    fn pop(&mut self) -> Option<Completion> {
        let cqe = self.ring.completion().next()?;
        self.unreaped = self.unreaped.saturating_sub(1);
        Some(Completion {
            user_data: cqe.user_data(),
            result: cqe.result(),
        })
    }

    fn unreaped(&self) -> u32 {
        self.unreaped
    }

    fn wait(&mut self, min_complete: usize) -> io::Result<()> {
        loop {
            match self.ring.submit_and_wait(min_complete) {
                Ok(_) => return Ok(()),
                Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// The ring's own descriptor polls readable while its completion queue
    /// is non-empty
    fn completion_fd(&self) -> Option<RawFd> {
        Some(self.ring.as_raw_fd())
    }
}
