//! Per-submission state
//!
//! An [`IoContext`] exists for every entry handed to the ring, from the moment
//! it is pushed until its completion is reaped. The registry in the driver maps
//! the entry's `user_data` token to a [`Submission`], whose variant says whether
//! the entry is a real read or a no-op placeholder.
//!
//! A [`ReadCompletion`] is the continuation of one logical read. It collects
//! the bytes for each region, from the read's own submission and from any
//! leaders it follows, and wakes the suspended task once every part arrived.

use std::io;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use parking_lot::Mutex;

use super::coalescer::{Extent, PendingIoKey, Plan};
use super::ring::SqEntry;

/// Opaque association between a ring entry and its context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub(crate) u64);

impl Token {
    pub(crate) fn user_data(self) -> u64 {
        self.0
    }
}

/// A registered ring entry, tagged by kind
pub(crate) enum Submission {
    Read(IoContext),
    Nop(IoContext),
}

impl Submission {
    pub fn context_mut(&mut self) -> &mut IoContext {
        match self {
            Submission::Read(ctx) | Submission::Nop(ctx) => ctx,
        }
    }
}

/// A region this submission reads into its own buffer
pub(crate) struct Region {
    pub extent: Extent,
    /// Index of the region in the logical read
    pub slot: usize,
    pub buf: Vec<u8>,
}

/// Another logical read waiting on bytes this submission leads
pub(crate) struct Follower {
    pub extent: Extent,
    pub slot: usize,
    pub completion: Arc<ReadCompletion>,
}

/// State owned by one ring entry
pub(crate) struct IoContext {
    pub key: PendingIoKey,
    /// Every extent this submission holds a pending reference on
    pub extents: Vec<Extent>,
    /// Regions read by this submission, contiguous and in file order
    pub regions: Vec<Region>,
    /// Stable descriptors into `regions[..].buf`; never resized after creation
    iovecs: Vec<libc::iovec>,
    /// Continuation to resume; `None` once detached
    pub completion: Option<Arc<ReadCompletion>>,
    pub followers: Vec<Follower>,
    /// False when the entry never got its bookkeeping recorded
    pub committed: bool,
}

// SAFETY: `iovecs` only points into `regions`, which this context owns. The
// context is moved between threads only under the driver lock.
unsafe impl Send for IoContext {}

impl IoContext {
    pub fn new(
        key: PendingIoKey,
        extents: Vec<Extent>,
        plan: &Plan,
        completion: Arc<ReadCompletion>,
    ) -> Self {
        let mut regions: Vec<Region> = plan
            .submitted()
            .map(|slot| Region {
                extent: extents[slot],
                slot,
                buf: vec![0u8; extents[slot].len],
            })
            .collect();

        let iovecs = regions
            .iter_mut()
            .map(|r| libc::iovec {
                iov_base: r.buf.as_mut_ptr().cast(),
                iov_len: r.buf.len(),
            })
            .collect();

        Self {
            key,
            extents,
            regions,
            iovecs,
            completion: Some(completion),
            followers: Vec::new(),
            committed: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.regions.is_empty()
    }

    /// Ring entry for this context
    pub fn sq_entry(&self, token: Token) -> SqEntry {
        match self.regions.first() {
            Some(first) => SqEntry::ReadV {
                fd: self.key.fd,
                iovecs: self.iovecs.as_ptr(),
                iovcnt: self.iovecs.len() as u32,
                offset: self.key.offset + first.extent.start,
                user_data: token.user_data(),
            },
            None => SqEntry::Nop {
                user_data: token.user_data(),
            },
        }
    }

    /// Split `transferred` bytes across the regions in order
    ///
    /// Consumes the buffers; regions past a short read come back truncated.
    pub fn take_data(&mut self, transferred: usize) -> Vec<(Extent, usize, Bytes)> {
        let mut remaining = transferred;
        self.regions
            .drain(..)
            .map(|mut region| {
                let filled = remaining.min(region.buf.len());
                remaining -= filled;
                region.buf.truncate(filled);
                (region.extent, region.slot, Bytes::from(region.buf))
            })
            .collect()
    }
}

// =============================================================================
// Continuation
// =============================================================================

struct ReadState {
    slots: Vec<Option<Bytes>>,
    /// Parts not yet delivered: the own submission plus one per followed region
    outstanding: usize,
    /// First errno reported by any part
    errno: Option<i32>,
    waker: Option<Waker>,
    consumed: bool,
}

/// Continuation of one logical read
pub(crate) struct ReadCompletion {
    state: Mutex<ReadState>,
}

impl ReadCompletion {
    pub fn new(slots: usize, parts: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReadState {
                slots: vec![None; slots],
                outstanding: parts,
                errno: None,
                waker: None,
                consumed: false,
            }),
        })
    }

    /// Deliver one part; resumes the waiting task when it was the last
    ///
    /// Returns false if every part had already been delivered.
    pub fn complete_part(&self, fills: Vec<(usize, Bytes)>, errno: Option<i32>) -> bool {
        let waker = {
            let mut state = self.state.lock();
            if state.outstanding == 0 {
                tracing::error!("read continuation completed more than once");
                debug_assert!(false, "read continuation completed more than once");
                return false;
            }

            for (slot, bytes) in fills {
                if let Some(entry) = state.slots.get_mut(slot) {
                    *entry = Some(bytes);
                }
            }
            if state.errno.is_none() {
                state.errno = errno;
            }

            state.outstanding -= 1;
            if state.outstanding == 0 {
                state.waker.take()
            } else {
                None
            }
        };

        // Resume outside the lock: the task may immediately submit again
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().outstanding == 0
    }

    pub fn poll_result(&self, cx: &mut Context<'_>) -> Poll<io::Result<Vec<Bytes>>> {
        let mut state = self.state.lock();

        if state.outstanding > 0 {
            match &state.waker {
                Some(w) if w.will_wake(cx.waker()) => {}
                _ => state.waker = Some(cx.waker().clone()),
            }
            return Poll::Pending;
        }

        if state.consumed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "read result already taken",
            )));
        }
        state.consumed = true;

        if let Some(errno) = state.errno {
            return Poll::Ready(Err(io::Error::from_raw_os_error(errno)));
        }

        let slots = std::mem::take(&mut state.slots);
        Poll::Ready(Ok(slots.into_iter().map(Option::unwrap_or_default).collect()))
    }
}
