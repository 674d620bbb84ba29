//! Submission path
//!
//! [`SubmitQueue`] is what the store's read path calls when it needs bytes from
//! disk. Each call runs the coalescer, builds one ring entry (a vectored read,
//! or a no-op when every region is already in flight), flushes it, and returns
//! a [`ReadFuture`] that resolves once the completion dispatcher has delivered
//! all of the read's regions.
//!
//! Bookkeeping is recorded only after the entry is both queued and flushed, so
//! a read that fails with a full queue or a rejected flush leaves the
//! pending-I/O map untouched.

use std::collections::HashMap;
use std::future::Future;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, RingKvError};

use super::coalescer::{Extent, PendingIo, PendingIoKey};
use super::context::{Follower, IoContext, ReadCompletion, Submission, Token};
use super::ring::Ring;

/// State touched only under the driver lock
pub(crate) struct DriverState {
    pub ring: Box<dyn Ring>,
    pub pending: PendingIo,
    /// Registry of every entry that is in the ring and not yet reaped
    pub contexts: HashMap<Token, Submission>,
    next_token: u64,
}

impl DriverState {
    fn next_token(&mut self) -> Token {
        self.next_token = self.next_token.wrapping_add(1);
        Token(self.next_token)
    }
}

/// Routes reads through the ring, coalescing duplicates
///
/// Shared by every lookup of one reader. The pending-I/O map and the ring sit
/// behind one mutex, so reads may be submitted from any thread; the in-flight
/// counter is atomic so it can be observed without taking the lock.
///
/// A submission stays counted in `in_flight` until its completion has been
/// delivered, which happens after the ring stopped counting it as unreaped.
/// `progress` is signalled, under the lock, each time such a delivery ends.
pub struct SubmitQueue {
    pub(crate) state: Mutex<DriverState>,
    pub(crate) in_flight: AtomicU32,
    pub(crate) progress: Condvar,
}

impl SubmitQueue {
    pub fn new(ring: Box<dyn Ring>) -> Self {
        Self {
            state: Mutex::new(DriverState {
                ring,
                pending: PendingIo::new(),
                contexts: HashMap::new(),
                next_token: 0,
            }),
            in_flight: AtomicU32::new(0),
            progress: Condvar::new(),
        }
    }

    /// Read consecutive regions of the given lengths starting at `offset`
    ///
    /// Queue-full and flush failures resolve immediately with
    /// [`RingKvError::SubmissionQueueFull`] / [`RingKvError::Submit`]. A
    /// completion that reports an errno resolves with [`RingKvError::Io`].
    pub fn read(&self, fd: RawFd, offset: u64, lens: &[usize]) -> ReadFuture {
        let key = PendingIoKey { fd, offset };
        let extents = Extent::layout(lens);

        let mut state = self.state.lock();
        let plan = state.pending.plan(&key, &extents);
        let token = state.next_token();

        let parts = 1 + plan.followed().count();
        let completion = ReadCompletion::new(lens.len(), parts);
        let ctx = IoContext::new(key, extents.clone(), &plan, Arc::clone(&completion));
        let entry = ctx.sq_entry(token);

        // SAFETY: the context owning the iovecs is registered below and kept
        // until the entry's completion is reaped; on a refused push nothing
        // references it.
        if unsafe { state.ring.push(&entry) }.is_err() {
            tracing::warn!(fd, offset, "submission queue full");
            return ReadFuture::failed(RingKvError::SubmissionQueueFull);
        }

        let submission = if ctx.is_noop() {
            Submission::Nop(ctx)
        } else {
            Submission::Read(ctx)
        };
        state.contexts.insert(token, submission);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = state.ring.submit() {
            // The entry stays queued and completes on a later flush; keep its
            // buffers registered but give the caller its error now.
            tracing::warn!(fd, offset, error = %e, "ring submission failed");
            if let Some(submission) = state.contexts.get_mut(&token) {
                submission.context_mut().completion = None;
            }
            return ReadFuture::failed(RingKvError::Submit(e));
        }

        state.pending.commit(key, token, &extents, &plan);
        if let Some(submission) = state.contexts.get_mut(&token) {
            submission.context_mut().committed = true;
        }

        for (slot, leader) in plan.followed() {
            let follower = Follower {
                extent: extents[slot],
                slot,
                completion: Arc::clone(&completion),
            };
            match state.contexts.get_mut(&leader) {
                Some(leading) => leading.context_mut().followers.push(follower),
                None => {
                    tracing::error!(?leader, "coalesced onto a submission that is not registered");
                    completion.complete_part(Vec::new(), Some(libc::EIO));
                }
            }
        }

        tracing::debug!(
            fd,
            offset,
            regions = lens.len(),
            followed = parts - 1,
            noop = plan.is_noop(),
            "read submitted"
        );

        ReadFuture::waiting(completion)
    }

    /// Submissions handed to the ring and not yet reaped
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> u32 {
        self.state.lock().ring.capacity()
    }

    /// Number of (fd, offset) keys with reads in flight
    pub fn pending_keys(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Extents in flight for one key
    pub fn pending_extents(&self, fd: RawFd, offset: u64) -> Vec<Extent> {
        self.state.lock().pending.extents(&PendingIoKey { fd, offset })
    }
}

impl Drop for SubmitQueue {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.contexts.is_empty() {
            tracing::warn!(
                in_flight = state.contexts.len(),
                "ring dropped with reads in flight; leaking their buffers"
            );
            // The kernel may still write into these buffers
            std::mem::forget(std::mem::take(&mut state.contexts));
        }
    }
}

// =============================================================================
// ReadFuture
// =============================================================================

enum ReadFutureState {
    Failed(Option<RingKvError>),
    Waiting(Arc<ReadCompletion>),
}

/// Resolves to one buffer per requested region
///
/// Buffers come back shorter than requested when the read hit end of file.
pub struct ReadFuture {
    state: ReadFutureState,
}

impl ReadFuture {
    fn failed(err: RingKvError) -> Self {
        Self {
            state: ReadFutureState::Failed(Some(err)),
        }
    }

    fn waiting(completion: Arc<ReadCompletion>) -> Self {
        Self {
            state: ReadFutureState::Waiting(completion),
        }
    }

    /// True once polling would return `Ready`
    pub fn is_ready(&self) -> bool {
        match &self.state {
            ReadFutureState::Failed(_) => true,
            ReadFutureState::Waiting(completion) => completion.is_complete(),
        }
    }
}

impl Future for ReadFuture {
    type Output = Result<Vec<Bytes>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            ReadFutureState::Failed(err) => Poll::Ready(Err(err
                .take()
                .unwrap_or_else(|| RingKvError::Storage("read polled after completion".to_string())))),
            ReadFutureState::Waiting(completion) => completion
                .poll_result(cx)
                .map(|r| r.map_err(RingKvError::Io)),
        }
    }
}
