//! Async Reader
//!
//! Public entry point for point lookups that read SSTable entries through the
//! ring. A lookup is started with [`AsyncReader::get`], which returns an
//! [`AsyncResult`] immediately; the lookup suspends every time it needs disk
//! bytes and resumes when [`AsyncReader::reap_completions`] dispatches the
//! completion it is waiting on.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ringkv::{AsyncReader, ReadOptions, Store};
//!
//! # fn main() -> ringkv::Result<()> {
//! let store = Store::open_path("./data".as_ref())?;
//! let reader = AsyncReader::new(Arc::new(store), 256)?;
//!
//! let lookup = reader.get(&ReadOptions::default(), b"k1");
//! while reader.pending_submission_count() > 0 {
//!     reader.reap_completions();
//! }
//! let (status, value) = lookup.resolve();
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;

use crate::config::{Config, RingBackend};
use crate::error::{Result, RingKvError};
use crate::status::Status;
use crate::store::{AsyncStore, PinnedBuffer, ReadOptions, ReadTier};
use crate::uring::{InProcessRing, Ring, SubmitQueue};

// =============================================================================
// LookupTask
// =============================================================================

/// A suspended store lookup, polled inline whenever it is woken
///
/// There is no executor: the first poll happens when the lookup starts, and
/// every later poll happens on the thread that delivers the completion the
/// lookup was waiting on.
struct LookupTask {
    future: Mutex<Option<BoxFuture<'static, Status>>>,
    result: Mutex<Option<Status>>,
    /// Set by a wake; cleared by the poller before each poll
    notified: AtomicBool,
}

impl LookupTask {
    fn spawn(future: BoxFuture<'static, Status>) -> Arc<Self> {
        let task = Arc::new(Self {
            future: Mutex::new(Some(future)),
            result: Mutex::new(None),
            notified: AtomicBool::new(false),
        });
        task.run();
        task
    }

    fn run(self: &Arc<Self>) {
        self.notified.store(true, Ordering::SeqCst);

        loop {
            {
                // Someone else is polling; they will see `notified`
                let Some(mut slot) = self.future.try_lock() else {
                    return;
                };

                while self.notified.swap(false, Ordering::SeqCst) {
                    let Some(future) = slot.as_mut() else {
                        return;
                    };

                    let waker = waker_ref(self);
                    let mut cx = Context::from_waker(&waker);
                    if let Poll::Ready(status) = future.as_mut().poll(&mut cx) {
                        *slot = None;
                        *self.result.lock() = Some(status);
                        return;
                    }
                }
            }

            // A wake may have landed between the last swap and the unlock
            if !self.notified.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.result.lock().is_some()
    }

    fn take_result(&self) -> Option<Status> {
        self.result.lock().take()
    }
}

impl ArcWake for LookupTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.run();
    }
}

// =============================================================================
// AsyncResult
// =============================================================================

/// Handle to a lookup started by [`AsyncReader::get`]
///
/// Consumed exactly once, by [`resolve`](Self::resolve) or by awaiting it.
#[must_use = "a lookup's value is only available by resolving its result"]
pub struct AsyncResult {
    value: PinnedBuffer,
    task: Arc<LookupTask>,
    queue: Arc<SubmitQueue>,
}

impl AsyncResult {
    /// True once the lookup has produced its status
    pub fn is_ready(&self) -> bool {
        self.task.is_finished()
    }

    /// Block until the lookup finishes and return its status and value
    ///
    /// Drives the ring while waiting. If nothing is in flight and the lookup
    /// still has not finished, it can never finish and `Incomplete` is returned.
    pub fn resolve(self) -> (Status, Bytes) {
        loop {
            if let Some(output) = self.drive() {
                return output;
            }
        }
    }

    /// One round of waiting; `Some` once the lookup has an outcome
    fn drive(&self) -> Option<(Status, Bytes)> {
        if let Some(status) = self.task.take_result() {
            return Some((status, self.value.take()));
        }

        if self.queue.in_flight() == 0 {
            // A delivery finishes the lookup before the counter drops
            return Some(match self.task.take_result() {
                Some(status) => (status, self.value.take()),
                None => {
                    tracing::error!("lookup suspended with no reads in flight");
                    (
                        Status::incomplete("lookup suspended with no reads in flight"),
                        Bytes::new(),
                    )
                }
            });
        }

        if let Err(e) = self.queue.wait_and_reap() {
            if !self.task.is_finished() {
                tracing::warn!(error = %e, "waiting for completions failed");
                return Some((Status::from(e), Bytes::new()));
            }
        }
        None
    }
}

/// Awaiting a lookup drives the ring from the polling thread
///
/// Nothing signals a waker when the kernel completes a read, so each poll
/// blocks in the ring for up to a short slice and then asks to be polled
/// again. Meant for `futures::executor` style drivers; on a reactor-based
/// runtime, reap from a dedicated thread and use [`AsyncResult::is_ready`].
impl Future for AsyncResult {
    type Output = (Status, Bytes);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut().drive() {
            Some(output) => Poll::Ready(output),
            None => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

// =============================================================================
// AsyncReader
// =============================================================================

/// Issues point lookups whose disk reads go through a ring
///
/// Cheap to share: lookups hold their own handle to the submission queue.
pub struct AsyncReader {
    store: Arc<dyn AsyncStore>,
    queue: Arc<SubmitQueue>,
}

impl AsyncReader {
    /// Create a reader backed by a kernel io_uring with `capacity` entries
    ///
    /// Fails with [`RingKvError::RingInit`] if the ring cannot be created.
    #[cfg(target_os = "linux")]
    pub fn new(store: Arc<dyn AsyncStore>, capacity: u32) -> Result<Self> {
        let ring = crate::uring::KernelRing::new(capacity).map_err(RingKvError::RingInit)?;
        Ok(Self::with_ring(store, Box::new(ring)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new(_store: Arc<dyn AsyncStore>, _capacity: u32) -> Result<Self> {
        Err(RingKvError::RingInit(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "io_uring is only available on Linux",
        )))
    }

    /// Create a reader over any ring implementation
    pub fn with_ring(store: Arc<dyn AsyncStore>, ring: Box<dyn Ring>) -> Self {
        tracing::debug!(capacity = ring.capacity(), "async reader created");
        Self {
            store,
            queue: Arc::new(SubmitQueue::new(ring)),
        }
    }

    /// Create a reader using the configured ring backend and capacity
    pub fn from_config(store: Arc<dyn AsyncStore>, config: &Config) -> Result<Self> {
        config.validate()?;
        match config.ring_backend {
            RingBackend::Kernel => Self::new(store, config.ring_capacity),
            RingBackend::InProcess => Ok(Self::with_ring(
                store,
                Box::new(InProcessRing::new(config.ring_capacity)),
            )),
        }
    }

    /// Options every lookup through this reader runs with
    ///
    /// Memory-only tiers are skipped and checksums are always verified,
    /// whatever the caller asked for.
    pub fn setup_read_options(&self, opts: &ReadOptions) -> ReadOptions {
        let mut opts = opts.clone();
        opts.read_tier = ReadTier::PersistedOnly;
        opts.verify_checksums = true;
        opts.submit_queue = Some(Arc::clone(&self.queue));
        opts
    }

    /// Start a point lookup
    ///
    /// Never blocks: the lookup runs until it first needs disk bytes and
    /// continues as completions are reaped.
    pub fn get(&self, opts: &ReadOptions, key: &[u8]) -> AsyncResult {
        let opts = self.setup_read_options(opts);
        let value = PinnedBuffer::new();

        let future = self.store.async_get(&opts, key, value.clone());
        let task = LookupTask::spawn(future);

        tracing::debug!(
            key_len = key.len(),
            finished = task.is_finished(),
            in_flight = self.queue.in_flight(),
            "lookup started"
        );

        AsyncResult {
            value,
            task,
            queue: Arc::clone(&self.queue),
        }
    }

    /// True if at least one completion is ready to reap
    pub fn peek_completions(&self) -> bool {
        self.queue.peek_completions()
    }

    /// Dispatch every ready completion, returning how many were processed
    pub fn reap_completions(&self) -> u32 {
        self.queue.reap_completions()
    }

    /// Submissions handed to the ring and not yet reaped
    pub fn pending_submission_count(&self) -> u32 {
        self.queue.in_flight()
    }

    /// Number of (fd, offset) keys with reads in flight
    pub fn pending_keys(&self) -> usize {
        self.queue.pending_keys()
    }

    pub fn submit_queue(&self) -> &Arc<SubmitQueue> {
        &self.queue
    }
}

impl Drop for AsyncReader {
    fn drop(&mut self) {
        let in_flight = self.queue.in_flight();
        if in_flight > 0 {
            tracing::warn!(in_flight, "async reader dropped with submissions in flight");
        }
    }
}
