//! Completion dispatcher
//!
//! Reaps ring completions one at a time, in the order the ring reports them.
//! For each completion the owning context is removed from the registry, its
//! pending-I/O references are released, and the bytes it read are handed to
//! its own continuation and to every follower that coalesced onto it.
//!
//! Continuations run after the driver lock is released: a resumed lookup may
//! immediately submit its next read through the same queue.
//!
//! Blocking waits never hold the driver lock across the kernel sleep, so
//! lookups on other threads keep submitting and reaping while one waits.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, RingKvError};

use super::context::{ReadCompletion, Submission, Token};
use super::ring::Completion;
use super::submit::{DriverState, SubmitQueue};

/// One part handed to a continuation
pub(crate) struct Delivery {
    completion: Arc<ReadCompletion>,
    fills: Vec<(usize, Bytes)>,
    errno: Option<i32>,
}

impl Delivery {
    fn deliver(self) {
        self.completion.complete_part(self.fills, self.errno);
    }
}

impl DriverState {
    /// Retire the context behind `cqe`
    ///
    /// Returns `None` for a completion whose token is not registered, which
    /// means it was already reaped.
    pub(crate) fn dispatch(&mut self, cqe: Completion) -> Option<Vec<Delivery>> {
        let token = Token(cqe.user_data);
        let Some(submission) = self.contexts.remove(&token) else {
            tracing::error!(user_data = cqe.user_data, "completion for an unknown submission");
            debug_assert!(false, "completion reaped twice");
            return None;
        };

        let (noop, mut ctx) = match submission {
            Submission::Read(ctx) => (false, ctx),
            Submission::Nop(ctx) => (true, ctx),
        };

        if ctx.committed {
            self.pending.release(&ctx.key, token, &ctx.extents);
        }

        let errno = (cqe.result < 0).then(|| -cqe.result);
        if let Some(errno) = errno {
            tracing::warn!(
                fd = ctx.key.fd,
                offset = ctx.key.offset,
                errno,
                "read completed with an error"
            );
        }

        let data = match errno {
            Some(_) => Vec::new(),
            None => ctx.take_data(cqe.result as usize),
        };

        tracing::debug!(
            ?token,
            noop,
            result = cqe.result,
            followers = ctx.followers.len(),
            "completion reaped"
        );

        let mut deliveries = Vec::with_capacity(1 + ctx.followers.len());

        if let Some(completion) = ctx.completion.take() {
            deliveries.push(Delivery {
                completion,
                fills: data.iter().map(|(_, slot, b)| (*slot, b.clone())).collect(),
                errno,
            });
        }

        for follower in ctx.followers.drain(..) {
            let bytes = data
                .iter()
                .find(|(extent, _, _)| *extent == follower.extent)
                .map(|(_, _, b)| b.clone());

            let (fills, errno) = match (bytes, errno) {
                (Some(b), None) => (vec![(follower.slot, b)], None),
                (_, Some(errno)) => (Vec::new(), Some(errno)),
                (None, None) => {
                    tracing::error!(
                        extent = ?follower.extent,
                        "follower registered for an extent its leader does not read"
                    );
                    (Vec::new(), Some(libc::EIO))
                }
            };

            deliveries.push(Delivery {
                completion: follower.completion,
                fills,
                errno,
            });
        }

        Some(deliveries)
    }
}

impl SubmitQueue {
    /// True if at least one completion is ready; never blocks
    pub fn peek_completions(&self) -> bool {
        self.state.lock().ring.peek()
    }

    /// Process every completion that is ready now, returning how many
    pub fn reap_completions(&self) -> u32 {
        let mut reaped = 0;
        let mut delivered = false;

        loop {
            let deliveries = {
                let mut state = self.state.lock();
                if std::mem::take(&mut delivered) {
                    self.progress.notify_all();
                }

                let Some(cqe) = state.ring.pop() else {
                    break;
                };
                state.dispatch(cqe)
            };

            let Some(deliveries) = deliveries else {
                continue;
            };

            for delivery in deliveries {
                delivery.deliver();
            }

            if self
                .in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                tracing::error!("in-flight counter would go negative");
                debug_assert!(false, "in-flight counter underflow");
            }
            delivered = true;
            reaped += 1;
        }

        reaped
    }

    /// Wait for completions, then reap whatever is ready
    ///
    /// Returns `Ok(0)` without blocking when nothing is in flight. When every
    /// remaining submission has already been popped by another thread, waits
    /// for that thread to finish delivering instead of waiting on the ring.
    /// Either wait gives up after `WAIT_SLICE`, so callers loop on their
    /// own completion condition.
    pub fn wait_and_reap(&self) -> Result<u32> {
        let fd = {
            let mut state = self.state.lock();

            if state.ring.unreaped() == 0 {
                if self.in_flight() > 0 {
                    self.progress.wait_for(&mut state, WAIT_SLICE);
                }
                return Ok(0);
            }

            if state.ring.peek() {
                None
            } else {
                match state.ring.completion_fd() {
                    Some(fd) => {
                        // Entries left queued by a failed flush must reach
                        // the kernel before anyone sleeps on them
                        state.ring.submit().map_err(RingKvError::Submit)?;
                        Some(fd)
                    }
                    None => {
                        state.ring.wait(1).map_err(RingKvError::Io)?;
                        None
                    }
                }
            }
        };

        if let Some(fd) = fd {
            poll_readable(fd, WAIT_SLICE)?;
        }
        Ok(self.reap_completions())
    }
}

/// Longest a single wait blocks before its caller re-checks
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Sleep until `fd` is readable or `timeout` passes
///
/// Runs without the driver lock: another thread may pop the completion that
/// made the descriptor readable, in which case the timeout bounds the sleep.
fn poll_readable(fd: RawFd, timeout: Duration) -> Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: `pfd` is a single valid pollfd for the duration of the call.
    let n = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(RingKvError::Io(err));
        }
    }
    Ok(())
}
