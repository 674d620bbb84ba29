//! Ring-backed read path
//!
//! ## Components
//! - [`Ring`]: the submission/completion queue pair ([`KernelRing`] on Linux,
//!   [`InProcessRing`] everywhere)
//! - [`PendingIo`]: the coalescer's map of reads already in flight
//! - [`SubmitQueue`]: turns a read request into one ring entry and a
//!   [`ReadFuture`], and dispatches completions back to suspended reads
//!
//! ## Flow
//!
//! ```text
//!   read(fd, off, lens) ──► plan ──► push ──► submit ──► commit ──► ReadFuture
//!                                                                       ▲
//!   reap_completions ──► pop ──► dispatch ──► release ──► deliver ──────┘
//! ```

mod coalescer;
mod context;
mod dispatch;
#[cfg(target_os = "linux")]
mod kernel;
mod ring;
mod submit;

pub use coalescer::{Extent, PendingIo, PendingIoKey};
pub use context::Token;
#[cfg(target_os = "linux")]
pub use kernel::KernelRing;
pub use ring::{Completion, InProcessRing, Ring, RingFull, SqEntry};
pub use submit::{ReadFuture, SubmitQueue};
