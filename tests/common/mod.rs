//! Shared test fixtures
//!
//! `ScriptedRing` is a `Ring` whose completions are produced only when the
//! test asks for them, in the order the test chooses. Reads are still
//! performed for real with `preadv`, so buffers end up holding file bytes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;
use ringkv::uring::{Completion, Ring, RingFull, SqEntry};
use ringkv::{Config, RingBackend, Store};
use tempfile::TempDir;

/// What a pushed entry looked like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    ReadV { fd: RawFd, offset: u64, iovcnt: u32 },
    Nop,
}

#[derive(Default)]
struct Script {
    capacity: u32,
    queued: VecDeque<SqEntry>,
    /// Handed to the "kernel" but not yet completed
    submitted: VecDeque<SqEntry>,
    ready: VecDeque<Completion>,
    pushed: Vec<Pushed>,
    fail_next_submit: Option<i32>,
    fail_next_completion: Option<i32>,
}

impl Script {
    fn occupied(&self) -> usize {
        self.queued.len() + self.submitted.len() + self.ready.len()
    }

    fn execute(&mut self, entry: SqEntry) {
        let result = match self.fail_next_completion.take() {
            Some(errno) => -errno,
            None => match entry {
                SqEntry::ReadV {
                    fd,
                    iovecs,
                    iovcnt,
                    offset,
                    ..
                } => {
                    let n = unsafe {
                        libc::preadv(fd, iovecs, iovcnt as libc::c_int, offset as libc::off_t)
                    };
                    if n < 0 {
                        -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
                    } else {
                        n as i32
                    }
                }
                SqEntry::Nop { .. } => 0,
            },
        };
        self.ready.push_back(Completion {
            user_data: entry.user_data(),
            result,
        });
    }
}

/// Test-side control over a `ScriptedRing` that has been handed to a reader
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptHandle {
    /// Every entry pushed so far, in order
    pub fn pushed(&self) -> Vec<Pushed> {
        self.script.lock().pushed.clone()
    }

    pub fn readv_count(&self) -> usize {
        self.pushed()
            .iter()
            .filter(|p| matches!(p, Pushed::ReadV { .. }))
            .count()
    }

    pub fn nop_count(&self) -> usize {
        self.pushed().iter().filter(|p| **p == Pushed::Nop).count()
    }

    /// Entries submitted and waiting to complete
    pub fn outstanding(&self) -> usize {
        self.script.lock().submitted.len()
    }

    /// Complete the oldest submitted entry
    pub fn complete_oldest(&self) -> bool {
        let mut script = self.script.lock();
        match script.submitted.pop_front() {
            Some(entry) => {
                script.execute(entry);
                true
            }
            None => false,
        }
    }

    /// Complete the most recently submitted entry
    pub fn complete_newest(&self) -> bool {
        let mut script = self.script.lock();
        match script.submitted.pop_back() {
            Some(entry) => {
                script.execute(entry);
                true
            }
            None => false,
        }
    }

    /// Complete every submitted entry in submission order
    pub fn complete_all(&self) -> usize {
        let mut n = 0;
        while self.complete_oldest() {
            n += 1;
        }
        n
    }

    /// The next flush fails with `errno`
    pub fn fail_next_submit(&self, errno: i32) {
        self.script.lock().fail_next_submit = Some(errno);
    }

    /// The next completed entry reports `-errno` instead of reading
    pub fn fail_next_completion(&self, errno: i32) {
        self.script.lock().fail_next_completion = Some(errno);
    }
}

pub struct ScriptedRing {
    script: Arc<Mutex<Script>>,
}

// SAFETY: the raw iovec pointers in queued entries are kept alive by the
// submitting queue until their completions are popped.
unsafe impl Send for ScriptedRing {}

impl ScriptedRing {
    pub fn new(capacity: u32) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script {
            capacity,
            ..Script::default()
        }));
        (
            Self {
                script: Arc::clone(&script),
            },
            ScriptHandle { script },
        )
    }
}

impl Ring for ScriptedRing {
    fn capacity(&self) -> u32 {
        self.script.lock().capacity
    }

    unsafe fn push(&mut self, entry: &SqEntry) -> Result<(), RingFull> {
        let mut script = self.script.lock();
        if script.occupied() >= script.capacity as usize {
            return Err(RingFull);
        }
        let pushed = match *entry {
            SqEntry::ReadV {
                fd, offset, iovcnt, ..
            } => Pushed::ReadV { fd, offset, iovcnt },
            SqEntry::Nop { .. } => Pushed::Nop,
        };
        script.pushed.push(pushed);
        script.queued.push_back(*entry);
        Ok(())
    }

    fn submit(&mut self) -> io::Result<usize> {
        let mut script = self.script.lock();
        if let Some(errno) = script.fail_next_submit.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let n = script.queued.len();
        while let Some(entry) = script.queued.pop_front() {
            script.submitted.push_back(entry);
        }
        Ok(n)
    }

    fn peek(&mut self) -> bool {
        !self.script.lock().ready.is_empty()
    }

    fn pop(&mut self) -> Option<Completion> {
        self.script.lock().ready.pop_front()
    }

    fn unreaped(&self) -> u32 {
        self.script.lock().occupied() as u32
    }

    /// Behaves like a kernel that finishes everything it was given
    fn wait(&mut self, min_complete: usize) -> io::Result<()> {
        let mut script = self.script.lock();
        while let Some(entry) = script.queued.pop_front() {
            script.submitted.push_back(entry);
        }
        while script.ready.len() < min_complete {
            match script.submitted.pop_front() {
                Some(entry) => script.execute(entry),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "nothing left to complete",
                    ))
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A temp file holding `contents`, kept open for its descriptor
pub struct TestFile {
    pub file: std::fs::File,
    _dir: TempDir,
}

impl TestFile {
    pub fn new(contents: &[u8]) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        file.sync_all().unwrap();
        let file = std::fs::File::open(&path).unwrap();
        Self { file, _dir: dir }
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .ring_capacity(16)
        .ring_backend(RingBackend::InProcess)
        .build()
}

/// A store whose SSTables hold the given pairs (flushed in one table)
pub fn store_with(dir: &TempDir, pairs: &[(&str, &str)]) -> Store {
    let store = Store::open(test_config(dir)).unwrap();
    for (k, v) in pairs {
        store.put(k.as_bytes(), v.as_bytes()).unwrap();
    }
    store.flush().unwrap();
    store
}
