//! Tests for AsyncReader
//!
//! These tests verify:
//! - End-to-end lookups over a real store (found, missing, tombstoned)
//! - Read-option forcing (persisted tier only, checksums always verified)
//! - Coalescing of concurrent lookups for the same key
//! - Status mapping for queue-full, submit and completion failures
//! - Resolution both by blocking and by awaiting
//! - Lookups started, reaped and resolved from several threads

mod common;

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{store_with, test_config, ScriptHandle, ScriptedRing};
use futures::executor::block_on;
use futures::future::BoxFuture;
use futures::FutureExt;
use ringkv::uring::{InProcessRing, Ring};
use ringkv::{
    AsyncReader, AsyncStore, Code, PinnedBuffer, ReadOptions, ReadTier, Status, Store, SubCode,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn in_process_reader(store: Store) -> AsyncReader {
    let config = store.config().clone();
    AsyncReader::from_config(Arc::new(store), &config).unwrap()
}

fn scripted_reader(store: Store, capacity: u32) -> (AsyncReader, ScriptHandle) {
    let (ring, handle) = ScriptedRing::new(capacity);
    (AsyncReader::with_ring(Arc::new(store), Box::new(ring)), handle)
}

fn drain(reader: &AsyncReader) {
    while reader.pending_submission_count() > 0 {
        reader.reap_completions();
    }
}

fn sstable_path(dir: &TempDir) -> std::path::PathBuf {
    std::fs::read_dir(dir.path().join("sstables"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().map_or(false, |e| e == "sst"))
        .unwrap()
}

// =============================================================================
// End-to-end
// =============================================================================

#[test]
fn test_lookup_existing_and_missing_keys() {
    let temp = TempDir::new().unwrap();
    let reader = in_process_reader(store_with(&temp, &[("k1", "v1")]));

    let found = reader.get(&ReadOptions::default(), b"k1");
    drain(&reader);
    let (status, value) = found.resolve();
    assert!(status.is_ok(), "unexpected status: {}", status);
    assert_eq!(&value[..], b"v1");

    let missing = reader.get(&ReadOptions::default(), b"missing");
    drain(&reader);
    let (status, value) = missing.resolve();
    assert!(status.is_not_found());
    assert!(value.is_empty());

    assert_eq!(reader.pending_submission_count(), 0);
    assert_eq!(reader.pending_keys(), 0);
}

#[test]
fn test_lookup_is_not_finished_before_reaping() {
    let temp = TempDir::new().unwrap();
    let (reader, ring) = scripted_reader(store_with(&temp, &[("k1", "v1")]), 8);

    let lookup = reader.get(&ReadOptions::default(), b"k1");
    assert!(!lookup.is_ready());
    assert_eq!(reader.pending_submission_count(), 1);
    assert!(!reader.peek_completions());

    ring.complete_all();
    assert!(reader.peek_completions());
    assert_eq!(reader.reap_completions(), 1);
    assert!(lookup.is_ready());

    let (status, value) = lookup.resolve();
    assert!(status.is_ok());
    assert_eq!(&value[..], b"v1");
}

#[test]
fn test_resolve_drives_the_ring_itself() {
    let temp = TempDir::new().unwrap();
    let (reader, _ring) = scripted_reader(store_with(&temp, &[("k1", "v1")]), 8);

    let (status, value) = reader.get(&ReadOptions::default(), b"k1").resolve();
    assert!(status.is_ok());
    assert_eq!(&value[..], b"v1");
    assert_eq!(reader.pending_submission_count(), 0);
}

#[test]
fn test_many_keys() {
    let temp = TempDir::new().unwrap();
    let pairs: Vec<(String, String)> = (0..50)
        .map(|i| (format!("key{:03}", i), format!("value{}", i)))
        .collect();
    let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let reader = in_process_reader(store_with(&temp, &refs));

    let lookups: Vec<_> = pairs
        .iter()
        .map(|(k, _)| reader.get(&ReadOptions::default(), k.as_bytes()))
        .collect();
    drain(&reader);

    for ((_, expected), lookup) in pairs.iter().zip(lookups) {
        let (status, value) = lookup.resolve();
        assert!(status.is_ok());
        assert_eq!(&value[..], expected.as_bytes());
    }
}

#[test]
fn test_tombstone_in_newer_table_hides_older_value() {
    let temp = TempDir::new().unwrap();
    let store = store_with(&temp, &[("k1", "v1")]);
    store.delete(b"k1").unwrap();
    store.flush().unwrap();
    assert_eq!(store.sstable_count(), 2);

    let reader = in_process_reader(store);
    let lookup = reader.get(&ReadOptions::default(), b"k1");
    drain(&reader);
    assert!(lookup.resolve().0.is_not_found());
}

#[test]
fn test_lookup_falls_through_to_older_table() {
    let temp = TempDir::new().unwrap();
    let store = store_with(&temp, &[("b", "old")]);
    store.put(b"a", b"1").unwrap();
    store.put(b"c", b"3").unwrap();
    store.flush().unwrap();

    // The newer table's key range covers "b" but its index does not
    let reader = in_process_reader(store);
    let lookup = reader.get(&ReadOptions::default(), b"b");
    drain(&reader);

    let (status, value) = lookup.resolve();
    assert!(status.is_ok());
    assert_eq!(&value[..], b"old");
}

// =============================================================================
// Read options
// =============================================================================

#[test]
fn test_setup_read_options_forces_persisted_tier_and_checksums() {
    let temp = TempDir::new().unwrap();
    let reader = in_process_reader(store_with(&temp, &[("k1", "v1")]));

    let caller = ReadOptions {
        read_tier: ReadTier::All,
        verify_checksums: false,
        submit_queue: None,
    };
    let opts = reader.setup_read_options(&caller);

    assert_eq!(opts.read_tier, ReadTier::PersistedOnly);
    assert!(opts.verify_checksums);
    assert!(opts
        .submit_queue
        .as_ref()
        .map_or(false, |q| Arc::ptr_eq(q, reader.submit_queue())));
}

#[test]
fn test_memtable_only_key_is_not_visible() {
    let temp = TempDir::new().unwrap();
    let store = store_with(&temp, &[("k1", "v1")]);
    store.put(b"k2", b"unflushed").unwrap();
    assert_eq!(store.get(b"k2").unwrap(), Some(b"unflushed".to_vec()));

    let reader = in_process_reader(store);
    let lookup = reader.get(
        &ReadOptions {
            read_tier: ReadTier::All,
            ..ReadOptions::default()
        },
        b"k2",
    );
    drain(&reader);
    assert!(lookup.resolve().0.is_not_found());
}

#[test]
fn test_checksum_mismatch_is_reported_as_corruption() {
    let temp = TempDir::new().unwrap();
    let store = store_with(&temp, &[("k1", "v1")]);

    // Header (14) + entry header (12) + key (2): first value byte
    let file = OpenOptions::new()
        .write(true)
        .open(sstable_path(&temp))
        .unwrap();
    file.write_all_at(b"X", 28).unwrap();
    file.sync_all().unwrap();

    let reader = in_process_reader(store);
    let lookup = reader.get(
        &ReadOptions {
            verify_checksums: false,
            ..ReadOptions::default()
        },
        b"k1",
    );
    drain(&reader);

    let (status, value) = lookup.resolve();
    assert_eq!(status.code, Code::Corruption);
    assert!(value.is_empty());
}

// =============================================================================
// Coalescing through the reader
// =============================================================================

#[test]
fn test_concurrent_lookups_of_one_key_share_a_read() {
    let temp = TempDir::new().unwrap();
    let (reader, ring) = scripted_reader(store_with(&temp, &[("k1", "v1")]), 8);

    let first = reader.get(&ReadOptions::default(), b"k1");
    let second = reader.get(&ReadOptions::default(), b"k1");

    assert_eq!(ring.readv_count(), 1);
    assert_eq!(ring.nop_count(), 1);
    assert_eq!(reader.pending_keys(), 1);

    ring.complete_all();
    assert_eq!(reader.reap_completions(), 2);

    for lookup in [first, second] {
        let (status, value) = lookup.resolve();
        assert!(status.is_ok());
        assert_eq!(&value[..], b"v1");
    }
    assert_eq!(reader.pending_keys(), 0);
    assert_eq!(reader.pending_submission_count(), 0);
}

// =============================================================================
// Failure statuses
// =============================================================================

#[test]
fn test_queue_full_status() {
    let temp = TempDir::new().unwrap();
    let (reader, ring) = scripted_reader(store_with(&temp, &[("k1", "v1"), ("k2", "v2")]), 1);

    let held = reader.get(&ReadOptions::default(), b"k1");
    let rejected = reader.get(&ReadOptions::default(), b"k2");

    assert!(rejected.is_ready());
    let (status, value) = rejected.resolve();
    assert_eq!(status.code, Code::IoError);
    assert_eq!(status.sub_code, SubCode::IoUringSqeFull);
    assert!(value.is_empty());

    // Only the first lookup's read is tracked
    assert_eq!(reader.pending_keys(), 1);
    assert_eq!(reader.pending_submission_count(), 1);

    ring.complete_all();
    reader.reap_completions();
    assert!(held.resolve().0.is_ok());

    // Retrying once the ring has room succeeds
    let retry = reader.get(&ReadOptions::default(), b"k2");
    ring.complete_all();
    reader.reap_completions();
    let (status, value) = retry.resolve();
    assert!(status.is_ok());
    assert_eq!(&value[..], b"v2");
}

#[test]
fn test_submit_error_status() {
    let temp = TempDir::new().unwrap();
    let (reader, ring) = scripted_reader(store_with(&temp, &[("k1", "v1")]), 4);

    ring.fail_next_submit(libc::EBUSY);
    let lookup = reader.get(&ReadOptions::default(), b"k1");
    assert!(lookup.is_ready());

    let (status, _) = lookup.resolve();
    assert_eq!(status.code, Code::IoError);
    assert_eq!(status.sub_code, SubCode::IoUringSubmitError);
    assert!(status.message.is_some());

    // The stranded entry still drains
    ring.complete_all();
    let _ = reader.submit_queue().wait_and_reap().unwrap();
    assert_eq!(reader.pending_submission_count(), 0);
}

#[test]
fn test_completion_error_status() {
    let temp = TempDir::new().unwrap();
    let (reader, ring) = scripted_reader(store_with(&temp, &[("k1", "v1")]), 4);

    let lookup = reader.get(&ReadOptions::default(), b"k1");
    ring.fail_next_completion(libc::EIO);
    ring.complete_all();
    reader.reap_completions();

    let (status, value) = lookup.resolve();
    assert_eq!(status.code, Code::IoError);
    assert_eq!(status.sub_code, SubCode::IoUringCompletionError);
    assert!(value.is_empty());
}

// =============================================================================
// Futures
// =============================================================================

#[test]
fn test_lookups_can_be_awaited_together() {
    let temp = TempDir::new().unwrap();
    let reader = in_process_reader(store_with(&temp, &[("k1", "v1"), ("k2", "v2")]));

    let a = reader.get(&ReadOptions::default(), b"k1");
    let b = reader.get(&ReadOptions::default(), b"k2");
    let c = reader.get(&ReadOptions::default(), b"nope");

    let ((sa, va), (sb, vb), (sc, _)) = block_on(futures::future::join3(a, b, c));
    assert!(sa.is_ok());
    assert_eq!(&va[..], b"v1");
    assert!(sb.is_ok());
    assert_eq!(&vb[..], b"v2");
    assert!(sc.is_not_found());
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_from_config_rejects_zero_capacity() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(test_config(&temp)).unwrap();
    let mut config = test_config(&temp);
    config.ring_capacity = 0;

    assert!(AsyncReader::from_config(Arc::new(store), &config).is_err());
}

#[test]
fn test_with_ring_reports_capacity() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(test_config(&temp)).unwrap();
    let reader = AsyncReader::with_ring(Arc::new(store), Box::new(InProcessRing::new(32)));
    assert_eq!(reader.submit_queue().capacity(), 32);
    assert_eq!(reader.pending_submission_count(), 0);
}

#[test]
fn test_dropping_reader_with_reads_in_flight_does_not_crash() {
    let temp = TempDir::new().unwrap();
    let (reader, ring) = scripted_reader(store_with(&temp, &[("k1", "v1")]), 4);

    let lookup = reader.get(&ReadOptions::default(), b"k1");
    assert_eq!(ring.outstanding(), 1);
    drop(lookup);
    drop(reader);
}

#[test]
fn test_kernel_ring_lookup() {
    let temp = TempDir::new().unwrap();
    let store = store_with(&temp, &[("k1", "v1")]);

    let reader = match AsyncReader::new(Arc::new(store), 64) {
        Ok(reader) => reader,
        Err(e) => {
            eprintln!("skipping: io_uring unavailable ({})", e);
            return;
        }
    };

    let found = reader.get(&ReadOptions::default(), b"k1");
    let missing = reader.get(&ReadOptions::default(), b"missing");

    let (status, value) = found.resolve();
    assert!(status.is_ok(), "unexpected status: {}", status);
    assert_eq!(&value[..], b"v1");
    assert!(missing.resolve().0.is_not_found());
    assert_eq!(reader.pending_submission_count(), 0);
}

// =============================================================================
// Several threads
// =============================================================================

/// A store whose lookups, once their read has been delivered, hold the
/// delivering thread until released
struct GatedStore {
    inner: Store,
    delivered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl AsyncStore for GatedStore {
    fn async_get(
        &self,
        opts: &ReadOptions,
        key: &[u8],
        value: PinnedBuffer,
    ) -> BoxFuture<'static, Status> {
        let lookup = self.inner.async_get(opts, key, value);
        let delivered = Arc::clone(&self.delivered);
        let release = Arc::clone(&self.release);
        async move {
            let status = lookup.await;
            delivered.wait();
            release.wait();
            status
        }
        .boxed()
    }
}

fn resolve_while_another_thread_delivers(ring: Box<dyn Ring>) {
    let temp = TempDir::new().unwrap();
    let delivered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let store = GatedStore {
        inner: store_with(&temp, &[("k1", "v1")]),
        delivered: Arc::clone(&delivered),
        release: Arc::clone(&release),
    };
    let reader = Arc::new(AsyncReader::with_ring(Arc::new(store), ring));

    let lookup = reader.get(&ReadOptions::default(), b"k1");
    assert_eq!(reader.pending_submission_count(), 1);

    let reaper = {
        let reader = Arc::clone(&reader);
        thread::spawn(move || {
            while reader.submit_queue().wait_and_reap().unwrap() == 0 {}
        })
    };

    // The completion has been popped and is being delivered on the reaper
    delivered.wait();
    assert_eq!(reader.pending_submission_count(), 1);

    let resolver = thread::spawn(move || lookup.resolve());
    thread::sleep(Duration::from_millis(100));
    assert!(!resolver.is_finished());

    release.wait();
    let (status, value) = resolver.join().unwrap();
    reaper.join().unwrap();

    assert!(status.is_ok(), "unexpected status: {}", status);
    assert_eq!(&value[..], b"v1");
    assert_eq!(reader.pending_submission_count(), 0);

    assert_eq!(reader.pending_keys(), 0);
    assert_eq!(reader.submit_queue().capacity(), 4);
}

#[test]
fn test_resolve_waits_for_delivery_on_another_thread() {
    let (ring, _handle) = ScriptedRing::new(4);
    resolve_while_another_thread_delivers(Box::new(ring));
}

#[test]
#[cfg(target_os = "linux")]
fn test_kernel_resolve_waits_for_delivery_on_another_thread() {
    match ringkv::uring::KernelRing::new(4) {
        Ok(ring) => resolve_while_another_thread_delivers(Box::new(ring)),
        Err(e) => eprintln!("skipping: io_uring unavailable ({})", e),
    }
}

fn lookups_from_several_threads(reader: AsyncReader) {
    let reader = Arc::new(reader);

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let reader = Arc::clone(&reader);
            thread::spawn(move || {
                for round in 0..25 {
                    let i = (t * 7 + round) % 8;
                    let key = format!("k{}", i);
                    let lookup = reader.get(&ReadOptions::default(), key.as_bytes());
                    let (status, value) = lookup.resolve();
                    assert!(status.is_ok(), "{}: {}", key, status);
                    assert_eq!(&value[..], format!("v{}", i).as_bytes());
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(reader.pending_submission_count(), 0);
    assert_eq!(reader.pending_keys(), 0);
}

fn eight_keys(temp: &TempDir) -> Store {
    store_with(
        temp,
        &[
            ("k0", "v0"),
            ("k1", "v1"),
            ("k2", "v2"),
            ("k3", "v3"),
            ("k4", "v4"),
            ("k5", "v5"),
            ("k6", "v6"),
            ("k7", "v7"),
        ],
    )
}

#[test]
fn test_lookups_from_several_threads() {
    let temp = TempDir::new().unwrap();
    lookups_from_several_threads(in_process_reader(eight_keys(&temp)));
}

#[test]
#[cfg(target_os = "linux")]
fn test_kernel_lookups_from_several_threads() {
    let temp = TempDir::new().unwrap();
    match AsyncReader::new(Arc::new(eight_keys(&temp)), 64) {
        Ok(reader) => lookups_from_several_threads(reader),
        Err(e) => eprintln!("skipping: io_uring unavailable ({})", e),
    }
}
