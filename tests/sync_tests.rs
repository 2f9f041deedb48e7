//! Offline Sync Tests
//!
//! Tests for the pending-write log and sync coordinator including:
//! - Queueing while offline and draining on reconnection
//! - Ordering and last-write-wins through the queue
//! - Discarding malformed and rejected entries
//! - Transient failures, cancellation and crash resumption
//! - At most one concurrent flush

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use carepoint::connectivity::{Connectivity, ConnectivityMonitor};
use carepoint::storage::{RecordId, RecordStore, WriteOp};
use carepoint::sync::{
    FlushOutcome, PendingLog, PendingWrite, QueueConfig, QueueStats, RemoteEndpoint, RemoteError,
    SyncCoordinator, WriteGate, WriteOutcome,
};
use carepoint::CareError;

/// Remote endpoint that records what it receives and can be told to fail
#[derive(Default)]
struct TestRemote {
    pushed: Mutex<Vec<u64>>,
    down: AtomicBool,
    /// Go down after this many successful pushes
    fail_after: Option<usize>,
    reject_collection: Option<String>,
    delay: Option<Duration>,
    /// Set to true after this many successful pushes
    cancel_after: Option<(usize, watch::Sender<bool>)>,
}

impl TestRemote {
    fn pushed(&self) -> Vec<u64> {
        self.pushed.lock().clone()
    }
}

#[async_trait]
impl RemoteEndpoint for TestRemote {
    async fn push(&self, write: &PendingWrite) -> Result<(), RemoteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("connection refused".to_string()));
        }
        if self.reject_collection.as_deref() == Some(write.collection.as_str()) {
            return Err(RemoteError::Permanent("collection not accepted".to_string()));
        }

        let mut pushed = self.pushed.lock();
        if self.fail_after.is_some_and(|n| pushed.len() >= n) {
            return Err(RemoteError::Transient("connection reset".to_string()));
        }
        pushed.push(write.sequence);
        if let Some((n, cancel)) = &self.cancel_after {
            if pushed.len() == *n {
                let _ = cancel.send(true);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "test"
    }
}

fn open_log(dir: &TempDir) -> PendingLog {
    let store = RecordStore::open(dir.path()).expect("Failed to open record store");
    PendingLog::open(store, QueueConfig::default()).expect("Failed to open pending log")
}

fn setup(
    remote: Option<Arc<TestRemote>>,
    initial: Connectivity,
) -> (TempDir, RecordStore, Arc<SyncCoordinator>, WriteGate) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let log = open_log(&tmp_dir);
    let store = log.store().clone();
    let remote = remote.map(|r| r as Arc<dyn RemoteEndpoint>);
    let coordinator = Arc::new(SyncCoordinator::new(log, remote));
    let monitor = Arc::new(ConnectivityMonitor::new(initial));
    let gate = WriteGate::new(monitor, coordinator.clone());
    (tmp_dir, store, coordinator, gate)
}

fn reading(value: u32) -> WriteOp {
    WriteOp::Upsert {
        record: json!({"type": "heartRate", "value": value, "date": "2026-03-01"}),
    }
}

fn profile(age: &str) -> WriteOp {
    WriteOp::Upsert {
        record: json!({"id": "userProfile", "age": age, "gender": "male"}),
    }
}

async fn values(store: &RecordStore) -> Vec<u64> {
    store
        .get_all("observations")
        .await
        .unwrap()
        .iter()
        .map(|r| r.data["value"].as_u64().unwrap())
        .collect()
}

// ============================================================================
// Offline Queueing
// ============================================================================

#[tokio::test]
async fn test_offline_writes_are_queued_not_applied() {
    let (_tmp, store, coordinator, gate) = setup(None, Connectivity::Offline);

    for v in [60, 61, 62] {
        let outcome = gate.submit("observations", reading(v)).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued { .. }));
    }

    assert_eq!(store.count("observations").await.unwrap(), 0);
    assert_eq!(coordinator.pending().len().unwrap(), 3);
}

#[tokio::test]
async fn test_reconnection_flushes_in_order() {
    let (_tmp, store, coordinator, gate) = setup(None, Connectivity::Offline);
    let monitor = gate.monitor().clone();
    let mut reports = coordinator.subscribe();
    let task = coordinator.clone().start(monitor.subscribe());

    for v in [60, 61, 62, 63] {
        gate.submit("observations", reading(v)).await.unwrap();
    }

    assert!(monitor.signal_online().is_some());
    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("flush should run after reconnection")
        .unwrap();

    assert_eq!(report.outcome, FlushOutcome::Complete);
    assert_eq!(report.applied, 4);
    assert!(report.discarded.is_empty());
    assert_eq!(values(&store).await, vec![60, 61, 62, 63]);
    assert!(coordinator.pending().is_empty().unwrap());

    task.abort();
}

#[tokio::test]
async fn test_repeated_online_signal_does_not_flush_again() {
    let (_tmp, _store, coordinator, gate) = setup(None, Connectivity::Offline);
    let monitor = gate.monitor().clone();
    let mut reports = coordinator.subscribe();
    let task = coordinator.clone().start(monitor.subscribe());

    gate.submit("observations", reading(70)).await.unwrap();
    monitor.signal_online();
    assert!(monitor.signal_online().is_none());

    tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_millis(200), reports.recv()).await;
    assert!(second.is_err(), "only one flush should run");

    task.abort();
}

#[tokio::test]
async fn test_last_write_wins_through_queue() {
    let (_tmp, store, coordinator, gate) = setup(None, Connectivity::Offline);

    gate.submit("profile", profile("teen")).await.unwrap();
    gate.submit("profile", profile("adult")).await.unwrap();
    gate.submit("profile", profile("elderly")).await.unwrap();

    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.applied, 3);

    let record = store
        .get("profile", &RecordId::from("userProfile"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.data["age"], "elderly");
    assert_eq!(store.count("profile").await.unwrap(), 1);
}

#[tokio::test]
async fn test_online_write_waits_behind_queue() {
    let (_tmp, store, coordinator, gate) = setup(None, Connectivity::Offline);

    gate.submit("profile", profile("teen")).await.unwrap();
    // Online without the reconnection task: the queue is still full
    gate.monitor().signal_online();

    let outcome = gate.submit("profile", profile("adult")).await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Queued { .. }));
    assert!(coordinator.pending().is_empty().unwrap());

    let record = store
        .get("profile", &RecordId::from("userProfile"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.data["age"], "adult");
}

#[tokio::test]
async fn test_online_write_applies_directly() {
    let remote = Arc::new(TestRemote::default());
    let (_tmp, store, coordinator, gate) = setup(Some(remote.clone()), Connectivity::Online);

    let outcome = gate.submit("observations", reading(80)).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Applied { id: RecordId::Seq(1) });
    assert_eq!(values(&store).await, vec![80]);
    assert_eq!(remote.pushed().len(), 1);
    assert!(coordinator.pending().is_empty().unwrap());

    let outcome = gate
        .submit("observations", WriteOp::Delete { id: RecordId::Seq(9) })
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Removed { existed: false });
}

#[tokio::test]
async fn test_online_write_queued_when_remote_unreachable() {
    let remote = Arc::new(TestRemote::default());
    remote.down.store(true, Ordering::SeqCst);
    let (_tmp, store, coordinator, gate) = setup(Some(remote.clone()), Connectivity::Online);

    let outcome = gate.submit("observations", reading(80)).await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Queued { .. }));
    assert_eq!(store.count("observations").await.unwrap(), 0);

    remote.down.store(false, Ordering::SeqCst);
    let report = coordinator.flush().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(values(&store).await, vec![80]);
}

#[tokio::test]
async fn test_online_write_rejected_by_remote() {
    let remote = Arc::new(TestRemote {
        reject_collection: Some("observations".to_string()),
        ..Default::default()
    });
    let (_tmp, store, _coordinator, gate) = setup(Some(remote), Connectivity::Online);

    let err = gate.submit("observations", reading(80)).await.unwrap_err();
    assert!(matches!(err, CareError::Remote(RemoteError::Permanent(_))));
    assert_eq!(store.count("observations").await.unwrap(), 0);
}

// ============================================================================
// Discards
// ============================================================================

#[tokio::test]
async fn test_malformed_entry_discarded_once() {
    let (_tmp, store, coordinator, _gate) = setup(None, Connectivity::Offline);

    coordinator.enqueue("observations", reading(1)).unwrap();
    let bad = coordinator
        .enqueue("observations", WriteOp::Upsert { record: json!("not an object") })
        .unwrap();
    coordinator.enqueue("observations", reading(2)).unwrap();

    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::Complete);
    assert_eq!(report.applied, 2);
    assert_eq!(report.discarded.len(), 1);
    assert_eq!(report.discarded[0].sequence, bad.sequence);
    assert_eq!(report.discarded[0].collection.as_deref(), Some("observations"));
    assert_eq!(values(&store).await, vec![1, 2]);
    assert!(coordinator.pending().is_empty().unwrap());

    // Nothing left to discard on a second run
    let again = coordinator.flush().await.unwrap();
    assert!(again.discarded.is_empty());
    assert_eq!(again.applied, 0);
}

#[tokio::test]
async fn test_unknown_collection_discarded() {
    let (_tmp, _store, coordinator, _gate) = setup(None, Connectivity::Offline);

    coordinator
        .enqueue("vitals", WriteOp::Upsert { record: json!({"id": "x"}) })
        .unwrap();
    coordinator.enqueue("observations", reading(5)).unwrap();

    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.discarded.len(), 1);
    assert!(report.discarded[0].reason.contains("vitals"));
}

#[tokio::test]
async fn test_permanent_rejection_discarded_and_flush_continues() {
    let remote = Arc::new(TestRemote {
        reject_collection: Some("communityPosts".to_string()),
        ..Default::default()
    });
    let (_tmp, store, coordinator, _gate) = setup(Some(remote.clone()), Connectivity::Offline);

    coordinator.enqueue("observations", reading(1)).unwrap();
    coordinator
        .enqueue("communityPosts", WriteOp::Upsert { record: json!({"content": "hi"}) })
        .unwrap();
    coordinator.enqueue("observations", reading(2)).unwrap();

    let report = coordinator.flush().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.applied, 2);
    assert_eq!(report.discarded.len(), 1);
    assert_eq!(store.count("communityPosts").await.unwrap(), 0);
    assert_eq!(remote.pushed(), vec![1, 3]);
}

// ============================================================================
// Transient Failures
// ============================================================================

#[tokio::test]
async fn test_transient_failure_halts_flush() {
    let remote = Arc::new(TestRemote::default());
    remote.down.store(true, Ordering::SeqCst);
    let (_tmp, store, coordinator, _gate) = setup(Some(remote.clone()), Connectivity::Offline);

    for v in [1, 2, 3] {
        coordinator.enqueue("observations", reading(v)).unwrap();
    }

    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::SyncIncomplete { remaining: 3 });
    assert_eq!(report.applied, 0);
    assert_eq!(store.count("observations").await.unwrap(), 0);

    remote.down.store(false, Ordering::SeqCst);
    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::Complete);
    assert_eq!(values(&store).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_crash_mid_flush_resumes_with_remaining() {
    const TOTAL: u32 = 6;
    const APPLIED_BEFORE_CRASH: usize = 2;

    let tmp_dir = TempDir::new().unwrap();
    {
        let log = open_log(&tmp_dir);
        let remote = Arc::new(TestRemote {
            fail_after: Some(APPLIED_BEFORE_CRASH),
            ..Default::default()
        });
        let coordinator = SyncCoordinator::new(log, Some(remote as Arc<dyn RemoteEndpoint>));
        for v in 0..TOTAL {
            coordinator.enqueue("observations", reading(v)).unwrap();
        }

        let report = coordinator.flush().await.unwrap();
        assert_eq!(report.applied, APPLIED_BEFORE_CRASH);
        assert_eq!(
            report.outcome,
            FlushOutcome::SyncIncomplete {
                remaining: TOTAL as usize - APPLIED_BEFORE_CRASH
            }
        );
        // Process goes away here
    }

    let log = open_log(&tmp_dir);
    let store = log.store().clone();
    assert_eq!(log.len().unwrap(), TOTAL as usize - APPLIED_BEFORE_CRASH);

    let remote = Arc::new(TestRemote::default());
    let coordinator = SyncCoordinator::new(log, Some(remote.clone() as Arc<dyn RemoteEndpoint>));
    let report = coordinator.flush().await.unwrap();

    assert_eq!(report.applied, TOTAL as usize - APPLIED_BEFORE_CRASH);
    assert_eq!(remote.pushed(), vec![3, 4, 5, 6]);
    assert_eq!(values(&store).await, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_sequences_continue_after_reopen() {
    let tmp_dir = TempDir::new().unwrap();
    {
        let log = open_log(&tmp_dir);
        log.append("observations", reading(1)).unwrap();
        log.append("observations", reading(2)).unwrap();
    }

    let log = open_log(&tmp_dir);
    let next = log.append("observations", reading(3)).unwrap();
    assert_eq!(next.sequence, 3);
    let sequences: Vec<u64> = log.entries().unwrap().iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_before_flush_keeps_everything_queued() {
    let (_tmp, store, coordinator, _gate) = setup(None, Connectivity::Offline);
    coordinator.enqueue("observations", reading(1)).unwrap();

    let (_tx, rx) = watch::channel(true);
    let report = coordinator.flush_with_cancel(rx).await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::Cancelled { remaining: 1 });
    assert_eq!(store.count("observations").await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_mid_flush_stops_after_current_entry() {
    let (tx, rx) = watch::channel(false);
    let remote = Arc::new(TestRemote {
        cancel_after: Some((2, tx)),
        ..Default::default()
    });
    let (_tmp, store, coordinator, _gate) = setup(Some(remote), Connectivity::Offline);
    for v in [1, 2, 3, 4, 5] {
        coordinator.enqueue("observations", reading(v)).unwrap();
    }

    let report = coordinator.flush_with_cancel(rx).await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::Cancelled { remaining: 3 });
    assert_eq!(report.applied, 2);
    assert_eq!(values(&store).await, vec![1, 2]);

    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.applied, 3);
    assert_eq!(values(&store).await, vec![1, 2, 3, 4, 5]);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_flush_drains_once() {
    let remote = Arc::new(TestRemote {
        delay: Some(Duration::from_millis(10)),
        ..Default::default()
    });
    let (_tmp, store, coordinator, _gate) = setup(Some(remote.clone()), Connectivity::Offline);
    for v in 1..=5 {
        coordinator.enqueue("observations", reading(v)).unwrap();
    }

    let (a, b) = tokio::join!(coordinator.flush(), coordinator.flush());
    let (a, b) = (a.unwrap(), b.unwrap());

    let outcomes = [&a.outcome, &b.outcome];
    assert!(outcomes.contains(&&FlushOutcome::Scheduled));
    assert!(outcomes.contains(&&FlushOutcome::Complete));
    assert_eq!(a.applied + b.applied, 5);

    let pushed = remote.pushed();
    let unique: HashSet<u64> = pushed.iter().copied().collect();
    assert_eq!(pushed.len(), 5);
    assert_eq!(unique.len(), 5);
    assert_eq!(values(&store).await, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_write_during_flush_is_picked_up_by_follow_up_pass() {
    let remote = Arc::new(TestRemote {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let (_tmp, store, coordinator, _gate) = setup(Some(remote), Connectivity::Offline);
    coordinator.enqueue("observations", reading(1)).unwrap();

    let late = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        coordinator.enqueue("observations", reading(2)).unwrap();
        coordinator.flush().await.unwrap()
    };
    let (first, second) = tokio::join!(coordinator.flush(), late);
    let first = first.unwrap();

    assert_eq!(second.outcome, FlushOutcome::Scheduled);
    assert!(first.is_complete());
    assert_eq!(first.applied, 2);
    assert_eq!(values(&store).await, vec![1, 2]);
}

// ============================================================================
// Bounds
// ============================================================================

#[tokio::test]
async fn test_full_queue_rejects_new_writes() {
    let tmp_dir = TempDir::new().unwrap();
    let store = RecordStore::open(tmp_dir.path()).unwrap();
    let log = PendingLog::open(store, QueueConfig::new(2, 1024 * 1024)).unwrap();
    let coordinator = Arc::new(SyncCoordinator::new(log, None));
    let monitor = Arc::new(ConnectivityMonitor::new(Connectivity::Offline));
    let gate = WriteGate::new(monitor, coordinator.clone());

    gate.submit("observations", reading(1)).await.unwrap();
    gate.submit("observations", reading(2)).await.unwrap();
    let err = gate.submit("observations", reading(3)).await.unwrap_err();
    assert!(matches!(err, CareError::QueueFull(_)));

    // Earlier writes are kept
    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.applied, 2);
}

#[tokio::test]
async fn test_flush_frees_queue_capacity() {
    let tmp_dir = TempDir::new().unwrap();
    let store = RecordStore::open(tmp_dir.path()).unwrap();
    let log = PendingLog::open(store, QueueConfig::new(2, 1024 * 1024)).unwrap();
    let coordinator = SyncCoordinator::new(log, None);

    coordinator.enqueue("observations", reading(1)).unwrap();
    coordinator
        .enqueue("observations", WriteOp::Upsert { record: json!("not an object") })
        .unwrap();
    assert_eq!(coordinator.pending().stats().unwrap().count, 2);

    let report = coordinator.flush().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.discarded.len(), 1);
    assert_eq!(coordinator.pending().stats().unwrap(), QueueStats::default());

    coordinator.enqueue("observations", reading(2)).unwrap();
    coordinator.enqueue("observations", reading(3)).unwrap();
    assert_eq!(coordinator.pending().len().unwrap(), 2);
}
