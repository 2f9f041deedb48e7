//! Sync coordinator
//!
//! Drains the pending-write log into the record store (and the remote
//! endpoint, when one is configured) whenever connectivity comes back.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::log::{PendingLog, PendingWrite};
use super::remote::RemoteEndpoint;
use crate::connectivity::ConnectivityEvent;
use crate::error::CareResult;
use crate::storage::{Applied, RecordId, RecordStore, WriteOp};

/// How a flush ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// The log was drained
    Complete,
    /// Halted on a transient failure; the failed entry and everything after
    /// it are still queued
    SyncIncomplete { remaining: usize },
    /// Stopped by the caller's cancellation signal
    Cancelled { remaining: usize },
    /// Another flush was already running; it will make a follow-up pass
    Scheduled,
}

/// Diagnostic for an entry dropped because it can never be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncItemDiscarded {
    pub sequence: u64,
    pub collection: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub outcome: FlushOutcome,
    pub applied: usize,
    pub discarded: Vec<SyncItemDiscarded>,
}

impl SyncReport {
    fn new(outcome: FlushOutcome) -> Self {
        Self {
            outcome,
            applied: 0,
            discarded: Vec::new(),
        }
    }

    fn absorb(&mut self, pass: SyncReport) {
        self.outcome = pass.outcome;
        self.applied += pass.applied;
        self.discarded.extend(pass.discarded);
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == FlushOutcome::Complete
    }
}

/// Result of a write submitted through the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Stored locally (and mirrored, if a remote is configured)
    Applied { id: RecordId },
    /// Delete applied; `existed` is false when there was nothing to delete
    Removed { existed: bool },
    /// Buffered in the pending log
    Queued { sequence: u64 },
}

pub struct SyncCoordinator {
    store: RecordStore,
    log: PendingLog,
    remote: Option<Arc<dyn RemoteEndpoint>>,
    /// Held for the whole of a drain pass
    flush_lock: Mutex<()>,
    /// Set when a flush is requested while one is running
    rerun: AtomicBool,
    reports: broadcast::Sender<SyncReport>,
}

impl SyncCoordinator {
    pub fn new(log: PendingLog, remote: Option<Arc<dyn RemoteEndpoint>>) -> Self {
        let (reports, _) = broadcast::channel(16);
        Self {
            store: log.store().clone(),
            log,
            remote,
            flush_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
            reports,
        }
    }

    pub fn pending(&self) -> &PendingLog {
        &self.log
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Reports of finished flushes
    pub fn subscribe(&self) -> broadcast::Receiver<SyncReport> {
        self.reports.subscribe()
    }

    /// Append a write to the pending log
    pub fn enqueue(&self, collection: &str, op: WriteOp) -> CareResult<PendingWrite> {
        self.log.append(collection, op)
    }

    /// Apply a write immediately (the online path).
    ///
    /// A transient remote failure falls back to queueing the write, so it is
    /// retried by the next flush; a permanent one is returned to the caller
    /// before anything is stored.
    pub async fn apply_now(&self, collection: &str, op: WriteOp) -> CareResult<WriteOutcome> {
        self.store.validate(collection, &op)?;

        if let Some(remote) = &self.remote {
            let direct = PendingWrite {
                sequence: self.log.reserve_sequence()?,
                collection: collection.to_string(),
                op: op.clone(),
                enqueued_at: chrono::Utc::now(),
            };
            if let Err(e) = remote.push(&direct).await {
                if !e.is_transient() {
                    return Err(e.into());
                }
                warn!("Remote '{}' unavailable ({}), queueing write", remote.name(), e);
                let queued = self.enqueue(collection, op)?;
                return Ok(WriteOutcome::Queued {
                    sequence: queued.sequence,
                });
            }
        }

        Ok(match self.store.apply(collection, &op).await? {
            Applied::Stored(id) => WriteOutcome::Applied { id },
            Applied::Removed(existed) => WriteOutcome::Removed { existed },
        })
    }

    /// Drain the pending log in enqueue order
    pub async fn flush(&self) -> CareResult<SyncReport> {
        self.run_flush(None).await
    }

    /// Like [`flush`](Self::flush), but stops taking new entries once
    /// `cancel` reads `true`. Entries not yet applied stay queued.
    pub async fn flush_with_cancel(&self, cancel: watch::Receiver<bool>) -> CareResult<SyncReport> {
        self.run_flush(Some(&cancel)).await
    }

    /// Spawn the task that flushes on every `Offline -> Online` transition
    pub fn start(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ConnectivityEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectivityEvent::WentOnline) => {
                        info!("Back online - flushing pending writes");
                        if let Err(e) = self.flush().await {
                            warn!("Flush after reconnect failed: {}", e);
                        }
                    }
                    Ok(ConnectivityEvent::WentOffline) => {
                        debug!("Offline - writes will be queued");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} connectivity events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn run_flush(&self, cancel: Option<&watch::Receiver<bool>>) -> CareResult<SyncReport> {
        let mut report: Option<SyncReport> = None;
        loop {
            let guard = match self.flush_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    // Another flush owns the log; make sure it takes one more pass
                    self.rerun.store(true, Ordering::SeqCst);
                    debug!("Flush already running, scheduled a follow-up pass");
                    return Ok(report.unwrap_or_else(|| SyncReport::new(FlushOutcome::Scheduled)));
                }
            };
            self.rerun.store(false, Ordering::SeqCst);
            let pass = self.drain(cancel).await;
            drop(guard);

            let pass = pass?;
            let total = report.get_or_insert_with(|| SyncReport::new(FlushOutcome::Complete));
            total.absorb(pass);

            if !total.is_complete() || !self.rerun.swap(false, Ordering::SeqCst) {
                break;
            }
            debug!("Running follow-up flush pass");
        }

        let report = report.unwrap_or_else(|| SyncReport::new(FlushOutcome::Complete));
        info!(
            "Flush finished: {:?}, {} applied, {} discarded",
            report.outcome,
            report.applied,
            report.discarded.len()
        );
        let _ = self.reports.send(report.clone());
        Ok(report)
    }

    /// One pass over the log, always restarting from the on-disk head
    async fn drain(&self, cancel: Option<&watch::Receiver<bool>>) -> CareResult<SyncReport> {
        let mut report = SyncReport::new(FlushOutcome::Complete);

        loop {
            if cancel.is_some_and(|c| *c.borrow()) {
                let remaining = self.log.len()?;
                info!("Flush cancelled with {} writes still queued", remaining);
                report.outcome = FlushOutcome::Cancelled { remaining };
                return Ok(report);
            }

            let Some(slot) = self.log.head()? else {
                return Ok(report);
            };

            let bytes = slot.bytes;
            let write = match slot.entry {
                Ok(write) => write,
                Err(reason) => {
                    self.discard(&mut report, slot.sequence, None, reason)?;
                    continue;
                }
            };

            match self.apply_entry(&write, bytes).await {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_transient() => {
                    let remaining = self.log.len()?;
                    warn!(
                        "Flush halted at #{} ({}): {} writes remain",
                        write.sequence, e, remaining
                    );
                    report.outcome = FlushOutcome::SyncIncomplete { remaining };
                    return Ok(report);
                }
                Err(e) => {
                    self.discard(
                        &mut report,
                        write.sequence,
                        Some(write.collection.clone()),
                        e.to_string(),
                    )?;
                }
            }
        }
    }

    async fn apply_entry(&self, write: &PendingWrite, bytes: usize) -> CareResult<()> {
        self.store.validate(&write.collection, &write.op)?;

        if let Some(remote) = &self.remote {
            remote.push(write).await?;
        }

        let sequence = write.sequence;
        let applied = self
            .store
            .apply_batched(&write.collection, &write.op, move |db, batch| {
                PendingLog::stage_remove(db, batch, sequence)
            })
            .await?;
        self.log.mark_dequeued(bytes);
        debug!(
            "Applied #{} {} on '{}': {:?}",
            sequence,
            write.op.name(),
            write.collection,
            applied
        );
        Ok(())
    }

    fn discard(
        &self,
        report: &mut SyncReport,
        sequence: u64,
        collection: Option<String>,
        reason: String,
    ) -> CareResult<()> {
        self.log.remove(sequence)?;
        warn!(
            sequence,
            collection = collection.as_deref().unwrap_or("?"),
            "SyncItemDiscarded: {}",
            reason
        );
        report.discarded.push(SyncItemDiscarded {
            sequence,
            collection,
            reason,
        });
        Ok(())
    }
}
