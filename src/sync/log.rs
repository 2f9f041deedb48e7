//! Pending-write log
//!
//! Ordered, durable log of writes made while offline. Entries live in the
//! `_pending` column family of the record store under zero-padded sequence
//! keys, so iteration order is enqueue order and the head of the log is
//! always the first unapplied write.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{CareError, CareResult};
use crate::storage::engine::PENDING_CF;
use crate::storage::{RecordStore, WriteOp};

const ENTRY_PREFIX: &[u8] = b"pw:";
const SEQ_KEY: &[u8] = b"_stats:sequence";

/// Configuration for the offline queue bounds
///
/// When the queue is full (either by count or bytes), new writes are
/// rejected rather than dropping old ones, so an acknowledged write is
/// never lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending writes (default: 10,000)
    pub max_count: usize,
    /// Maximum total size in bytes of pending write data (default: 100MB)
    pub max_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_count: 10_000,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

impl QueueConfig {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            max_count,
            max_bytes,
        }
    }

    /// Limits for constrained phones
    pub fn mobile() -> Self {
        Self {
            max_count: 1_000,
            max_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn desktop() -> Self {
        Self {
            max_count: 50_000,
            max_bytes: 500 * 1024 * 1024,
        }
    }
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub count: usize,
    pub bytes: usize,
}

/// A buffered mutation awaiting application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub sequence: u64,
    pub collection: String,
    #[serde(flatten)]
    pub op: WriteOp,
    pub enqueued_at: DateTime<Utc>,
}

/// One raw slot of the log. `entry` is an error when the stored bytes no
/// longer decode; such slots are discarded by the coordinator.
#[derive(Debug, Clone)]
pub struct PendingSlot {
    pub sequence: u64,
    /// Stored size, counted against `QueueConfig::max_bytes`
    pub bytes: usize,
    pub entry: Result<PendingWrite, String>,
}

/// Last handed-out sequence and the running size of the log
#[derive(Debug)]
struct Tail {
    sequence: u64,
    stats: QueueStats,
}

/// Persistent pending-write log sharing the record store's RocksDB instance
#[derive(Clone)]
pub struct PendingLog {
    store: RecordStore,
    tail: Arc<Mutex<Tail>>,
    config: QueueConfig,
}

impl PendingLog {
    /// Open the log, recovering the last sequence number and the queue
    /// totals from disk
    pub fn open(store: RecordStore, config: QueueConfig) -> CareResult<Self> {
        let sequence = store.with_db(|db| {
            let cf = pending_cf(db)?;
            match db.get_cf(cf, SEQ_KEY)? {
                Some(bytes) => {
                    let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        CareError::StorageUnavailable("corrupted pending sequence".to_string())
                    })?;
                    Ok(u64::from_be_bytes(arr))
                }
                None => Ok(0),
            }
        })?;

        let stats = scan_stats(&store)?;
        if stats.count > 0 {
            tracing::info!(
                "Recovered {} pending writes ({} bytes)",
                stats.count,
                stats.bytes
            );
        }
        Ok(Self {
            store,
            tail: Arc::new(Mutex::new(Tail { sequence, stats })),
            config,
        })
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Append a write to the tail of the log.
    ///
    /// Rejects the write with `QueueFull` once either bound is reached.
    pub fn append(&self, collection: &str, op: WriteOp) -> CareResult<PendingWrite> {
        let mut tail = self.tail.lock();
        let stats = tail.stats;
        if stats.count >= self.config.max_count {
            tracing::warn!("Pending queue full ({} entries), rejecting write", stats.count);
            return Err(CareError::QueueFull(format!(
                "{} pending writes (limit {})",
                stats.count, self.config.max_count
            )));
        }

        let entry = PendingWrite {
            sequence: tail.sequence + 1,
            collection: collection.to_string(),
            op,
            enqueued_at: Utc::now(),
        };
        let value = serde_json::to_vec(&entry)?;
        if stats.bytes + value.len() > self.config.max_bytes {
            tracing::warn!("Pending queue full ({} bytes), rejecting write", stats.bytes);
            return Err(CareError::QueueFull(format!(
                "{} pending bytes (limit {})",
                stats.bytes + value.len(),
                self.config.max_bytes
            )));
        }

        self.store.with_db(|db| {
            let cf = pending_cf(db)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(cf, entry_key(entry.sequence), &value);
            batch.put_cf(cf, SEQ_KEY, entry.sequence.to_be_bytes());
            db.write(batch)?;
            Ok(())
        })?;
        tail.sequence = entry.sequence;
        tail.stats.count += 1;
        tail.stats.bytes += value.len();

        tracing::debug!(
            "Queued {} #{} for '{}'",
            entry.op.name(),
            entry.sequence,
            entry.collection
        );
        Ok(entry)
    }

    /// Hand out a sequence number without queueing anything. Writes applied
    /// directly while online use it so the remote sees unique sequences.
    pub fn reserve_sequence(&self) -> CareResult<u64> {
        let mut tail = self.tail.lock();
        let next = tail.sequence + 1;
        self.store.with_db(|db| {
            let cf = pending_cf(db)?;
            db.put_cf(cf, SEQ_KEY, next.to_be_bytes())?;
            Ok(())
        })?;
        tail.sequence = next;
        Ok(next)
    }

    /// The oldest entry still in the log
    pub fn head(&self) -> CareResult<Option<PendingSlot>> {
        Ok(self.scan(Some(1))?.into_iter().next())
    }

    /// Every entry in enqueue order
    pub fn entries(&self) -> CareResult<Vec<PendingSlot>> {
        self.scan(None)
    }

    pub fn len(&self) -> CareResult<usize> {
        Ok(self.stats()?.count)
    }

    pub fn is_empty(&self) -> CareResult<bool> {
        Ok(self.head()?.is_none())
    }

    pub fn stats(&self) -> CareResult<QueueStats> {
        Ok(self.tail.lock().stats)
    }

    /// Drop one entry without applying it
    pub fn remove(&self, sequence: u64) -> CareResult<()> {
        let mut tail = self.tail.lock();
        let removed = self.store.with_db(|db| {
            let cf = pending_cf(db)?;
            let key = entry_key(sequence);
            let size = db.get_cf(cf, &key)?.map(|v| v.len());
            if size.is_some() {
                db.delete_cf(cf, &key)?;
            }
            Ok(size)
        })?;
        if let Some(bytes) = removed {
            tail.forget(bytes);
        }
        Ok(())
    }

    /// Account for an entry whose removal was staged with
    /// [`stage_remove`](Self::stage_remove) and has been committed
    pub(crate) fn mark_dequeued(&self, bytes: usize) {
        self.tail.lock().forget(bytes);
    }

    /// Stage the removal of an entry into a batch that also applies it
    pub(crate) fn stage_remove(db: &DB, batch: &mut WriteBatch, sequence: u64) -> CareResult<()> {
        let cf = pending_cf(db)?;
        batch.delete_cf(cf, entry_key(sequence));
        Ok(())
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn scan(&self, limit: Option<usize>) -> CareResult<Vec<PendingSlot>> {
        self.store.with_db(|db| {
            let cf = pending_cf(db)?;
            let mut slots = Vec::new();
            for item in db.prefix_iterator_cf(cf, ENTRY_PREFIX) {
                let (key, value) = item?;
                if !key.starts_with(ENTRY_PREFIX) {
                    break;
                }
                let sequence = parse_sequence(&key)?;
                let entry = serde_json::from_slice::<PendingWrite>(&value)
                    .map_err(|e| format!("undecodable pending write: {}", e));
                slots.push(PendingSlot {
                    sequence,
                    bytes: value.len(),
                    entry,
                });
                if limit.is_some_and(|l| slots.len() >= l) {
                    break;
                }
            }
            Ok(slots)
        })
    }
}

impl Tail {
    fn forget(&mut self, bytes: usize) {
        self.stats.count = self.stats.count.saturating_sub(1);
        self.stats.bytes = self.stats.bytes.saturating_sub(bytes);
    }
}

fn scan_stats(store: &RecordStore) -> CareResult<QueueStats> {
    store.with_db(|db| {
        let cf = pending_cf(db)?;
        let mut stats = QueueStats::default();
        for item in db.prefix_iterator_cf(cf, ENTRY_PREFIX) {
            let (key, value) = item?;
            if !key.starts_with(ENTRY_PREFIX) {
                break;
            }
            stats.count += 1;
            stats.bytes += value.len();
        }
        Ok(stats)
    })
}

fn pending_cf(db: &DB) -> CareResult<&rocksdb::ColumnFamily> {
    db.cf_handle(PENDING_CF)
        .ok_or_else(|| CareError::StorageUnavailable("pending log is not initialized".to_string()))
}

fn entry_key(sequence: u64) -> Vec<u8> {
    let mut key = ENTRY_PREFIX.to_vec();
    key.extend_from_slice(format!("{:020}", sequence).as_bytes());
    key
}

fn parse_sequence(key: &[u8]) -> CareResult<u64> {
    std::str::from_utf8(&key[ENTRY_PREFIX.len()..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            CareError::StorageUnavailable(format!(
                "corrupted pending key {}",
                String::from_utf8_lossy(key)
            ))
        })
}
