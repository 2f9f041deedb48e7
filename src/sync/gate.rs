use std::sync::Arc;

use super::coordinator::{SyncCoordinator, WriteOutcome};
use crate::connectivity::ConnectivityMonitor;
use crate::error::CareResult;
use crate::storage::WriteOp;

/// Single write path for connectivity-aware collections.
///
/// Offline, every write is queued. Online, a write is applied directly
/// unless older writes are still queued; then it joins the queue and a
/// flush is triggered, so writes to the same id never overtake each other.
#[derive(Clone)]
pub struct WriteGate {
    monitor: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
}

impl WriteGate {
    pub fn new(monitor: Arc<ConnectivityMonitor>, coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            monitor,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub async fn submit(&self, collection: &str, op: WriteOp) -> CareResult<WriteOutcome> {
        if !self.monitor.is_online() {
            let queued = self.coordinator.enqueue(collection, op)?;
            return Ok(WriteOutcome::Queued {
                sequence: queued.sequence,
            });
        }

        if self.coordinator.pending().is_empty()? {
            return self.coordinator.apply_now(collection, op).await;
        }

        let queued = self.coordinator.enqueue(collection, op)?;
        self.coordinator.flush().await?;
        Ok(WriteOutcome::Queued {
            sequence: queued.sequence,
        })
    }
}
