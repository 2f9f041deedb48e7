//! Offline synchronization
//!
//! This module provides:
//! - A durable, ordered pending-write log
//! - A coordinator that drains the log on reconnection
//! - An optional remote endpoint the drained writes are mirrored to
//! - The write gate every connectivity-aware write goes through
//!
//! Applying an entry and removing it from the log commit in one RocksDB
//! write batch, so a flush interrupted at any point resumes at the first
//! unapplied entry.

pub mod coordinator;
pub mod gate;
pub mod log;
pub mod remote;

pub use coordinator::{FlushOutcome, SyncCoordinator, SyncItemDiscarded, SyncReport, WriteOutcome};
pub use gate::WriteGate;
pub use log::{PendingLog, PendingSlot, PendingWrite, QueueConfig, QueueStats};
pub use remote::{HttpRemote, RemoteEndpoint, RemoteError};
