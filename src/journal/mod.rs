//! Typed views over the connectivity-aware collections.
//!
//! Writes go through the [`WriteGate`](crate::sync::WriteGate) so they are
//! queued while offline; reads come straight from the local store and only
//! see writes that have been applied.

pub mod community;
pub mod health;
pub mod reminders;

use serde::de::DeserializeOwned;

use crate::error::{CareError, CareResult};
use crate::storage::Record;

pub use community::{CommunityBoard, CommunityPost};
pub use health::{HealthJournal, Observation, ObservationKind, SeriesPoint};
pub use reminders::{Reminder, ReminderBook};

fn decode_all<T: DeserializeOwned>(records: Vec<Record>) -> CareResult<Vec<T>> {
    records.iter().map(Record::decode).collect()
}

fn non_empty(value: &str, field: &str) -> CareResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CareError::ValidationFailed(format!("{} must not be empty", field)))
    } else {
        Ok(trimmed.to_string())
    }
}
