use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{decode_all, non_empty};
use crate::error::{CareError, CareResult};
use crate::storage::collection::REMINDERS;
use crate::storage::{RecordId, RecordStore, WriteOp};
use crate::sync::{WriteGate, WriteOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// When the reminder fires, indexed
    pub time: DateTime<Utc>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReminderBook {
    gate: WriteGate,
    store: RecordStore,
}

impl ReminderBook {
    pub fn new(gate: WriteGate, store: RecordStore) -> Self {
        Self { gate, store }
    }

    pub async fn schedule(&self, time: DateTime<Utc>, text: &str) -> CareResult<WriteOutcome> {
        let reminder = Reminder {
            id: None,
            time,
            text: non_empty(text, "reminder text")?,
            created_at: Utc::now(),
        };
        self.gate
            .submit(REMINDERS, WriteOp::upsert(&reminder)?)
            .await
    }

    pub async fn get(&self, id: u64) -> CareResult<Option<Reminder>> {
        match self.store.get(REMINDERS, &RecordId::Seq(id)).await? {
            Some(record) => record.decode().map(Some),
            None => Ok(None),
        }
    }

    /// Every stored reminder, soonest first
    pub async fn all(&self) -> CareResult<Vec<Reminder>> {
        let mut reminders: Vec<Reminder> = decode_all(self.store.get_all(REMINDERS).await?)?;
        reminders.sort_by_key(|r| r.time);
        Ok(reminders)
    }

    /// Reminders set for exactly `time`
    pub async fn at(&self, time: DateTime<Utc>) -> CareResult<Vec<Reminder>> {
        let key = serde_json::to_value(time)?;
        decode_all(self.store.query_by_index(REMINDERS, "time", &key).await?)
    }

    /// Reminders whose time is at or before `time`
    pub async fn due_by(&self, time: DateTime<Utc>) -> CareResult<Vec<Reminder>> {
        let mut due = self.all().await?;
        due.retain(|r| r.time <= time);
        Ok(due)
    }

    /// Dismiss a reminder, deleting it
    pub async fn acknowledge(&self, id: u64) -> CareResult<WriteOutcome> {
        let record_id = RecordId::Seq(id);
        if self.store.get(REMINDERS, &record_id).await?.is_none() {
            return Err(CareError::not_found(REMINDERS, id));
        }
        self.gate
            .submit(REMINDERS, WriteOp::Delete { id: record_id })
            .await
    }
}

