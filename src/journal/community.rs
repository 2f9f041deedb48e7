use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_all, non_empty};
use crate::error::CareResult;
use crate::storage::collection::COMMUNITY_POSTS;
use crate::storage::{RecordStore, WriteOp};
use crate::sync::{WriteGate, WriteOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Area the post concerns, indexed
    pub location: String,
    pub content: String,
    /// Calendar day, indexed
    pub date: NaiveDate,
    pub posted_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CommunityBoard {
    gate: WriteGate,
    store: RecordStore,
}

impl CommunityBoard {
    pub fn new(gate: WriteGate, store: RecordStore) -> Self {
        Self { gate, store }
    }

    pub async fn post(&self, location: &str, content: &str) -> CareResult<WriteOutcome> {
        let posted_at = Utc::now();
        let post = CommunityPost {
            id: None,
            location: non_empty(location, "location")?,
            content: non_empty(content, "post content")?,
            date: posted_at.date_naive(),
            posted_at,
        };
        self.gate
            .submit(COMMUNITY_POSTS, WriteOp::upsert(&post)?)
            .await
    }

    /// Posts in insertion order
    pub async fn all(&self) -> CareResult<Vec<CommunityPost>> {
        decode_all(self.store.get_all(COMMUNITY_POSTS).await?)
    }

    pub async fn by_location(&self, location: &str) -> CareResult<Vec<CommunityPost>> {
        let key = Value::String(location.trim().to_string());
        decode_all(self.store.query_by_index(COMMUNITY_POSTS, "location", &key).await?)
    }

    pub async fn on_date(&self, date: NaiveDate) -> CareResult<Vec<CommunityPost>> {
        let key = Value::String(date.to_string());
        decode_all(self.store.query_by_index(COMMUNITY_POSTS, "date", &key).await?)
    }
}
