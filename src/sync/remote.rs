//! Remote sync endpoint
//!
//! The coordinator mirrors every applied write to an optional remote
//! collaborator. Failures are split into transient ones (retry later,
//! keep the entry queued) and permanent ones (the endpoint will never
//! accept this entry).

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::log::PendingWrite;
use crate::storage::{RecordId, WriteOp};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("rejected: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Receives the same (collection, operation, record) triples the
/// coordinator applies locally.
#[async_trait::async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn push(&self, write: &PendingWrite) -> Result<(), RemoteError>;

    /// Get the name of this endpoint
    fn name(&self) -> &'static str;
}

/// Wire body for one mirrored write
#[derive(Debug, Serialize)]
struct PushBody<'a> {
    device_id: &'a str,
    sequence: u64,
    operation: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a Value>,
}

/// HTTP endpoint: `POST {base}/sync/{collection}` with a JSON body.
///
/// `(device_id, sequence)` identifies a write, so the server can drop
/// duplicates if a write is re-sent after a crash.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, device_id: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
        })
    }

    fn url_for(&self, collection: &str) -> String {
        format!("{}/sync/{}", self.base_url, collection)
    }
}

#[async_trait::async_trait]
impl RemoteEndpoint for HttpRemote {
    async fn push(&self, write: &PendingWrite) -> Result<(), RemoteError> {
        let body = PushBody {
            device_id: &self.device_id,
            sequence: write.sequence,
            operation: write.op.name(),
            id: write.op.target_id(),
            record: match &write.op {
                WriteOp::Upsert { record } => Some(record),
                WriteOp::Delete { .. } => None,
            },
        };

        let response = self
            .client
            .post(self.url_for(&write.collection))
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        classify_status(response.status())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Server errors, throttling and timeouts are worth retrying; any other
/// client error means the entry will never be accepted.
fn classify_status(status: reqwest::StatusCode) -> Result<(), RemoteError> {
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    if status.is_server_error() || code == 408 || code == 429 {
        Err(RemoteError::Transient(format!("HTTP {}", code)))
    } else {
        Err(RemoteError::Permanent(format!("HTTP {}", code)))
    }
}
