use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CareError, CareResult};

/// Primary key of a stored record.
///
/// Auto-increment collections hand out `Seq` ids; explicit-key collections
/// use whatever string the record carries in its `id` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Seq(u64),
    Key(String),
}

impl RecordId {
    /// Read an id out of a JSON value (number or non-empty string)
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(RecordId::Seq),
            Value::String(s) if !s.is_empty() => Some(RecordId::Key(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Seq(n) => Value::from(*n),
            RecordId::Key(s) => Value::String(s.clone()),
        }
    }

    pub fn as_seq(&self) -> Option<u64> {
        match self {
            RecordId::Seq(n) => Some(*n),
            RecordId::Key(s) => s.parse().ok(),
        }
    }

    /// Key fragment used inside the column family. Sequence ids are
    /// zero-padded so byte order matches numeric order.
    pub(crate) fn storage_key(&self) -> String {
        match self {
            RecordId::Seq(n) => format!("{:020}", n),
            RecordId::Key(s) => s.clone(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Seq(n) => write!(f, "{}", n),
            RecordId::Key(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        RecordId::Seq(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Key(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Key(s)
    }
}

/// A record as returned by the store: its id plus the JSON body.
/// The body always carries the id under the `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub data: Value,
}

impl Record {
    /// Get a field by dotted path
    pub fn get(&self, field_path: &str) -> Option<Value> {
        match extract_field_value(&self.data, field_path) {
            Value::Null => None,
            value => Some(value),
        }
    }

    /// Deserialize the body into a typed entity
    pub fn decode<T: DeserializeOwned>(&self) -> CareResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            CareError::InvalidRecord(format!("record '{}' does not decode: {}", self.id, e))
        })
    }
}

/// On-disk envelope for a record.
///
/// `ord` is the insertion position inside the collection; an overwrite keeps
/// its first position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub ord: u64,
    pub updated_at: DateTime<Utc>,
    pub data: Value,
}

/// A mutation against one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WriteOp {
    Upsert { record: Value },
    Delete { id: RecordId },
}

impl WriteOp {
    pub fn upsert<T: Serialize>(record: &T) -> CareResult<Self> {
        Ok(WriteOp::Upsert {
            record: serde_json::to_value(record)?,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::Upsert { .. } => "upsert",
            WriteOp::Delete { .. } => "delete",
        }
    }

    /// The id this write targets, when it is known before it is applied
    pub fn target_id(&self) -> Option<RecordId> {
        match self {
            WriteOp::Upsert { record } => record.get("id").and_then(RecordId::from_value),
            WriteOp::Delete { id } => Some(id.clone()),
        }
    }
}

/// Extract a field value from a JSON document by dotted path
pub fn extract_field_value(doc: &Value, field_path: &str) -> Value {
    let mut current = doc;

    for part in field_path.split('.') {
        match current.get(part) {
            Some(val) => current = val,
            None => return Value::Null,
        }
    }

    current.clone()
}
