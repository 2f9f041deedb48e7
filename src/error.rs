use thiserror::Error;

use crate::sync::remote::RemoteError;

#[derive(Error, Debug)]
pub enum CareError {
    #[error("Record '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Collection '{0}' is not declared")]
    UnknownCollection(String),

    #[error("Collection '{collection}' has no index '{index}'")]
    UnknownIndex { collection: String, index: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Pending queue full: {0}")]
    QueueFull(String),

    #[error("Remote endpoint error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type CareResult<T> = Result<T, CareError>;

impl CareError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// The sync coordinator halts a flush on transient failures and discards
    /// the entry on anything else.
    pub fn is_transient(&self) -> bool {
        match self {
            CareError::StorageUnavailable(_) | CareError::IoError(_) => true,
            CareError::Remote(err) => err.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn not_found(collection: &str, id: impl ToString) -> Self {
        CareError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<rocksdb::Error> for CareError {
    fn from(err: rocksdb::Error) -> Self {
        CareError::StorageUnavailable(err.into_string())
    }
}
