//! Error taxonomy for the store crate.

use thiserror::Error;

/// Errors surfaced by [`crate::Store`] and the journal.
///
/// Variants are grouped the way callers actually branch on them: not found
/// / conflict are expected and routine, storage and recovery failures are
/// not.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("duplicate key: {collection}/{id} already exists")]
    DuplicateKey { collection: String, id: String },

    #[error("version conflict on {collection}/{id}: expected {expected}, found {found}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("invalid path: {0}")]
    PathInvalid(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error("storage full: {0}")]
    StorageFull(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("recovery required: {0}")]
    RecoveryRequired(String),

    #[error("checkpoint failed: {0}")]
    CheckpointFailed(String),

    #[error("lock timeout acquiring {0}")]
    LockTimeout(String),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("internal error in {origin}: {message}")]
    Internal { origin: String, message: String },
}

impl StoreError {
    pub fn internal(origin: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Internal {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
