//! Structured error taxonomy for the coordinator and everything above the
//! store layer. Every error carries a kind, a human message, the
//! operation that failed, and a redacted context map.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

const MAX_CONTEXT_DEPTH: usize = 10;
const REDACTED: &str = "[REDACTED]";
const CIRCULAR: &str = "[Circular Reference]";
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "api_key", "apikey", "authorization"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Validation
    PathInvalid,
    NameRequired,
    StatusUnknown,
    LimitExceeded,
    // Consistency
    DuplicateKey,
    NotFound,
    VersionConflict,
    CycleDetected,
    // State machine
    InvalidTransition,
    BlockedByDependencies,
    IncompleteSubtasks,
    // Concurrency
    LockTimeout,
    TransactionAborted,
    // Storage
    StorageIo,
    StorageFull,
    RecoveryRequired,
    CheckpointFailed,
    // Internal
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PathInvalid => "PATH_INVALID",
            ErrorKind::NameRequired => "NAME_REQUIRED",
            ErrorKind::StatusUnknown => "STATUS_UNKNOWN",
            ErrorKind::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorKind::DuplicateKey => "DUPLICATE_KEY",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::VersionConflict => "VERSION_CONFLICT",
            ErrorKind::CycleDetected => "CYCLE_DETECTED",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::BlockedByDependencies => "BLOCKED_BY_DEPENDENCIES",
            ErrorKind::IncompleteSubtasks => "INCOMPLETE_SUBTASKS",
            ErrorKind::LockTimeout => "LOCK_TIMEOUT",
            ErrorKind::TransactionAborted => "TRANSACTION_ABORTED",
            ErrorKind::StorageIo => "STORAGE_IO",
            ErrorKind::StorageFull => "STORAGE_FULL",
            ErrorKind::RecoveryRequired => "RECOVERY_REQUIRED",
            ErrorKind::CheckpointFailed => "CHECKPOINT_FAILED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message} (operation={operation})")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub operation: String,
    pub context: HashMap<String, Value>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError {
            kind,
            message: message.into(),
            operation: operation.into(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        let redacted = redact_value(&key.into(), value, 0);
        self.context.insert("ctx".into(), redacted);
        self
    }

    pub fn validation(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::new(kind, operation, message)
    }

    pub fn name_required(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::new(ErrorKind::NameRequired, operation, message)
    }

    pub fn status_unknown(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::new(ErrorKind::StatusUnknown, operation, message)
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        CoreError::new(ErrorKind::LimitExceeded, "limit_check", message)
    }

    pub fn not_found(operation: impl Into<String>, path: &str) -> Self {
        CoreError::new(ErrorKind::NotFound, operation, format!("task not found: {path}"))
    }

    pub fn version_conflict(operation: impl Into<String>, path: &str, expected: u64, found: u64) -> Self {
        CoreError::new(
            ErrorKind::VersionConflict,
            operation,
            format!("version conflict on {path}: expected {expected}, found {found}"),
        )
    }

    pub fn internal(origin: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::new(ErrorKind::Internal, origin, message)
    }
}

impl From<taskstore::StoreError> for CoreError {
    fn from(e: taskstore::StoreError) -> Self {
        use taskstore::StoreError as SE;
        let kind = match &e {
            SE::NotFound { .. } => ErrorKind::NotFound,
            SE::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            SE::VersionConflict { .. } => ErrorKind::VersionConflict,
            SE::PathInvalid(_) => ErrorKind::PathInvalid,
            SE::LimitExceeded(_) => ErrorKind::LimitExceeded,
            SE::StorageFull(_) => ErrorKind::StorageFull,
            SE::RecoveryRequired(_) => ErrorKind::RecoveryRequired,
            SE::CheckpointFailed(_) => ErrorKind::CheckpointFailed,
            SE::LockTimeout(_) => ErrorKind::LockTimeout,
            SE::TransactionAborted(_) => ErrorKind::TransactionAborted,
            SE::StorageIo(_) | SE::Sqlite(_) | SE::Serde(_) => ErrorKind::StorageIo,
            SE::Internal { .. } => ErrorKind::Internal,
        };
        CoreError::new(kind, "store", e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::new(ErrorKind::StorageIo, "serde_json", e.to_string())
    }
}

/// Redact sensitive keys, cap recursion depth, and replace cycles with a
/// sentinel. `serde_json::Value` can't actually contain a cycle, but
/// context maps are sometimes built from caller-supplied data structures
/// before being converted, so this still guards the conversion boundary.
fn redact_value(key: &str, value: Value, depth: usize) -> Value {
    if SENSITIVE_KEYS.iter().any(|k| key.to_lowercase().contains(k)) {
        return Value::String(REDACTED.to_string());
    }
    if depth >= MAX_CONTEXT_DEPTH {
        return Value::String(CIRCULAR.to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), redact_value(&k, v, depth + 1));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| redact_value(key, v, depth + 1))
                .collect(),
        ),
        other => other,
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sensitive_keys() {
        let v = serde_json::json!({"password": "hunter2", "name": "task"});
        let redacted = redact_value("ctx", v, 0);
        assert_eq!(redacted["password"], Value::String(REDACTED.to_string()));
        assert_eq!(redacted["name"], Value::String("task".to_string()));
    }

    #[test]
    fn caps_depth() {
        let mut v = serde_json::json!({"leaf": 1});
        for _ in 0..MAX_CONTEXT_DEPTH + 2 {
            v = serde_json::json!({"nested": v});
        }
        let redacted = redact_value("ctx", v, 0);
        // just assert it doesn't panic / stack overflow and produces a value
        assert!(redacted.is_object() || redacted.is_string());
    }

    #[test]
    fn store_error_maps_to_matching_kind() {
        let e: CoreError = taskstore::StoreError::NotFound {
            collection: "tasks".into(),
            id: "a".into(),
        }
        .into();
        assert_eq!(e.kind, ErrorKind::NotFound);
    }
}
