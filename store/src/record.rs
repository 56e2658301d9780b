//! The generic record contract that [`crate::Store`] persists and indexes.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A value that can appear in a [`Record::indexed_fields`] map.
///
/// `List` is what gives reverse-index lookups (e.g. "which tasks depend on
/// this one") for free: every member of the list gets its own reverse
/// index entry pointing back at the owning record id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexValue {
    String(String),
    Number(i64),
    Bool(bool),
    List(Vec<String>),
}

impl IndexValue {
    pub fn as_scalar(&self) -> Option<String> {
        match self {
            IndexValue::String(s) => Some(s.clone()),
            IndexValue::Number(n) => Some(n.to_string()),
            IndexValue::Bool(b) => Some(b.to_string()),
            IndexValue::List(_) => None,
        }
    }
}

/// Anything the store can persist and index generically.
///
/// Implementors are the domain types (`atlas_core::domain::Task`,
/// `Knowledge`, ...); `Store` never knows their shape beyond this trait.
pub trait Record: Clone + Send + Sync + 'static {
    /// Primary key. Stable for the lifetime of the record.
    fn id(&self) -> String;

    /// Monotonic milliseconds; bumped on every mutation.
    fn updated_at(&self) -> i64;

    /// Name of the backing collection (roughly: SQL table name).
    fn collection_name() -> &'static str;

    /// Fields the generic index substrate should maintain equality/reverse
    /// indices over. Keys are field names, stable across a record's type.
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;

    /// Serialize to the JSON blob stored alongside the indexed columns.
    fn to_json(&self) -> serde_json::Result<String>;

    /// Deserialize from the JSON blob produced by `to_json`.
    fn from_json(s: &str) -> serde_json::Result<Self>
    where
        Self: Sized;

    /// Optimistic-concurrency version, if this record type has one.
    /// `Store::update` only enforces `expected == stored + 1` when both the
    /// incoming and the currently stored record report `Some`; types with
    /// no versioning contract (e.g. `Knowledge`) leave this as `None`.
    fn version(&self) -> Option<u64> {
        None
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// An equality filter over one indexed field, used by [`crate::Store::list`].
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

/// The comparison a [`Filter`] performs against a record's indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Contains,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Filter {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter {
            field: field.into(),
            op: FilterOp::Contains,
            value: IndexValue::String(value.into()),
        }
    }

    /// Evaluate against one record's indexed-fields map.
    pub fn matches(&self, fields: &HashMap<String, IndexValue>) -> bool {
        let Some(actual) = fields.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Contains => match (actual, &self.value) {
                (IndexValue::List(items), IndexValue::String(needle)) => items.contains(needle),
                _ => false,
            },
        }
    }
}
