//! Generic, durable, WAL-journaled persistence for hierarchical records.
//!
//! This crate knows nothing about tasks, statuses, or dependencies — it
//! persists anything implementing [`Record`] under a path-shaped `id`,
//! replays a write-ahead log on crash recovery, and exposes glob-pattern
//! scans. Domain semantics (task hierarchy, status propagation, dependency
//! graphs) live one layer up, in `atlas_core`.

pub mod engine;
pub mod error;
pub mod glob;
pub mod index;
pub mod journal;
pub mod record;

pub use engine::{Store, StoreConfig, Transaction};
pub use error::{Result, StoreError};
pub use index::{GenericIndex, TtlCache};
pub use journal::{CheckpointMode, CheckpointStats, DurabilityLevel, Journal, JournalRecord};
pub use record::{now_ms, Filter, FilterOp, IndexValue, Record};
