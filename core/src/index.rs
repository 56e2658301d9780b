//! The Index Set (C3): in-memory secondary structures kept consistent with
//! the store, rebuilt by a single scan on open.
//!
//! Built on top of `taskstore`'s generic field index rather than
//! reimplementing equality/reverse lookups — the Hierarchy and Dependency
//! views below are just named accessors over the same substrate (`parent`
//! is a scalar field, `dependencies` is a list field), plus the
//! Task-specific traversal algorithms in [`crate::hierarchy`] and
//! [`crate::dependency`] that the generic substrate has no business
//! knowing about.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use taskstore::{now_ms, GenericIndex, Store, TtlCache};

use crate::domain::{Task, TaskStatus};
use crate::error::CoreResult;

/// One recorded status change, kept for `transition_history`.
#[derive(Debug, Clone, Copy)]
pub struct StatusTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: i64,
}

/// Primary + Status + Hierarchy + Dependency indices for `Task`.
///
/// A single [`GenericIndex`] backs all four views: `status`, `parent`, and
/// `dependencies` are all indexed fields on `Task`, so one equality/reverse
/// substrate serves every view without duplicating storage.
pub struct TaskIndex {
    fields: GenericIndex,
    cache: TtlCache<Task>,
    history: HashMap<String, Vec<StatusTransition>>,
}

impl TaskIndex {
    pub fn new(cache_capacity: usize, cache_ttl: Duration) -> Self {
        TaskIndex {
            fields: GenericIndex::new(),
            cache: TtlCache::new(cache_capacity, cache_ttl),
            history: HashMap::new(),
        }
    }

    /// Rebuild by scanning every task currently in the store, batching to
    /// bound peak memory the way a single unbounded `SELECT *` wouldn't.
    pub fn rebuild(&mut self, store: &Store) -> CoreResult<()> {
        self.fields.clear();
        self.cache.clear();
        self.history.clear();
        const BATCH: usize = 100;
        let all = store.list_all::<Task>()?;
        for chunk in all.chunks(BATCH) {
            for task in chunk {
                self.fields.upsert(task);
            }
        }
        Ok(())
    }

    pub fn upsert(&mut self, task: &Task) {
        self.fields.upsert(task);
        self.cache.put(task.path.clone(), task.clone());
    }

    pub fn remove(&mut self, path: &str) {
        self.fields.remove(path);
        self.cache.remove(path);
    }

    pub fn children_of(&self, parent_path: &str) -> HashSet<String> {
        self.fields.by_equality("parent", parent_path)
    }

    pub fn by_status(&self, status: &str) -> HashSet<String> {
        self.fields.by_equality("status", status)
    }

    /// Count of tasks currently in each status, for a quick health snapshot.
    pub fn status_counts(&self) -> HashMap<String, usize> {
        [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Blocked,
        ]
        .into_iter()
        .map(|s| (s.as_str().to_string(), self.by_status(s.as_str()).len()))
        .collect()
    }

    /// Record a committed status change for later inspection via
    /// [`TaskIndex::transition_history`].
    pub fn record_transition(&mut self, path: &str, from: TaskStatus, to: TaskStatus) {
        self.history
            .entry(path.to_string())
            .or_default()
            .push(StatusTransition { from, to, at: now_ms() });
    }

    /// All transitions recorded for `path` since the last rebuild, oldest first.
    pub fn transition_history(&self, path: &str) -> &[StatusTransition] {
        self.history.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, path: &str) -> HashSet<String> {
        self.fields.by_reverse("dependencies", path)
    }

    pub fn get_cached(&mut self, path: &str) -> Option<Task> {
        self.cache.get(path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use taskstore::StoreConfig;
    use tempfile::tempdir;

    fn make(path: &str, parent: Option<&str>) -> Task {
        let mut t = Task::new(path.into(), path.into(), TaskType::Task).unwrap();
        t.parent_path = parent.map(|s| s.to_string());
        t
    }

    #[test]
    fn rebuild_reflects_store_contents() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), "t", &StoreConfig::default()).unwrap();
        store.create(make("a", None)).unwrap();
        store.create(make("a/b", Some("a"))).unwrap();

        let mut index = TaskIndex::new(10, Duration::from_secs(60));
        index.rebuild(&store).unwrap();

        assert_eq!(index.len(), 2);
        assert!(index.children_of("a").contains("a/b"));
    }

    #[test]
    fn upsert_and_remove_keep_index_consistent() {
        let mut index = TaskIndex::new(10, Duration::from_secs(60));
        let t = make("a/b", Some("a"));
        index.upsert(&t);
        assert!(index.children_of("a").contains("a/b"));
        index.remove("a/b");
        assert!(index.children_of("a").is_empty());
    }
}
