//! Dependency graph traversal: dependents lookup and DFS-based cycle
//! detection over the `dependencies` field.

use std::collections::HashSet;

use taskstore::Store;

use crate::domain::Task;
use crate::error::CoreResult;
use crate::index::TaskIndex;

/// Tasks that list `path` in their `dependencies` (reverse index lookup).
pub fn get_dependents(index: &TaskIndex, path: &str) -> HashSet<String> {
    index.dependents_of(path)
}

/// Is `to` reachable from `from` by following `dependencies` edges?
/// Used both for `a depends on b` queries and as the building block for
/// cycle detection.
pub fn is_reachable(store: &Store, from: &str, to: &str) -> CoreResult<bool> {
    let mut visited = HashSet::new();
    let mut stack = vec![from.to_string()];
    while let Some(current) = stack.pop() {
        if current == to {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Ok(task) = store.get::<Task>(&current) {
            for dep in task.dependencies {
                stack.push(dep);
            }
        }
    }
    Ok(false)
}

/// Would adding `proposed_deps` to `task_path`'s dependency set create a
/// cycle? True if any proposed dependency can already reach `task_path`.
pub fn would_create_cycle(store: &Store, task_path: &str, proposed_deps: &[String]) -> CoreResult<bool> {
    for dep in proposed_deps {
        if dep == task_path {
            return Ok(true);
        }
        if is_reachable(store, dep, task_path)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use std::time::Duration;
    use taskstore::StoreConfig;
    use tempfile::tempdir;

    fn make(path: &str, deps: &[&str]) -> Task {
        let mut t = Task::new(path.into(), path.into(), TaskType::Task).unwrap();
        t.dependencies = deps.iter().map(|s| s.to_string()).collect();
        t
    }

    #[test]
    fn dependents_found_via_reverse_index() {
        let mut index = TaskIndex::new(10, Duration::from_secs(60));
        index.upsert(&make("b", &["a"]));
        let dependents = get_dependents(&index, "a");
        assert!(dependents.contains("b"));
    }

    #[test]
    fn reachability_follows_transitive_chain() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), "t", &StoreConfig::default()).unwrap();
        store.create(make("a", &[])).unwrap();
        store.create(make("b", &["a"])).unwrap();
        store.create(make("c", &["b"])).unwrap();

        assert!(is_reachable(&store, "c", "a").unwrap());
        assert!(!is_reachable(&store, "a", "c").unwrap());
    }

    #[test]
    fn would_create_cycle_detects_transitive_cycle() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), "t", &StoreConfig::default()).unwrap();
        store.create(make("a", &[])).unwrap();
        store.create(make("b", &["a"])).unwrap();

        // a depends on b would close a cycle a -> b -> a
        assert!(would_create_cycle(&store, "a", &["b".to_string()]).unwrap());
        assert!(!would_create_cycle(&store, "c", &["a".to_string()]).unwrap());
    }
}
