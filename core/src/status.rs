//! Status State Machine (C4): transition validation, propagation across
//! dependents/parents/children, and rollback-by-replay.

use std::collections::HashSet;

use serde_json::json;
use taskstore::Store;

use crate::dependency;
use crate::domain::{Task, TaskStatus};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::hierarchy;
use crate::index::TaskIndex;

fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Failed)
            | (Pending, Blocked)
            | (InProgress, Pending)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Blocked)
            | (Completed, InProgress)
            | (Completed, Failed)
            | (Failed, Pending)
            | (Failed, InProgress)
            | (Blocked, Pending)
            | (Blocked, InProgress)
            | (Blocked, Failed)
    )
}

fn legal_next_states(from: TaskStatus) -> Vec<TaskStatus> {
    use TaskStatus::*;
    [Pending, InProgress, Completed, Failed, Blocked]
        .into_iter()
        .filter(|&to| is_allowed(from, to))
        .collect()
}

fn validate_transition(from: TaskStatus, to: TaskStatus) -> CoreResult<()> {
    if is_allowed(from, to) {
        return Ok(());
    }
    Err(CoreError::new(
        ErrorKind::InvalidTransition,
        "validate_transition",
        format!("{} -> {} is not a legal transition", from.as_str(), to.as_str()),
    )
    .with_context(
        "legal_next_states",
        json!(legal_next_states(from).iter().map(|s| s.as_str()).collect::<Vec<_>>()),
    ))
}

fn check_completion_preconditions(store: &Store, index: &TaskIndex, task: &Task) -> CoreResult<()> {
    let mut offending_deps = Vec::new();
    for dep in &task.dependencies {
        match store.get::<Task>(dep) {
            Ok(d) if d.status != TaskStatus::Completed => offending_deps.push(dep.clone()),
            Ok(_) => {}
            Err(_) => offending_deps.push(dep.clone()),
        }
    }
    if !offending_deps.is_empty() {
        return Err(CoreError::new(
            ErrorKind::BlockedByDependencies,
            "check_completion_preconditions",
            "not all dependencies are completed",
        )
        .with_context("offending", json!(offending_deps)));
    }

    let children = hierarchy::get_children(store, index, &task.path)?;
    let incomplete: Vec<String> = children
        .iter()
        .filter(|c| c.status != TaskStatus::Completed)
        .map(|c| c.path.clone())
        .collect();
    if !incomplete.is_empty() {
        return Err(CoreError::new(
            ErrorKind::IncompleteSubtasks,
            "check_completion_preconditions",
            "not all immediate subtasks are completed",
        )
        .with_context("offending", json!(incomplete)));
    }
    Ok(())
}

/// All-equal-propagates parent rollup: a computed status is only returned
/// when every child shares the same terminal status; a mixed set leaves
/// the parent's status untouched.
fn rollup_status(children: &[Task]) -> Option<TaskStatus> {
    if children.is_empty() {
        return None;
    }
    let first = children[0].status;
    let all_same = children.iter().all(|c| c.status == first);
    if all_same && matches!(first, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked) {
        Some(first)
    } else {
        None
    }
}

/// Per-path advisory locks, acquired in the order callers request them.
/// In this single-writer actor model a "timeout" is really a reentrancy
/// guard: if propagation tries to re-lock a path it's already holding,
/// that indicates a structural cycle, not real contention.
#[derive(Default)]
pub struct PathLocks {
    held: HashSet<String>,
}

impl PathLocks {
    pub fn new() -> Self {
        PathLocks::default()
    }

    fn acquire(&mut self, path: &str) -> CoreResult<()> {
        if !self.held.insert(path.to_string()) {
            return Err(CoreError::new(
                ErrorKind::LockTimeout,
                "path_locks::acquire",
                format!("path {path} is already locked in this propagation"),
            ));
        }
        Ok(())
    }

    fn release(&mut self, path: &str) {
        self.held.remove(path);
    }
}

/// One committed status change, recorded so a failed propagation can be
/// rolled back by replaying these in reverse.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub path: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Validate and apply `new_status` to `path`, propagating to dependents,
/// parent, and children as described in the propagation algorithm. Returns
/// every change made (including cascades) so the caller can roll back on
/// a later failure in the same batch.
pub fn apply_status_change(
    store: &mut Store,
    index: &mut TaskIndex,
    locks: &mut PathLocks,
    path: &str,
    new_status: TaskStatus,
    max_depth: usize,
) -> CoreResult<Vec<StatusChange>> {
    locks.acquire(path)?;
    let result = apply_status_change_locked(store, index, locks, path, new_status, max_depth);
    locks.release(path);
    result
}

fn apply_status_change_locked(
    store: &mut Store,
    index: &mut TaskIndex,
    locks: &mut PathLocks,
    path: &str,
    new_status: TaskStatus,
    max_depth: usize,
) -> CoreResult<Vec<StatusChange>> {
    let mut task = store.get::<Task>(path)?;
    let old_status = task.status;
    if old_status == new_status {
        return Ok(Vec::new());
    }
    validate_transition(old_status, new_status)?;
    if new_status == TaskStatus::Completed {
        check_completion_preconditions(store, index, &task)?;
    }

    task.status = new_status;
    task.bump();
    let task = store.update(task)?;
    index.upsert(&task);
    index.record_transition(path, old_status, new_status);

    let mut changes = vec![StatusChange { path: path.to_string(), from: old_status, to: new_status }];

    if matches!(new_status, TaskStatus::Failed | TaskStatus::Completed) {
        for dependent_path in dependency::get_dependents(index, path) {
            let Ok(dependent) = store.get::<Task>(&dependent_path) else { continue };
            if matches!(dependent.status, TaskStatus::Blocked | TaskStatus::Failed | TaskStatus::Completed) {
                continue;
            }
            if new_status == TaskStatus::Failed {
                let sub = apply_status_change(store, index, locks, &dependent_path, TaskStatus::Blocked, max_depth)?;
                changes.extend(sub);
            }
            // new_status == Completed: removing a blocker doesn't
            // auto-transition a dependent out of BLOCKED.
        }
    }

    if let Some(parent_path) = task.parent_path.clone() {
        let siblings = hierarchy::get_children(store, index, &parent_path)?;
        if let Some(computed) = rollup_status(&siblings) {
            if let Ok(parent) = store.get::<Task>(&parent_path) {
                if computed != parent.status && is_allowed(parent.status, computed) {
                    let sub = apply_status_change(store, index, locks, &parent_path, computed, max_depth)?;
                    changes.extend(sub);
                }
            }
        }
    }

    if new_status == TaskStatus::Blocked {
        for child_path in index.children_of(path) {
            let Ok(child) = store.get::<Task>(&child_path) else { continue };
            if child.status != TaskStatus::Blocked {
                let sub = apply_status_change(store, index, locks, &child_path, TaskStatus::Blocked, max_depth)?;
                changes.extend(sub);
            }
        }
    }

    Ok(changes)
}

/// Replay `changes` in reverse, force-setting each task's prior status.
/// Does not re-validate transitions: rollback must be able to restore a
/// state that the forward transition table would otherwise forbid.
pub fn rollback(store: &mut Store, index: &mut TaskIndex, changes: &[StatusChange]) {
    for change in changes.iter().rev() {
        match store.get::<Task>(&change.path) {
            Ok(mut task) => {
                task.status = change.from;
                task.bump();
                match store.update(task) {
                    Ok(task) => index.upsert(&task),
                    Err(e) => tracing::error!(path = %change.path, error = %e, "rollback update failed"),
                }
            }
            Err(e) => tracing::error!(path = %change.path, error = %e, "rollback lookup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use std::time::Duration;
    use taskstore::StoreConfig;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Store, TaskIndex) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "t", &StoreConfig::default()).unwrap();
        let index = TaskIndex::new(100, Duration::from_secs(60));
        (dir, store, index)
    }

    #[test]
    fn basic_lifecycle_pending_to_completed() {
        let (_dir, mut store, mut index) = setup();
        let t = Task::new("proj/build".into(), "Build".into(), TaskType::Task).unwrap();
        store.create(t.clone()).unwrap();
        index.upsert(&t);
        let mut locks = PathLocks::new();

        apply_status_change(&mut store, &mut index, &mut locks, "proj/build", TaskStatus::InProgress, 10).unwrap();
        apply_status_change(&mut store, &mut index, &mut locks, "proj/build", TaskStatus::Completed, 10).unwrap();

        let got: Task = store.get("proj/build").unwrap();
        assert_eq!(got.status, TaskStatus::Completed);
        assert_eq!(got.version, 3);
    }

    #[test]
    fn completion_blocked_by_incomplete_dependency() {
        let (_dir, mut store, mut index) = setup();
        let a = Task::new("a".into(), "A".into(), TaskType::Task).unwrap();
        let mut b = Task::new("b".into(), "B".into(), TaskType::Task).unwrap();
        b.dependencies = vec!["a".into()];
        store.create(a.clone()).unwrap();
        store.create(b.clone()).unwrap();
        index.upsert(&a);
        index.upsert(&b);
        let mut locks = PathLocks::new();

        apply_status_change(&mut store, &mut index, &mut locks, "b", TaskStatus::InProgress, 10).unwrap();
        let err = apply_status_change(&mut store, &mut index, &mut locks, "b", TaskStatus::Completed, 10);
        assert!(matches!(err, Err(ref e) if e.kind == ErrorKind::BlockedByDependencies));

        apply_status_change(&mut store, &mut index, &mut locks, "a", TaskStatus::InProgress, 10).unwrap();
        apply_status_change(&mut store, &mut index, &mut locks, "a", TaskStatus::Completed, 10).unwrap();
        index.upsert(&store.get::<Task>("a").unwrap());

        apply_status_change(&mut store, &mut index, &mut locks, "b", TaskStatus::Completed, 10).unwrap();
    }

    #[test]
    fn pending_to_completed_is_not_a_legal_transition() {
        let (_dir, mut store, mut index) = setup();
        let t = Task::new("proj/build".into(), "Build".into(), TaskType::Task).unwrap();
        store.create(t.clone()).unwrap();
        index.upsert(&t);
        let mut locks = PathLocks::new();

        let err = apply_status_change(&mut store, &mut index, &mut locks, "proj/build", TaskStatus::Completed, 10);
        assert!(matches!(err, Err(ref e) if e.kind == ErrorKind::InvalidTransition));

        let got: Task = store.get("proj/build").unwrap();
        assert_eq!(got.status, TaskStatus::Pending);
    }

    #[test]
    fn failure_propagates_to_blocked_dependent() {
        let (_dir, mut store, mut index) = setup();
        let a = Task::new("a".into(), "A".into(), TaskType::Task).unwrap();
        let mut b = Task::new("b".into(), "B".into(), TaskType::Task).unwrap();
        b.dependencies = vec!["a".into()];
        store.create(a.clone()).unwrap();
        store.create(b.clone()).unwrap();
        index.upsert(&a);
        index.upsert(&b);
        let mut locks = PathLocks::new();

        apply_status_change(&mut store, &mut index, &mut locks, "a", TaskStatus::Failed, 10).unwrap();

        let b_after: Task = store.get("b").unwrap();
        assert_eq!(b_after.status, TaskStatus::Blocked);
    }

    #[test]
    fn rollback_restores_prior_status() {
        let (_dir, mut store, mut index) = setup();
        let t = Task::new("a".into(), "A".into(), TaskType::Task).unwrap();
        store.create(t.clone()).unwrap();
        index.upsert(&t);
        let mut locks = PathLocks::new();

        let changes =
            apply_status_change(&mut store, &mut index, &mut locks, "a", TaskStatus::InProgress, 10).unwrap();
        rollback(&mut store, &mut index, &changes);

        let got: Task = store.get("a").unwrap();
        assert_eq!(got.status, TaskStatus::Pending);
    }
}
