//! The Batch Processor (C5's core logic): atomic, ordered CREATE/UPDATE/
//! DELETE execution with dependency verification deferred to commit time.
//!
//! `execute_batch` builds an in-memory overlay of the batch's net effect
//! (so a batch may create a task and, later in the same batch, create
//! another task depending on it), validates the overlay as a whole once
//! every op has been staged, and only then commits physically as one
//! `taskstore::Transaction`. Single-operation `create_task`/`update_task`/
//! `delete_task` below are the degenerate one-op case of the same engine,
//! used directly by the coordinator for the non-batch API surface.

use std::collections::{HashMap, HashSet};

use taskstore::Store;

use crate::cache::AdaptiveCache;
use crate::config::LimitsConfig;
use crate::dependency;
use crate::domain::{Task, TaskStatus};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::hierarchy;
use crate::index::TaskIndex;
use crate::status::{self, PathLocks};

use super::messages::{BatchOp, OpResult, TaskUpdate};

fn apply_field_update(task: &mut Task, update: &TaskUpdate) {
    if let Some(name) = &update.name {
        task.name = name.clone();
    }
    if let Some(parent) = &update.parent_path {
        task.parent_path = parent.clone();
    }
    if let Some(deps) = &update.dependencies {
        task.dependencies = deps.clone();
    }
    if let Some(description) = &update.description {
        task.description = description.clone();
    }
    if let Some(reasoning) = &update.reasoning {
        task.reasoning = reasoning.clone();
    }
    if let Some(metadata) = &update.metadata {
        task.metadata = metadata.clone();
    }
}

pub fn validate_new_task(
    store: &Store,
    index: &TaskIndex,
    limits: &LimitsConfig,
    task: &Task,
) -> CoreResult<()> {
    if hierarchy::calculate_depth(&task.path) > limits.max_path_depth {
        return Err(CoreError::limit_exceeded(format!(
            "path depth exceeds max {}",
            limits.max_path_depth
        )));
    }
    if let Some(parent) = &task.parent_path {
        if !store.exists::<Task>(parent)? {
            return Err(CoreError::not_found("validate_new_task", parent));
        }
        if index.children_of(parent).len() >= limits.max_children_per_parent {
            return Err(CoreError::limit_exceeded(format!(
                "parent {parent} already has the maximum {} children",
                limits.max_children_per_parent
            )));
        }
    }
    if task.dependencies.len() > limits.max_dependencies_per_task {
        return Err(CoreError::limit_exceeded(format!(
            "task has more than the maximum {} dependencies",
            limits.max_dependencies_per_task
        )));
    }
    for dep in &task.dependencies {
        if !store.exists::<Task>(dep)? {
            return Err(CoreError::not_found("validate_new_task", dep));
        }
    }
    if dependency::would_create_cycle(store, &task.path, &task.dependencies)? {
        return Err(CoreError::new(
            ErrorKind::CycleDetected,
            "validate_new_task",
            "dependency set would introduce a cycle",
        ));
    }
    Ok(())
}

pub fn create_task(
    store: &mut Store,
    index: &mut TaskIndex,
    cache: &mut AdaptiveCache,
    limits: &LimitsConfig,
    task: Task,
) -> CoreResult<Task> {
    validate_new_task(store, index, limits, &task)?;
    let created = store.create(task)?;
    index.upsert(&created);
    cache.put(created.clone());
    Ok(created)
}

pub fn update_task(
    store: &mut Store,
    index: &mut TaskIndex,
    locks: &mut PathLocks,
    cache: &mut AdaptiveCache,
    limits: &LimitsConfig,
    path: &str,
    update: TaskUpdate,
) -> CoreResult<Task> {
    let current = store.get::<Task>(path)?;
    if let Some(expected) = update.expected_version {
        if expected != current.version {
            return Err(CoreError::version_conflict("update_task", path, current.version, expected));
        }
    }
    let mut next = current.clone();
    apply_field_update(&mut next, &update);

    if next.parent_path != current.parent_path {
        if let Some(parent) = &next.parent_path {
            if !store.exists::<Task>(parent)? {
                return Err(CoreError::not_found("update_task", parent));
            }
            if hierarchy::would_create_cycle(store, path, parent, limits.max_path_depth)? {
                return Err(CoreError::new(ErrorKind::CycleDetected, "update_task", "new parent would introduce a cycle"));
            }
        }
    }
    if next.dependencies != current.dependencies {
        if next.dependencies.len() > limits.max_dependencies_per_task {
            return Err(CoreError::limit_exceeded("dependency count exceeds maximum"));
        }
        for dep in &next.dependencies {
            if !store.exists::<Task>(dep)? {
                return Err(CoreError::not_found("update_task", dep));
            }
        }
        if dependency::would_create_cycle(store, path, &next.dependencies)? {
            return Err(CoreError::new(ErrorKind::CycleDetected, "update_task", "new dependencies would introduce a cycle"));
        }
    }

    let status_change = update.status.filter(|s| *s != next.status);
    next.bump();
    let saved = store.update(next)?;
    index.upsert(&saved);
    cache.put(saved.clone());

    if let Some(new_status) = status_change {
        status::apply_status_change(store, index, locks, path, new_status, limits.max_path_depth)?;
    }

    let final_task = store.get::<Task>(path)?;
    index.upsert(&final_task);
    cache.put(final_task.clone());
    Ok(final_task)
}

/// Delete `path` and every descendant by path prefix, then propagate
/// `BLOCKED` to surviving dependents of anything deleted.
pub fn delete_task(
    store: &mut Store,
    index: &mut TaskIndex,
    locks: &mut PathLocks,
    cache: &mut AdaptiveCache,
    limits: &LimitsConfig,
    path: &str,
) -> CoreResult<()> {
    if !store.exists::<Task>(path)? {
        return Err(CoreError::not_found("delete_task", path));
    }
    let descendants = hierarchy::get_descendants(store, index, path, limits.max_path_depth)?;
    let mut to_delete: Vec<String> = descendants.iter().map(|t| t.path.clone()).collect();
    to_delete.push(path.to_string());
    to_delete.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));

    let mut dependents_of_deleted: HashMap<String, HashSet<String>> = HashMap::new();
    for p in &to_delete {
        dependents_of_deleted.insert(p.clone(), dependency::get_dependents(index, p));
    }
    let deleted_set: HashSet<String> = to_delete.iter().cloned().collect();

    for p in &to_delete {
        store.delete::<Task>(p)?;
        index.remove(p);
        cache.remove(p);
    }

    for dependents in dependents_of_deleted.values() {
        for dependent in dependents {
            if deleted_set.contains(dependent) {
                continue;
            }
            let Ok(dep_task) = store.get::<Task>(dependent) else { continue };
            if dep_task.status.is_terminal() || dep_task.status == TaskStatus::Blocked {
                continue;
            }
            let _ = status::apply_status_change(store, index, locks, dependent, TaskStatus::Blocked, limits.max_path_depth);
        }
    }
    Ok(())
}

fn existing_in_overlay_or_store(
    store: &Store,
    overlay: &HashMap<String, Option<Task>>,
    path: &str,
) -> bool {
    match overlay.get(path) {
        Some(Some(_)) => true,
        Some(None) => false,
        None => store.exists::<Task>(path).unwrap_or(false),
    }
}

/// Execute `ops` atomically: either every op takes effect or none does.
/// On the first failure, the rest of the batch is reported `NotExecuted`.
pub fn execute_batch(
    store: &mut Store,
    index: &mut TaskIndex,
    locks: &mut PathLocks,
    cache: &mut AdaptiveCache,
    limits: &LimitsConfig,
    ops: Vec<BatchOp>,
) -> Vec<OpResult> {
    let mut overlay: HashMap<String, Option<Task>> = HashMap::new();
    let op_paths: Vec<String> = ops
        .iter()
        .map(|op| match op {
            BatchOp::Create(t) => t.path.clone(),
            BatchOp::Update { path, .. } => path.clone(),
            BatchOp::Delete { path } => path.clone(),
        })
        .collect();

    for (i, op) in ops.iter().enumerate() {
        let outcome: CoreResult<()> = match op {
            BatchOp::Create(task) => {
                if existing_in_overlay_or_store(store, &overlay, &task.path) {
                    Err(CoreError::new(
                        ErrorKind::DuplicateKey,
                        "bulk_create",
                        format!("{} already exists", task.path),
                    ))
                } else {
                    overlay.insert(task.path.clone(), Some(task.clone()));
                    Ok(())
                }
            }
            BatchOp::Update { path, update } => {
                let current = match overlay.get(path) {
                    Some(Some(t)) => Some(t.clone()),
                    Some(None) => None,
                    None => store.get::<Task>(path).ok(),
                };
                match current {
                    Some(mut next) => {
                        apply_field_update(&mut next, update);
                        next.bump();
                        overlay.insert(path.clone(), Some(next));
                        Ok(())
                    }
                    None => Err(CoreError::not_found("bulk_update", path)),
                }
            }
            BatchOp::Delete { path } => {
                if existing_in_overlay_or_store(store, &overlay, path) {
                    overlay.insert(path.clone(), None);
                    Ok(())
                } else {
                    Err(CoreError::not_found("bulk_delete", path))
                }
            }
        };

        if let Err(e) = outcome {
            return finish_with_failure(&op_paths, i, e);
        }
    }

    if let Err(e) = validate_overlay(store, limits, &overlay) {
        return finish_with_failure(&op_paths, ops.len(), e);
    }

    let mut tx = store.begin_transaction();
    for (path, maybe) in &overlay {
        match maybe {
            Some(task) => {
                if let Err(e) = store.stage_write(&mut tx, task) {
                    return finish_with_failure(&op_paths, ops.len(), e.into());
                }
            }
            None => {
                if let Err(e) = store.stage_delete::<Task>(&mut tx, path) {
                    return finish_with_failure(&op_paths, ops.len(), e.into());
                }
            }
        }
    }
    if let Err(e) = store.commit(tx) {
        return finish_with_failure(&op_paths, ops.len(), e.into());
    }

    for (path, maybe) in &overlay {
        match maybe {
            Some(task) => {
                index.upsert(task);
                cache.put(task.clone());
            }
            None => {
                index.remove(path);
                cache.remove(path);
            }
        }
    }

    let deleted_set: HashSet<String> = overlay
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| k.clone())
        .collect();
    for deleted_path in &deleted_set {
        for dependent in dependency::get_dependents(index, deleted_path) {
            if deleted_set.contains(&dependent) {
                continue;
            }
            let Ok(dep_task) = store.get::<Task>(&dependent) else { continue };
            if dep_task.status.is_terminal() || dep_task.status == TaskStatus::Blocked {
                continue;
            }
            let _ = status::apply_status_change(store, index, locks, &dependent, TaskStatus::Blocked, limits.max_path_depth);
        }
    }

    op_paths
        .iter()
        .map(|path| match overlay.get(path) {
            Some(Some(task)) => OpResult::Ok(task.clone()),
            Some(None) => store
                .get::<Task>(path)
                .map(OpResult::Ok)
                .unwrap_or_else(|_| OpResult::Ok(current_or_placeholder(path))),
            None => OpResult::Failed(CoreError::internal("execute_batch", "op missing from overlay")),
        })
        .collect()
}

fn current_or_placeholder(path: &str) -> Task {
    // A deleted task no longer exists in the store; callers only need the
    // path to confirm which operation this result corresponds to.
    Task {
        path: path.to_string(),
        name: String::new(),
        task_type: crate::domain::TaskType::Task,
        status: TaskStatus::Completed,
        parent_path: None,
        dependencies: Vec::new(),
        project_path: path.split('/').next().unwrap_or(path).to_string(),
        description: String::new(),
        reasoning: String::new(),
        notes: Default::default(),
        metadata: Default::default(),
        status_metadata: Default::default(),
        created: 0,
        updated: 0,
        version: 0,
    }
}

fn validate_overlay(store: &Store, limits: &LimitsConfig, overlay: &HashMap<String, Option<Task>>) -> CoreResult<()> {
    for (path, maybe) in overlay {
        let Some(task) = maybe else { continue };
        if task.dependencies.len() > limits.max_dependencies_per_task {
            return Err(CoreError::limit_exceeded(format!("{path} exceeds max dependencies")));
        }
        for dep in &task.dependencies {
            if !existing_in_overlay_or_store(store, overlay, dep) {
                return Err(CoreError::not_found("bulk_commit", dep));
            }
        }
        if let Some(parent) = &task.parent_path {
            if !existing_in_overlay_or_store(store, overlay, parent) {
                return Err(CoreError::not_found("bulk_commit", parent));
            }
        }
    }
    Ok(())
}

fn finish_with_failure(op_paths: &[String], failed_index: usize, error: CoreError) -> Vec<OpResult> {
    // A failure discovered during the commit-time validation pass (rather
    // than while applying a specific op) has no op index of its own; blame
    // it on the last op in the batch so callers still see exactly one
    // `Failed` entry instead of an all-`NotExecuted` result.
    let blamed = failed_index.min(op_paths.len().saturating_sub(1));
    op_paths
        .iter()
        .enumerate()
        .map(|(i, _)| match i.cmp(&blamed) {
            std::cmp::Ordering::Less => OpResult::NotExecuted,
            std::cmp::Ordering::Equal => OpResult::Failed(error.clone()),
            std::cmp::Ordering::Greater => OpResult::NotExecuted,
        })
        .collect()
}
