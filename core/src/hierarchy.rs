//! Hierarchy traversal: children, parent, ancestors, descendants, depth,
//! and parenthood cycle detection. Built on [`crate::index::TaskIndex`]'s
//! generic `parent` equality index plus direct store lookups.

use std::collections::HashSet;

use taskstore::Store;

use crate::domain::Task;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::index::TaskIndex;

pub const DEFAULT_MAX_DEPTH: usize = 10;

pub fn calculate_depth(path: &str) -> usize {
    path.split('/').count()
}

pub fn get_children(store: &Store, index: &TaskIndex, parent_path: &str) -> CoreResult<Vec<Task>> {
    let mut children: Vec<Task> = index
        .children_of(parent_path)
        .into_iter()
        .filter_map(|p| store.get::<Task>(&p).ok())
        .collect();
    children.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(children)
}

pub fn get_parent(store: &Store, task: &Task) -> CoreResult<Option<Task>> {
    match &task.parent_path {
        Some(p) => Ok(Some(store.get::<Task>(p)?)),
        None => Ok(None),
    }
}

/// Walk `parentPath` from `path` to the root, returning ancestors nearest
/// first. Bounded by `max_depth` hops; exceeding it is a logic error in an
/// already-committed store (invariant 3), surfaced rather than looped
/// forever.
pub fn get_ancestors(store: &Store, path: &str, max_depth: usize) -> CoreResult<Vec<Task>> {
    let mut ancestors = Vec::new();
    let mut current = store.get::<Task>(path)?;
    let mut hops = 0;
    while let Some(parent_path) = current.parent_path.clone() {
        hops += 1;
        if hops > max_depth {
            return Err(CoreError::new(
                ErrorKind::Internal,
                "get_ancestors",
                format!("parent chain from {path} exceeds max depth {max_depth}"),
            ));
        }
        let parent = store.get::<Task>(&parent_path)?;
        ancestors.push(parent.clone());
        current = parent;
    }
    Ok(ancestors)
}

/// All transitive descendants of `path`, via repeated `children_of` BFS.
/// Bounded by `max_depth` total hops from `path`.
pub fn get_descendants(
    store: &Store,
    index: &TaskIndex,
    path: &str,
    max_depth: usize,
) -> CoreResult<Vec<Task>> {
    let mut out = Vec::new();
    let mut frontier = vec![path.to_string()];
    let mut depth = 0;
    while !frontier.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for p in &frontier {
            for child_path in index.children_of(p) {
                if let Ok(child) = store.get::<Task>(&child_path) {
                    next.push(child.path.clone());
                    out.push(child);
                }
            }
        }
        frontier = next;
        depth += 1;
    }
    Ok(out)
}

/// Would setting `child_path`'s parent to `proposed_parent` create a cycle?
/// True if `child_path` appears among `proposed_parent`'s own ancestors
/// (or equals it).
pub fn would_create_cycle(
    store: &Store,
    child_path: &str,
    proposed_parent: &str,
    max_depth: usize,
) -> CoreResult<bool> {
    if child_path == proposed_parent {
        return Ok(true);
    }
    let mut visited = HashSet::new();
    let mut current = proposed_parent.to_string();
    loop {
        if current == child_path {
            return Ok(true);
        }
        if !visited.insert(current.clone()) || visited.len() > max_depth {
            return Ok(false);
        }
        let Ok(task) = store.get::<Task>(&current) else {
            return Ok(false);
        };
        match task.parent_path {
            Some(p) => current = p,
            None => return Ok(false),
        }
    }
}
