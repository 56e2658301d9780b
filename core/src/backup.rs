//! Backup export/import and relationship repair.
//!
//! Export produces a gzip-compressed JSON snapshot (`metadata`, `projects`,
//! `tasks`, `knowledge`, `relationships`) for offline storage or import into
//! a graph database. Import regenerates `Knowledge` ids rather than trusting
//! the exported ones — `Task.path` is the domain key itself, not an
//! internal id, so paths round-trip unchanged.

use std::collections::BTreeSet;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use taskstore::Store;

use crate::config::LimitsConfig;
use crate::domain::{Knowledge, Relationship, Task};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::index::TaskIndex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub timestamp: String,
    pub version: String,
    pub database_info: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFile {
    pub metadata: BackupMetadata,
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
    pub knowledge: Vec<Knowledge>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Derive the `projects` list and `PARENT_OF`/`DEPENDS_ON` relationship
/// edges from the tasks currently in the store; these aren't stored
/// records in their own right, so export has to reconstruct them.
fn derive_projects(tasks: &[Task]) -> Vec<Project> {
    let mut paths: BTreeSet<String> = BTreeSet::new();
    for task in tasks {
        paths.insert(task.project_path.clone());
    }
    paths
        .into_iter()
        .map(|path| Project { name: path.clone(), path })
        .collect()
}

fn derive_relationships(tasks: &[Task]) -> Vec<Relationship> {
    let mut out = Vec::new();
    for task in tasks {
        if let Some(parent) = &task.parent_path {
            out.push(Relationship::parent_of(parent, &task.path));
        }
        for dep in &task.dependencies {
            out.push(Relationship::depends_on(&task.path, dep));
        }
    }
    out
}

/// Build a gzip-compressed JSON backup of every task and knowledge record
/// currently in the store. `timestamp` is supplied by the caller since
/// this layer never reads the wall clock itself.
pub fn export_backup(store: &Store, timestamp: String) -> CoreResult<Vec<u8>> {
    let tasks = store.list_all::<Task>()?;
    let knowledge = store.list_all::<Knowledge>()?;
    let relationships = derive_relationships(&tasks);
    let projects = derive_projects(&tasks);

    let backup = BackupFile {
        metadata: BackupMetadata {
            timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
            database_info: serde_json::json!({
                "taskCount": tasks.len(),
                "knowledgeCount": knowledge.len(),
            }),
        },
        projects,
        tasks,
        knowledge,
        relationships,
    };

    let json = serde_json::to_vec(&backup)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| CoreError::internal("export_backup", e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CoreError::internal("export_backup", e.to_string()))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub tasks_imported: usize,
    pub knowledge_imported: usize,
}

/// Decompress and parse `bytes`, refusing anything missing `metadata`,
/// `projects`, `tasks`, or `knowledge`, then load tasks and knowledge into
/// the store. Knowledge ids are regenerated; task paths are kept as-is
/// since they are the record's natural key, not an internal id.
pub fn import_backup(
    store: &mut Store,
    index: &mut TaskIndex,
    bytes: &[u8],
) -> CoreResult<ImportSummary> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = String::new();
    decoder
        .read_to_string(&mut json)
        .map_err(|e| CoreError::validation(ErrorKind::PathInvalid, "import_backup", format!("not a valid gzip backup: {e}")))?;

    let raw: serde_json::Value = serde_json::from_str(&json)?;
    for required in ["metadata", "projects", "tasks", "knowledge"] {
        if raw.get(required).is_none() {
            return Err(CoreError::validation(
                ErrorKind::PathInvalid,
                "import_backup",
                format!("backup file is missing required field '{required}'"),
            ));
        }
    }
    let backup: BackupFile = serde_json::from_value(raw)?;

    let mut summary = ImportSummary::default();
    for task in backup.tasks {
        let imported = if store.exists::<Task>(&task.path)? {
            let mut next = task;
            let current = store.get::<Task>(&next.path)?;
            next.version = current.version + 1;
            store.update(next)?
        } else {
            store.create(task)?
        };
        index.upsert(&imported);
        summary.tasks_imported += 1;
    }
    for mut knowledge in backup.knowledge {
        knowledge.id = uuid::Uuid::new_v4().to_string();
        store.create(knowledge)?;
        summary.knowledge_imported += 1;
    }
    Ok(summary)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub fixed: u64,
    pub issues: Vec<String>,
}

/// Find tasks whose `parentPath`/`dependencies` reference a path that no
/// longer exists, optionally restricted to paths matching `path_pattern`.
/// With `dry_run`, only reports what would be fixed.
pub fn repair_relationships(
    store: &mut Store,
    index: &mut TaskIndex,
    _limits: &LimitsConfig,
    path_pattern: Option<&str>,
    dry_run: bool,
) -> CoreResult<RepairReport> {
    let candidates: Vec<Task> = match path_pattern {
        Some(pattern) => store.scan::<Task>(pattern)?,
        None => store.list_all::<Task>()?,
    };

    let mut report = RepairReport::default();
    for mut task in candidates {
        let mut dirty = false;
        if let Some(parent) = &task.parent_path {
            if !store.exists::<Task>(parent)? {
                report
                    .issues
                    .push(format!("{}: parent {} does not exist", task.path, parent));
                if !dry_run {
                    task.parent_path = None;
                    dirty = true;
                }
            }
        }
        let missing_deps: Vec<String> = task
            .dependencies
            .iter()
            .filter(|d| !store.exists::<Task>(d).unwrap_or(false))
            .cloned()
            .collect();
        if !missing_deps.is_empty() {
            for dep in &missing_deps {
                report
                    .issues
                    .push(format!("{}: dependency {} does not exist", task.path, dep));
            }
            if !dry_run {
                task.dependencies.retain(|d| !missing_deps.contains(d));
                dirty = true;
            }
        }
        if dirty {
            task.bump();
            let saved = store.update(task)?;
            index.upsert(&saved);
            report.fixed += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use std::time::Duration;
    use taskstore::StoreConfig;
    use tempfile::tempdir;

    fn harness() -> (tempfile::TempDir, Store, TaskIndex) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "t", &StoreConfig::default()).unwrap();
        let index = TaskIndex::new(100, Duration::from_secs(60));
        (dir, store, index)
    }

    #[test]
    fn export_then_import_round_trips_tasks() {
        let (_dir, mut store, mut index) = harness();
        let t = Task::new("proj/a".into(), "A".into(), TaskType::Task).unwrap();
        store.create(t).unwrap();
        index.upsert(&store.get::<Task>("proj/a").unwrap());

        let bytes = export_backup(&store, "2026-01-01T00:00:00Z".to_string()).unwrap();

        let (_dir2, mut store2, mut index2) = harness();
        let summary = import_backup(&mut store2, &mut index2, &bytes).unwrap();
        assert_eq!(summary.tasks_imported, 1);
        assert!(store2.exists::<Task>("proj/a").unwrap());
    }

    #[test]
    fn import_rejects_file_missing_required_field() {
        let (_dir, mut store, mut index) = harness();
        let bad = serde_json::json!({"metadata": {}, "tasks": []});
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bad.to_string().as_bytes()).unwrap();
        let bytes = encoder.finish().unwrap();

        let err = import_backup(&mut store, &mut index, &bytes);
        assert!(err.is_err());
    }

    #[test]
    fn repair_relationships_drops_dangling_parent() {
        let (_dir, mut store, mut index) = harness();
        let mut t = Task::new("a/b".into(), "B".into(), TaskType::Task).unwrap();
        t.parent_path = Some("a".into());
        store.create(t.clone()).unwrap();
        index.upsert(&t);

        let report = repair_relationships(&mut store, &mut index, &LimitsConfig::default(), None, false).unwrap();
        assert_eq!(report.fixed, 1);
        let fixed: Task = store.get("a/b").unwrap();
        assert!(fixed.parent_path.is_none());
    }

    #[test]
    fn repair_relationships_dry_run_does_not_modify() {
        let (_dir, mut store, mut index) = harness();
        let mut t = Task::new("a/b".into(), "B".into(), TaskType::Task).unwrap();
        t.parent_path = Some("a".into());
        store.create(t.clone()).unwrap();
        index.upsert(&t);

        let report = repair_relationships(&mut store, &mut index, &LimitsConfig::default(), None, true).unwrap();
        assert_eq!(report.fixed, 0);
        assert_eq!(report.issues.len(), 1);
        let unchanged: Task = store.get("a/b").unwrap();
        assert!(unchanged.parent_path.is_some());
    }
}
