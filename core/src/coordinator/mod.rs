//! The coordinator actor: a single-threaded owner of `Store` + `TaskIndex`
//! + `AdaptiveCache` + `PathLocks`, reached only through `Command` messages.
//! One task owns the store; callers talk to it over channels instead of
//! sharing mutable state directly.

pub mod batch;
pub mod messages;
pub mod metrics;

use std::path::Path;

use taskstore::{Store, StoreConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::backup::{self, ImportSummary, RepairReport};
use crate::cache::AdaptiveCache;
use crate::config::Config;
use crate::domain::{Knowledge, Task, TaskStatus};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::hierarchy;
use crate::index::TaskIndex;
use crate::status::PathLocks;

use messages::{BatchOp, Command, OpResult, TaskUpdate};
use metrics::CoordinatorMetrics;

/// Handle to send commands to the coordinator actor. Cloning is cheap; all
/// clones share the same underlying channel and actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    /// Open the store at `{base_dir}/{name}`, rebuild the index, and spawn
    /// the actor task. Journal replay happens inside `Store::open`.
    pub async fn spawn(base_dir: &Path, config: Config) -> CoreResult<Self> {
        let store_config = StoreConfig {
            durability: taskstore::DurabilityLevel::Full,
            busy_timeout_ms: config.storage.busy_timeout_ms,
            mmap_size_bytes: config.storage.mmap_size_bytes,
            page_size: config.storage.page_size,
        };
        let mut store = Store::open(base_dir, &config.storage.name, &store_config)?;

        let mut index = TaskIndex::new(config.cache.cache_size, std::time::Duration::from_secs(config.cache.base_ttl_secs));
        index.rebuild(&store)?;
        info!(tasks = index.len(), "rebuilt index on startup");

        let cache = AdaptiveCache::new(
            config.cache.cache_size,
            std::time::Duration::from_secs(config.cache.base_ttl_secs),
            std::time::Duration::from_secs(config.cache.max_ttl_secs),
            config.cache.max_cache_memory_bytes,
        );

        run_startup_recovery(&mut store, &mut index)?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, index, cache, config, rx));
        info!("coordinator actor spawned");

        Ok(CoordinatorHandle { tx })
    }

    pub async fn create_task(&self, task: Task) -> CoreResult<Task> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CreateTask { task, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn update_task(&self, path: String, update: TaskUpdate) -> CoreResult<Task> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UpdateTask { path, update, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn delete_task(&self, path: String) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DeleteTask { path, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn get_task(&self, path: String) -> CoreResult<Task> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetTask { path, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> CoreResult<Vec<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetTasksByStatus { status, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn get_tasks_by_path(&self, pattern: String) -> CoreResult<Vec<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetTasksByPath { pattern, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn get_subtasks(&self, parent_path: String) -> CoreResult<Vec<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetSubtasks { parent_path, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn bulk_task_operations(&self, ops: Vec<BatchOp>) -> CoreResult<Vec<OpResult>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BulkTaskOperations { ops, reply }).await?;
        rx.await.map_err(channel_closed)
    }

    pub async fn create_knowledge(&self, knowledge: Knowledge) -> CoreResult<Knowledge> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CreateKnowledge { knowledge, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn clear_all_tasks(&self, confirm: bool) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClearAllTasks { confirm, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn vacuum_database(&self) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::VacuumDatabase { reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn get_metrics(&self) -> CoreResult<CoordinatorMetrics> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetMetrics { reply }).await?;
        rx.await.map_err(channel_closed)
    }

    pub async fn sync(&self) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Sync { reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn export_backup(&self) -> CoreResult<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Export { reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn import_backup(&self, bytes: Vec<u8>) -> CoreResult<ImportSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Import { bytes, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn repair_relationships(&self, dry_run: bool) -> CoreResult<RepairReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RepairRelationships { dry_run, reply }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn shutdown(&self) -> CoreResult<()> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| CoreError::internal("coordinator_handle", "actor channel closed"))
    }

    async fn send(&self, cmd: Command) -> CoreResult<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| CoreError::internal("coordinator_handle", "actor channel closed"))
    }
}

fn channel_closed(_: oneshot::error::RecvError) -> CoreError {
    CoreError::internal("coordinator_handle", "actor reply channel dropped")
}

/// Walk every task looking for dependency/parent references to paths that
/// no longer exist (left behind by an interrupted delete before journal
/// replay caught up) and drop the dangling edges. Runs once at startup,
/// after the index has been rebuilt from the recovered store.
fn run_startup_recovery(store: &mut Store, index: &mut TaskIndex) -> CoreResult<()> {
    let tasks = store.list_all::<Task>()?;
    for mut task in tasks {
        let mut changed = false;
        if let Some(parent) = &task.parent_path {
            if !store.exists::<Task>(parent)? {
                tracing::warn!(path = %task.path, parent = %parent, "dropping dangling parent reference found at startup");
                task.parent_path = None;
                changed = true;
            }
        }
        let valid_deps: Vec<String> = task
            .dependencies
            .iter()
            .filter(|d| store.exists::<Task>(d).unwrap_or(false))
            .cloned()
            .collect();
        if valid_deps.len() != task.dependencies.len() {
            tracing::warn!(path = %task.path, "dropping dangling dependency reference found at startup");
            task.dependencies = valid_deps;
            changed = true;
        }
        if changed {
            task.bump();
            let saved = store.update(task)?;
            index.upsert(&saved);
        }
    }
    Ok(())
}

async fn actor_loop(
    mut store: Store,
    mut index: TaskIndex,
    mut cache: AdaptiveCache,
    config: Config,
    mut rx: mpsc::Receiver<Command>,
) {
    let mut locks = PathLocks::new();
    let mut metrics = CoordinatorMetrics::default();
    debug!("coordinator actor loop started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::CreateTask { task, reply } => {
                let result = batch::create_task(&mut store, &mut index, &mut cache, &config.limits, task);
                if result.is_ok() {
                    metrics.tasks_created += 1;
                }
                cache.check_backpressure();
                let _ = reply.send(result);
            }

            Command::UpdateTask { path, update, reply } => {
                let result = batch::update_task(&mut store, &mut index, &mut locks, &mut cache, &config.limits, &path, update);
                if result.is_ok() {
                    metrics.tasks_updated += 1;
                }
                cache.check_backpressure();
                let _ = reply.send(result);
            }

            Command::DeleteTask { path, reply } => {
                let result = batch::delete_task(&mut store, &mut index, &mut locks, &mut cache, &config.limits, &path);
                if result.is_ok() {
                    metrics.tasks_deleted += 1;
                }
                let _ = reply.send(result);
            }

            Command::GetTask { path, reply } => {
                let result = if let Some(cached) = cache.get(&path) {
                    metrics.cache_hits += 1;
                    Ok(cached)
                } else {
                    metrics.cache_misses += 1;
                    store.get::<Task>(&path).map_err(CoreError::from).inspect(|t| cache.put(t.clone()))
                };
                let _ = reply.send(result);
            }

            Command::GetTasksByStatus { status, reply } => {
                let paths = index.by_status(status.as_str());
                let tasks: Vec<Task> = paths.iter().filter_map(|p| store.get::<Task>(p).ok()).collect();
                let _ = reply.send(Ok(tasks));
            }

            Command::GetTasksByPath { pattern, reply } => {
                let result = store.scan::<Task>(&pattern).map_err(CoreError::from);
                let _ = reply.send(result);
            }

            Command::GetSubtasks { parent_path, reply } => {
                let result = hierarchy::get_children(&store, &index, &parent_path);
                let _ = reply.send(result);
            }

            Command::BulkTaskOperations { ops, reply } => {
                let op_count = ops.len();
                let results = batch::execute_batch(&mut store, &mut index, &mut locks, &mut cache, &config.limits, ops);
                metrics.batches_executed += 1;
                metrics.batch_ops_executed += op_count as u64;
                metrics.batch_ops_failed += results.iter().filter(|r| matches!(r, OpResult::Failed(_))).count() as u64;
                cache.check_backpressure();
                let _ = reply.send(results);
            }

            Command::CreateKnowledge { knowledge, reply } => {
                let result = store.create(knowledge).map_err(CoreError::from);
                let _ = reply.send(result);
            }

            Command::ClearAllTasks { confirm, reply } => {
                let result = clear_all_tasks(&mut store, &mut index, &mut cache, confirm);
                if result.is_ok() {
                    metrics.cache_clears += 1;
                }
                let _ = reply.send(result);
            }

            Command::VacuumDatabase { reply } => {
                let result = store.sync().map(|_| ()).map_err(CoreError::from);
                if result.is_ok() {
                    metrics.checkpoints += 1;
                }
                let _ = reply.send(result);
            }

            Command::GetMetrics { reply } => {
                let _ = reply.send(metrics.clone());
            }

            Command::Sync { reply } => {
                let result = store.sync().map(|_| ()).map_err(CoreError::from);
                if result.is_ok() {
                    metrics.checkpoints += 1;
                }
                let _ = reply.send(result);
            }

            Command::Export { reply } => {
                let timestamp = chrono::Utc::now().to_rfc3339();
                let result = backup::export_backup(&store, timestamp);
                let _ = reply.send(result);
            }

            Command::Import { bytes, reply } => {
                let result = backup::import_backup(&mut store, &mut index, &bytes);
                if result.is_ok() {
                    cache.check_backpressure();
                }
                let _ = reply.send(result);
            }

            Command::RepairRelationships { dry_run, reply } => {
                let result = backup::repair_relationships(&mut store, &mut index, &config.limits, None, dry_run);
                let _ = reply.send(result);
            }

            Command::Shutdown => {
                info!("coordinator actor shutting down");
                break;
            }
        }
    }

    debug!("coordinator actor loop stopped");
}

fn clear_all_tasks(store: &mut Store, index: &mut TaskIndex, cache: &mut AdaptiveCache, confirm: bool) -> CoreResult<()> {
    if !confirm {
        return Err(CoreError::validation(ErrorKind::PathInvalid, "clear_all_tasks", "confirm must be true to clear all tasks"));
    }
    for task in store.list_all::<Task>()? {
        store.delete::<Task>(&task.path)?;
    }
    *index = TaskIndex::new(1, std::time::Duration::from_secs(1));
    index.rebuild(store)?;
    cache.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_get_delete_round_trip() {
        let dir = tempdir().unwrap();
        let handle = CoordinatorHandle::spawn(dir.path(), Config::default()).await.unwrap();

        let task = Task::new("proj/a".into(), "A".into(), TaskType::Task).unwrap();
        handle.create_task(task).await.unwrap();

        let got = handle.get_task("proj/a".into()).await.unwrap();
        assert_eq!(got.name, "A");

        handle.delete_task("proj/a".into()).await.unwrap();
        assert!(handle.get_task("proj/a".into()).await.is_err());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn clear_all_tasks_requires_confirmation() {
        let dir = tempdir().unwrap();
        let handle = CoordinatorHandle::spawn(dir.path(), Config::default()).await.unwrap();
        handle.create_task(Task::new("a".into(), "A".into(), TaskType::Task).unwrap()).await.unwrap();

        assert!(handle.clear_all_tasks(false).await.is_err());
        handle.clear_all_tasks(true).await.unwrap();
        assert!(handle.get_task("a".into()).await.is_err());

        handle.shutdown().await.unwrap();
    }
}
