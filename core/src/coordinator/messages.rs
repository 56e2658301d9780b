//! Message types exchanged between [`super::handle::CoordinatorHandle`] and
//! the actor loop in [`super`].

use tokio::sync::oneshot;

use crate::domain::{Knowledge, Task, TaskStatus};
use crate::error::CoreError;

/// One operation inside a [`bulkTaskOperations`](super::batch) batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Create(Task),
    Update { path: String, update: TaskUpdate },
    Delete { path: String },
}

/// A partial update: unset fields are left untouched on the stored task.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub status: Option<TaskStatus>,
    pub parent_path: Option<Option<String>>,
    pub dependencies: Option<Vec<String>>,
    pub description: Option<String>,
    pub reasoning: Option<String>,
    pub metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
    /// Caller's optimistic-concurrency token: if set, must equal the
    /// currently stored task's version or the update fails with
    /// `VERSION_CONFLICT` before anything is staged.
    pub expected_version: Option<u64>,
}

/// Outcome of one operation within a batch.
#[derive(Debug, Clone)]
pub enum OpResult {
    Ok(Task),
    Failed(CoreError),
    NotExecuted,
}

pub enum Command {
    CreateTask {
        task: Task,
        reply: oneshot::Sender<Result<Task, CoreError>>,
    },
    UpdateTask {
        path: String,
        update: TaskUpdate,
        reply: oneshot::Sender<Result<Task, CoreError>>,
    },
    DeleteTask {
        path: String,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    GetTask {
        path: String,
        reply: oneshot::Sender<Result<Task, CoreError>>,
    },
    GetTasksByStatus {
        status: TaskStatus,
        reply: oneshot::Sender<Result<Vec<Task>, CoreError>>,
    },
    GetTasksByPath {
        pattern: String,
        reply: oneshot::Sender<Result<Vec<Task>, CoreError>>,
    },
    GetSubtasks {
        parent_path: String,
        reply: oneshot::Sender<Result<Vec<Task>, CoreError>>,
    },
    BulkTaskOperations {
        ops: Vec<BatchOp>,
        reply: oneshot::Sender<Vec<OpResult>>,
    },
    CreateKnowledge {
        knowledge: Knowledge,
        reply: oneshot::Sender<Result<Knowledge, CoreError>>,
    },
    ClearAllTasks {
        confirm: bool,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    VacuumDatabase {
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    GetMetrics {
        reply: oneshot::Sender<super::metrics::CoordinatorMetrics>,
    },
    Sync {
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Export {
        reply: oneshot::Sender<Result<Vec<u8>, CoreError>>,
    },
    Import {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<crate::backup::ImportSummary, CoreError>>,
    },
    RepairRelationships {
        dry_run: bool,
        reply: oneshot::Sender<Result<crate::backup::RepairReport, CoreError>>,
    },
    Shutdown,
}
