//! End-to-end scenario tests driven entirely through `CoordinatorHandle`,
//! covering the literal input/output scenarios tasks and statuses are
//! expected to satisfy.

use atlas_core::coordinator::messages::{BatchOp, OpResult, TaskUpdate};
use atlas_core::domain::{Task, TaskStatus, TaskType};
use atlas_core::error::ErrorKind;
use atlas_core::{Config, CoordinatorHandle};
use tempfile::TempDir;

async fn harness() -> (TempDir, CoordinatorHandle) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let handle = CoordinatorHandle::spawn(dir.path(), Config::default())
        .await
        .expect("failed to spawn coordinator");
    (dir, handle)
}

// S1 - basic lifecycle: PENDING -> IN_PROGRESS -> COMPLETED, version bumps each time.
#[tokio::test]
async fn s1_basic_lifecycle() {
    let (_dir, handle) = harness().await;

    let created = handle
        .create_task(Task::new("proj/build".into(), "Build".into(), TaskType::Task).unwrap())
        .await
        .unwrap();
    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.version, 1);

    let in_progress = handle
        .update_task(
            "proj/build".into(),
            TaskUpdate { status: Some(TaskStatus::InProgress), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(in_progress.status, TaskStatus::InProgress);
    assert_eq!(in_progress.version, 2);

    let completed = handle
        .update_task(
            "proj/build".into(),
            TaskUpdate { status: Some(TaskStatus::Completed), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.version, 3);
}

// S2 - dependency blocks completion until the dependency itself completes.
#[tokio::test]
async fn s2_dependency_blocks_completion() {
    let (_dir, handle) = harness().await;

    handle
        .create_task(Task::new("a".into(), "A".into(), TaskType::Task).unwrap())
        .await
        .unwrap();
    let mut b = Task::new("b".into(), "B".into(), TaskType::Task).unwrap();
    b.dependencies = vec!["a".into()];
    handle.create_task(b).await.unwrap();

    let err = handle
        .update_task("b".into(), TaskUpdate { status: Some(TaskStatus::Completed), ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BlockedByDependencies);
    assert_eq!(err.context.get("ctx").unwrap(), &serde_json::json!(["a"]));

    handle
        .update_task("a".into(), TaskUpdate { status: Some(TaskStatus::Completed), ..Default::default() })
        .await
        .unwrap();

    let completed = handle
        .update_task("b".into(), TaskUpdate { status: Some(TaskStatus::Completed), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
}

// S3 - a FAILED task blocks its dependents in the same commit.
#[tokio::test]
async fn s3_failure_propagates_to_blocked() {
    let (_dir, handle) = harness().await;

    handle
        .create_task(Task::new("a".into(), "A".into(), TaskType::Task).unwrap())
        .await
        .unwrap();
    let mut b = Task::new("b".into(), "B".into(), TaskType::Task).unwrap();
    b.dependencies = vec!["a".into()];
    handle.create_task(b).await.unwrap();

    let a = handle
        .update_task("a".into(), TaskUpdate { status: Some(TaskStatus::Failed), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(a.status, TaskStatus::Failed);

    let b = handle.get_task("b".into()).await.unwrap();
    assert_eq!(b.status, TaskStatus::Blocked);
}

// S4 - deleting a subtree removes it and nothing else.
#[tokio::test]
async fn s4_cascading_delete() {
    let (_dir, handle) = harness().await;

    handle.create_task(Task::new("r".into(), "R".into(), TaskType::Group).unwrap()).await.unwrap();
    let mut x = Task::new("r/x".into(), "X".into(), TaskType::Task).unwrap();
    x.parent_path = Some("r".into());
    handle.create_task(x).await.unwrap();
    let mut y = Task::new("r/x/y".into(), "Y".into(), TaskType::Task).unwrap();
    y.parent_path = Some("r/x".into());
    handle.create_task(y).await.unwrap();
    let mut z = Task::new("r/z".into(), "Z".into(), TaskType::Task).unwrap();
    z.parent_path = Some("r".into());
    handle.create_task(z).await.unwrap();

    handle.delete_task("r/x".into()).await.unwrap();

    assert!(handle.get_task("r/x".into()).await.is_err());
    assert!(handle.get_task("r/x/y".into()).await.is_err());
    assert!(handle.get_task("r".into()).await.is_ok());
    assert!(handle.get_task("r/z".into()).await.is_ok());
}

// S5 - glob scan matches single-segment wildcards only.
#[tokio::test]
async fn s5_glob_scan() {
    let (_dir, handle) = harness().await;

    for path in ["proj/a", "proj/b", "proj/sub/c", "other/a"] {
        let name = path.rsplit('/').next().unwrap().to_string();
        handle.create_task(Task::new(path.into(), name, TaskType::Task).unwrap()).await.unwrap();
    }

    let mut top_level: Vec<String> = handle
        .get_tasks_by_path("proj/*".into())
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.path)
        .collect();
    top_level.sort();
    assert_eq!(top_level, vec!["proj/a".to_string(), "proj/b".to_string()]);

    let nested: Vec<String> = handle
        .get_tasks_by_path("proj/*/c".into())
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.path)
        .collect();
    assert_eq!(nested, vec!["proj/sub/c".to_string()]);
}

// S6 - crash recovery: a committed write survives a restart of the coordinator.
#[tokio::test]
async fn s6_crash_recovery_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = Config::default();

    let handle = CoordinatorHandle::spawn(dir.path(), config.clone()).await.unwrap();
    handle.create_task(Task::new("t".into(), "T".into(), TaskType::Task).unwrap()).await.unwrap();
    handle.shutdown().await.unwrap();
    drop(handle);

    let restarted = CoordinatorHandle::spawn(dir.path(), config).await.unwrap();
    let t = restarted.get_task("t".into()).await.unwrap();
    assert_eq!(t.version, 1);
}

// Batch atomicity: a later failure rolls the whole batch back.
#[tokio::test]
async fn batch_rolls_back_on_failure() {
    let (_dir, handle) = harness().await;

    let ops = vec![
        BatchOp::Create(Task::new("batch/one".into(), "One".into(), TaskType::Task).unwrap()),
        BatchOp::Create(Task::new("batch/two".into(), "Two".into(), TaskType::Task).unwrap()),
        BatchOp::Delete { path: "batch/does-not-exist".into() },
    ];

    let results = handle.bulk_task_operations(ops).await.unwrap();
    assert!(matches!(results[2], OpResult::Failed(_)));

    assert!(handle.get_task("batch/one".into()).await.is_err());
    assert!(handle.get_task("batch/two".into()).await.is_err());
}
