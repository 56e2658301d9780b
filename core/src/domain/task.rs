//! The `Task` record: the central entity the whole crate revolves around.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{now_ms, IndexValue, Record};

use crate::error::{CoreError, CoreResult, ErrorKind};

pub const MAX_PATH_DEPTH: usize = 10;
pub const MAX_SEGMENT_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 2000;
pub const MAX_REASONING_LEN: usize = 2000;

/// Kind of task node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Task,
    Milestone,
    Group,
}

/// Lifecycle status; transitions are governed by [`crate::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Blocked => "BLOCKED",
        }
    }

    /// Parse a status name as accepted on the wire (case-insensitive).
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "BLOCKED" => Ok(TaskStatus::Blocked),
            other => Err(CoreError::status_unknown("task_status_parse", format!("unknown status '{other}'"))),
        }
    }
}

/// Categorized notes, plus a legacy flat list carried over from an earlier
/// format that callers may still send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notes {
    #[serde(default)]
    pub planning: Vec<String>,
    #[serde(default)]
    pub progress: Vec<String>,
    #[serde(default)]
    pub completion: Vec<String>,
    #[serde(default)]
    pub troubleshooting: Vec<String>,
    #[serde(default)]
    pub legacy: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub parent_path: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub project_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub notes: Notes,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub status_metadata: HashMap<String, serde_json::Value>,
    pub created: i64,
    pub updated: i64,
    pub version: u64,
}

impl Task {
    /// Construct a brand-new task at `PENDING`, `version = 1`.
    pub fn new(path: String, name: String, task_type: TaskType) -> CoreResult<Self> {
        validate_path(&path)?;
        if name.is_empty() || name.chars().count() > 200 {
            return Err(CoreError::name_required("task_new", "name must be 1-200 characters"));
        }
        let project_path = path.split('/').next().unwrap_or(&path).to_string();
        let now = now_ms();
        Ok(Task {
            path,
            name,
            task_type,
            status: TaskStatus::Pending,
            parent_path: None,
            dependencies: Vec::new(),
            project_path,
            description: String::new(),
            reasoning: String::new(),
            notes: Notes::default(),
            metadata: HashMap::new(),
            status_metadata: HashMap::new(),
            created: now,
            updated: now,
            version: 1,
        })
    }

    pub fn depth(&self) -> usize {
        self.path.split('/').count()
    }

    pub fn bump(&mut self) {
        self.version += 1;
        self.updated = now_ms();
    }
}

/// Validate a path: non-empty, `/`-separated segments matching
/// `[A-Za-z0-9_-]+`, depth <= [`MAX_PATH_DEPTH`], each segment
/// <= [`MAX_SEGMENT_LEN`] characters.
pub fn validate_path(path: &str) -> CoreResult<()> {
    if path.is_empty() {
        return Err(CoreError::validation(ErrorKind::PathInvalid, "validate_path", "path must not be empty"));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > MAX_PATH_DEPTH {
        return Err(CoreError::limit_exceeded(format!(
            "path depth {} exceeds max {}",
            segments.len(),
            MAX_PATH_DEPTH
        )));
    }
    for segment in &segments {
        if segment.is_empty() || segment.len() > MAX_SEGMENT_LEN {
            return Err(CoreError::validation(
                ErrorKind::PathInvalid,
                "validate_path",
                format!("segment '{segment}' must be 1-{MAX_SEGMENT_LEN} characters"),
            ));
        }
        if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(CoreError::validation(
                ErrorKind::PathInvalid,
                "validate_path",
                format!("segment '{segment}' contains invalid characters"),
            ));
        }
    }
    Ok(())
}

impl Record for Task {
    fn id(&self) -> String {
        self.path.clone()
    }

    fn updated_at(&self) -> i64 {
        self.updated
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".into(), IndexValue::String(self.status.as_str().to_string()));
        fields.insert(
            "project".into(),
            IndexValue::String(self.project_path.clone()),
        );
        if let Some(parent) = &self.parent_path {
            fields.insert("parent".into(), IndexValue::String(parent.clone()));
        }
        fields.insert(
            "dependencies".into(),
            IndexValue::List(self.dependencies.clone()),
        );
        fields
    }

    fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    fn version(&self) -> Option<u64> {
        Some(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending_version_one() {
        let t = Task::new("proj/build".into(), "Build".into(), TaskType::Task).unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.version, 1);
        assert_eq!(t.project_path, "proj");
    }

    #[test]
    fn new_task_rejects_empty_name() {
        let err = Task::new("a".into(), "".into(), TaskType::Task).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NameRequired);
    }

    #[test]
    fn task_status_parse_round_trips_as_str() {
        for s in [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Blocked] {
            assert_eq!(TaskStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn task_status_parse_rejects_unknown() {
        let err = TaskStatus::parse("NOT_A_STATUS").unwrap_err();
        assert_eq!(err.kind, ErrorKind::StatusUnknown);
    }

    #[test]
    fn validate_path_rejects_too_deep() {
        let deep = (0..11).map(|i| i.to_string()).collect::<Vec<_>>().join("/");
        assert!(validate_path(&deep).is_err());
    }

    #[test]
    fn validate_path_rejects_bad_characters() {
        assert!(validate_path("proj/has space").is_err());
        assert!(validate_path("proj/has.dot").is_err());
    }

    #[test]
    fn validate_path_accepts_max_depth() {
        let ok = (0..10).map(|i| format!("s{i}")).collect::<Vec<_>>().join("/");
        assert!(validate_path(&ok).is_ok());
    }

    #[test]
    fn indexed_fields_include_dependencies_as_list() {
        let mut t = Task::new("a".into(), "A".into(), TaskType::Task).unwrap();
        t.dependencies = vec!["b".into(), "c".into()];
        let fields = t.indexed_fields();
        match fields.get("dependencies").unwrap() {
            IndexValue::List(items) => assert_eq!(items, &vec!["b".to_string(), "c".to_string()]),
            _ => panic!("expected list"),
        }
    }
}
