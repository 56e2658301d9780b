//! `Relationship` exists only for the backup/export pipeline: it describes
//! an edge between two entities in a form a graph-database importer can
//! consume. The core never traverses relationships itself — task
//! hierarchy/dependency traversal uses the indices in [`crate::hierarchy`]
//! and [`crate::dependency`] instead.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub source_label: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub target_id: String,
    pub target_label: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl Relationship {
    pub fn parent_of(parent_path: &str, child_path: &str) -> Self {
        Relationship {
            source_id: parent_path.to_string(),
            source_label: "Task".to_string(),
            rel_type: "PARENT_OF".to_string(),
            target_id: child_path.to_string(),
            target_label: "Task".to_string(),
            properties: serde_json::json!({}),
        }
    }

    pub fn depends_on(dependent_path: &str, dependency_path: &str) -> Self {
        Relationship {
            source_id: dependent_path.to_string(),
            source_label: "Task".to_string(),
            rel_type: "DEPENDS_ON".to_string(),
            target_id: dependency_path.to_string(),
            target_label: "Task".to_string(),
            properties: serde_json::json!({}),
        }
    }
}
