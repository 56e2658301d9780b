//! `Knowledge` is a secondary entity the core persists and retrieves but
//! never interprets: free-form text tagged to a project/domain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{now_ms, IndexValue, Record};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    pub id: String,
    pub project_path: String,
    pub domain: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub citations: Vec<String>,
    pub created: i64,
    pub updated: i64,
}

impl Knowledge {
    pub fn new(project_path: String, domain: String, text: String) -> Self {
        let now = now_ms();
        Knowledge {
            id: Uuid::new_v4().to_string(),
            project_path,
            domain,
            text,
            tags: Vec::new(),
            citations: Vec::new(),
            created: now,
            updated: now,
        }
    }
}

impl Record for Knowledge {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn updated_at(&self) -> i64 {
        self.updated
    }

    fn collection_name() -> &'static str {
        "knowledge"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("project".into(), IndexValue::String(self.project_path.clone()));
        fields.insert("domain".into(), IndexValue::String(self.domain.clone()));
        fields.insert("tags".into(), IndexValue::List(self.tags.clone()));
        fields
    }

    fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_knowledge_generates_unique_ids() {
        let a = Knowledge::new("proj".into(), "infra".into(), "text".into());
        let b = Knowledge::new("proj".into(), "infra".into(), "text".into());
        assert_ne!(a.id, b.id);
    }
}
