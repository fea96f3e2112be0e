//! Data items flowing between tasks

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Compute the content fingerprint (hex SHA-256) used as the dedup key
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A single unit of data moving through a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    /// Unique item identifier
    pub id: Uuid,

    /// Text content
    pub content: String,

    /// Fingerprint of the source item this one derives from
    pub origin: String,

    /// Free-form metadata attached by the source or by tasks
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Embedding vector, once computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl DataItem {
    /// Create a source item; its origin is the fingerprint of its own content
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            origin: fingerprint(&content),
            content,
            metadata: Map::new(),
            embedding: None,
        }
    }

    /// Create an item derived from this one (keeps the origin)
    pub fn derive(&self, content: impl Into<String>) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.insert("parent_id".to_string(), Value::String(self.id.to_string()));
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            origin: self.origin.clone(),
            metadata,
            embedding: None,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
