//! Task domain model

use crate::core::{context::TaskContext, error::TaskError, item::DataItem};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Result of pulling one element from a task stream
pub type ItemResult = Result<DataItem, TaskError>;

/// Lazy stream of items between pipeline stages
pub type ItemStream = BoxStream<'static, ItemResult>;

/// Executable logic of a task
///
/// A task turns its input stream into an output stream. Both are lazy: nothing
/// happens until the output is polled. Errors from upstream must be passed on,
/// never swallowed.
pub trait Task: Send + Sync {
    fn run(&self, input: ItemStream, ctx: TaskContext) -> ItemStream;
}

/// Which executable logic a task definition refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskKind {
    /// Split text into chunks
    Chunk,
    /// Attach embedding vectors
    Embed,
    /// Logic registered by the host under a custom name
    Custom(String),
}

impl TaskKind {
    /// Registry key for this kind
    pub fn key(&self) -> &str {
        match self {
            TaskKind::Chunk => "chunk",
            TaskKind::Embed => "embed",
            TaskKind::Custom(name) => name,
        }
    }
}

impl From<String> for TaskKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "chunk" => TaskKind::Chunk,
            "embed" => TaskKind::Embed,
            _ => TaskKind::Custom(value),
        }
    }
}

impl From<&str> for TaskKind {
    fn from(value: &str) -> Self {
        TaskKind::from(value.to_string())
    }
}

impl From<TaskKind> for String {
    fn from(kind: TaskKind) -> Self {
        kind.key().to_string()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A named, configured unit of work (reusable across pipelines)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: Uuid,
    pub name: String,
    pub kind: TaskKind,

    /// Task parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, kind: impl Into<TaskKind>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: kind.into(),
            params: Map::new(),
        }
    }

    /// Set a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Read an optional positive integer parameter
    pub fn param_usize(&self, key: &str) -> Result<Option<usize>, TaskError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .filter(|v| *v > 0)
                .map(|v| Some(v as usize))
                .ok_or_else(|| {
                    TaskError::validation(format!(
                        "task '{}': parameter '{}' must be a positive integer, got {}",
                        self.name, key, value
                    ))
                }),
        }
    }
}
