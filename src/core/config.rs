//! Pipeline configuration from YAML

use crate::core::{
    task::{TaskDefinition, TaskKind},
    Pipeline,
};
use crate::execution::retry::RetryPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Stable identity; the pipeline id is derived from it and the task list
    /// (a fresh one is generated when absent)
    #[serde(default)]
    pub id: Option<Uuid>,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Pipeline tasks, in execution order
    pub tasks: Vec<TaskConfig>,

    /// Retry policy for external calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Task configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name, unique within the pipeline
    pub name: String,

    /// Executable logic (`chunk`, `embed` or a registered custom kind)
    pub kind: TaskKind,

    /// Task parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskConfig {
    pub fn to_definition(&self) -> TaskDefinition {
        TaskDefinition {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            params: self.params.clone(),
        }
    }
}

/// Backoff settings, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound on the total time spent retrying one call
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    8_000
}

fn default_max_delay_ms() -> u64 {
    128_000
}

fn default_max_elapsed_ms() -> u64 {
    128_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            Duration::from_millis(self.max_elapsed_ms),
        )
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Simultaneous outstanding calls to the provider
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_dimensions() -> usize {
    1024
}

fn default_batch_size() -> usize {
    100
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        if self.tasks.is_empty() {
            anyhow::bail!("Pipeline '{}' must declare at least one task", self.name);
        }

        // Check that all task names are unique
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                anyhow::bail!("Pipeline '{}' has a task without a name", self.name);
            }
            if !seen.insert(&task.name) {
                anyhow::bail!("Duplicate task name: {}", task.name);
            }
        }

        let retry = &self.retry;
        if retry.initial_delay_ms == 0 || retry.max_delay_ms == 0 || retry.max_elapsed_ms == 0 {
            anyhow::bail!("Retry delays must be positive");
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            anyhow::bail!(
                "Retry initial_delay_ms ({}) exceeds max_delay_ms ({})",
                retry.initial_delay_ms,
                retry.max_delay_ms
            );
        }

        let embedding = &self.embedding;
        if embedding.dimensions == 0 || embedding.batch_size == 0 || embedding.max_concurrent == 0 {
            anyhow::bail!("Embedding dimensions, batch_size and max_concurrent must be positive");
        }

        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
