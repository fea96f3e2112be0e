//! Registries of pipelines and task factories

use crate::core::{Pipeline, PipelineError, Task, TaskDefinition, TaskError, TaskKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Builds an executable task from its definition
pub type TaskFactory = Arc<dyn Fn(&TaskDefinition) -> Result<Arc<dyn Task>, TaskError> + Send + Sync>;

/// Maps task kinds to the logic that executes them
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for a kind
    pub fn register<F>(&mut self, kind: impl Into<TaskKind>, factory: F)
    where
        F: Fn(&TaskDefinition) -> Result<Arc<dyn Task>, TaskError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        self.factories.insert(kind.key().to_string(), Arc::new(factory));
    }

    /// Build the executable task for a definition
    pub fn build(&self, definition: &TaskDefinition) -> Result<Arc<dyn Task>, PipelineError> {
        let factory = self.factories.get(definition.kind.key()).ok_or_else(|| {
            PipelineError::Validation(format!(
                "task '{}' has unknown kind '{}'",
                definition.name, definition.kind
            ))
        })?;

        factory(definition).map_err(|err| {
            PipelineError::Validation(format!("task '{}': {}", definition.name, err.detail))
        })
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.factories.contains_key(kind.key())
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// Registered pipelines, shared between the engine and its callers
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    pipelines: Arc<RwLock<HashMap<Uuid, Arc<Pipeline>>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline; registered pipelines are immutable
    pub async fn register(&self, pipeline: Pipeline) -> Result<Arc<Pipeline>, PipelineError> {
        pipeline.validate()?;

        let mut pipelines = self.pipelines.write().await;
        if pipelines.contains_key(&pipeline.id) {
            return Err(PipelineError::Validation(format!(
                "pipeline {} is already registered",
                pipeline.id
            )));
        }

        info!(pipeline_id = %pipeline.id, name = %pipeline.name, tasks = pipeline.tasks().len(), "Pipeline registered");
        let pipeline = Arc::new(pipeline);
        pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    pub async fn get(&self, pipeline_id: Uuid) -> Option<Arc<Pipeline>> {
        self.pipelines.read().await.get(&pipeline_id).cloned()
    }

    /// All pipelines, sorted by name
    pub async fn list(&self) -> Vec<Arc<Pipeline>> {
        let mut pipelines: Vec<_> = self.pipelines.read().await.values().cloned().collect();
        pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        pipelines
    }

    pub async fn remove(&self, pipeline_id: Uuid) -> Option<Arc<Pipeline>> {
        self.pipelines.write().await.remove(&pipeline_id)
    }
}
