//! Pipeline domain model

use crate::core::{config::PipelineConfig, error::PipelineError, task::TaskDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Position of a task within a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTask {
    pub ordinal: usize,
    pub task: TaskDefinition,
}

/// An ordered, immutable list of tasks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,

    /// Tasks sorted by ordinal (0..n, contiguous)
    tasks: Vec<PipelineTask>,
}

impl Pipeline {
    /// Create a pipeline; ordinals follow the order of `tasks`
    pub fn new(name: impl Into<String>, tasks: Vec<TaskDefinition>) -> Self {
        Pipeline {
            id: Uuid::new_v4(),
            name: name.into(),
            tasks: tasks
                .into_iter()
                .enumerate()
                .map(|(ordinal, task)| PipelineTask { ordinal, task })
                .collect(),
        }
    }

    /// Assemble a pipeline from stored associations
    ///
    /// Ordinals must be unique and contiguous from zero.
    pub fn from_parts(
        id: Uuid,
        name: impl Into<String>,
        mut tasks: Vec<PipelineTask>,
    ) -> Result<Self, PipelineError> {
        tasks.sort_by_key(|t| t.ordinal);

        for (expected, task) in tasks.iter().enumerate() {
            if task.ordinal != expected {
                return Err(PipelineError::Validation(format!(
                    "task ordinals must be unique and contiguous: expected {}, found {} ('{}')",
                    expected, task.ordinal, task.task.name
                )));
            }
        }

        Ok(Pipeline {
            id,
            name: name.into(),
            tasks,
        })
    }

    /// Create a pipeline from configuration
    ///
    /// With a pinned `id` the pipeline id is derived from it and the task
    /// list, so loading the same file twice gives the same pipeline while
    /// any edit to the tasks gives a new one. Task ids follow the pipeline
    /// id. Without a pinned id every load is a new pipeline.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let tasks = config.tasks.iter().map(|t| t.to_definition()).collect();
        let mut pipeline = Pipeline::new(config.name.clone(), tasks);
        if let Some(base) = config.id {
            let version = serde_json::to_vec(&config.tasks).unwrap_or_default();
            pipeline.id = Uuid::new_v5(&base, &version);
            for stage in &mut pipeline.tasks {
                stage.task.id = Uuid::new_v5(&pipeline.id, stage.task.name.as_bytes());
            }
        }
        pipeline
    }

    /// Tasks in execution order
    pub fn tasks(&self) -> &[PipelineTask] {
        &self.tasks
    }

    /// Get a task by name
    pub fn task(&self, name: &str) -> Option<&PipelineTask> {
        self.tasks.iter().find(|t| t.task.name == name)
    }

    /// Check that task names are unique
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.tasks.is_empty() {
            return Err(PipelineError::Validation(format!(
                "pipeline '{}' has no tasks",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.task.name.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate task name '{}' in pipeline '{}'",
                    task.task.name, self.name
                )));
            }
        }

        Ok(())
    }
}
