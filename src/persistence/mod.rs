//! Persistence layer for run records and item statuses

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{DataItemStatus, PipelineRun, TaskRun};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of trying to claim the active slot for a (pipeline, dataset) pair
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The run was inserted and now holds the slot
    Begun,
    /// Another run already holds the slot
    Conflict(PipelineRun),
}

/// Selection of runs for history queries
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub pipeline_id: Option<Uuid>,
    pub dataset_id: Option<String>,

    /// Maximum number of runs, newest first
    pub limit: Option<usize>,
}

impl RunFilter {
    fn matches(&self, run: &PipelineRun) -> bool {
        self.pipeline_id.map_or(true, |id| run.pipeline_id == id)
            && self
                .dataset_id
                .as_deref()
                .map_or(true, |id| run.dataset_id == id)
    }
}

/// Storage for pipeline runs, task runs and data item statuses
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert `run` unless an active run exists for its (pipeline, dataset)
    ///
    /// The check and the insert must be a single atomic operation.
    async fn try_begin_run(&self, run: &PipelineRun) -> Result<BeginOutcome>;

    /// Persist the current state of a run
    async fn update_run(&self, run: &PipelineRun) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;

    /// List runs matching `filter`, newest first
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<PipelineRun>>;

    /// Delete a run and its task runs; returns whether the run existed
    async fn delete_run(&self, run_id: Uuid) -> Result<bool>;

    async fn insert_task_run(&self, task_run: &TaskRun) -> Result<()>;

    async fn update_task_run(&self, task_run: &TaskRun) -> Result<()>;

    async fn load_task_run(&self, task_run_id: Uuid) -> Result<Option<TaskRun>>;

    /// Task runs of a pipeline run, by ordinal
    async fn list_task_runs(&self, run_id: Uuid) -> Result<Vec<TaskRun>>;

    /// All item statuses recorded for a dataset
    async fn load_item_statuses(&self, dataset_id: &str) -> Result<Vec<DataItemStatus>>;

    async fn upsert_item_status(&self, status: &DataItemStatus) -> Result<()>;
}

#[derive(Default)]
struct MemoryTables {
    runs: HashMap<Uuid, PipelineRun>,
    task_runs: HashMap<Uuid, TaskRun>,
    items: HashMap<(String, String), DataItemStatus>,
}

/// In-memory store (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryRunStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn try_begin_run(&self, run: &PipelineRun) -> Result<BeginOutcome> {
        let mut tables = self.tables.write().await;

        let active = tables.runs.values().find(|existing| {
            existing.pipeline_id == run.pipeline_id
                && existing.dataset_id == run.dataset_id
                && existing.status.is_active()
        });
        if let Some(existing) = active {
            return Ok(BeginOutcome::Conflict(existing.clone()));
        }

        tables.runs.insert(run.id, run.clone());
        Ok(BeginOutcome::Begun)
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.runs.get_mut(&run.id) {
            Some(stored) => {
                *stored = run.clone();
                Ok(())
            }
            None => anyhow::bail!("Pipeline run {} does not exist", run.id),
        }
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let tables = self.tables.read().await;
        Ok(tables.runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<PipelineRun>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<_> = tables
            .runs
            .values()
            .filter(|run| filter.matches(run))
            .cloned()
            .collect();

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let existed = tables.runs.remove(&run_id).is_some();
        tables
            .task_runs
            .retain(|_, task_run| task_run.pipeline_run_id != run_id);
        Ok(existed)
    }

    async fn insert_task_run(&self, task_run: &TaskRun) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.runs.contains_key(&task_run.pipeline_run_id) {
            anyhow::bail!("Pipeline run {} does not exist", task_run.pipeline_run_id);
        }
        tables.task_runs.insert(task_run.id, task_run.clone());
        Ok(())
    }

    async fn update_task_run(&self, task_run: &TaskRun) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.task_runs.get_mut(&task_run.id) {
            Some(stored) => {
                *stored = task_run.clone();
                Ok(())
            }
            None => anyhow::bail!("Task run {} does not exist", task_run.id),
        }
    }

    async fn load_task_run(&self, task_run_id: Uuid) -> Result<Option<TaskRun>> {
        let tables = self.tables.read().await;
        Ok(tables.task_runs.get(&task_run_id).cloned())
    }

    async fn list_task_runs(&self, run_id: Uuid) -> Result<Vec<TaskRun>> {
        let tables = self.tables.read().await;
        let mut task_runs: Vec<_> = tables
            .task_runs
            .values()
            .filter(|task_run| task_run.pipeline_run_id == run_id)
            .cloned()
            .collect();
        task_runs.sort_by_key(|task_run| task_run.ordinal);
        Ok(task_runs)
    }

    async fn load_item_statuses(&self, dataset_id: &str) -> Result<Vec<DataItemStatus>> {
        let tables = self.tables.read().await;
        Ok(tables
            .items
            .values()
            .filter(|status| status.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn upsert_item_status(&self, status: &DataItemStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.items.insert(
            (status.dataset_id.clone(), status.fingerprint.clone()),
            status.clone(),
        );
        Ok(())
    }
}
