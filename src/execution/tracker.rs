//! Run tracker - owns the lifecycle of pipeline runs and task runs

use crate::core::{DataItemStatus, ItemState, PipelineError, PipelineRun, TaskRun, TaskRunStatus};
use crate::execution::events::{ErrorPayload, RunSummary};
use crate::persistence::{BeginOutcome, RunFilter, RunStore};
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a task run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Errored(String),
    /// Aborted because another part of the run failed
    Skipped(String),
}

/// Counters collected while a task ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRunStats {
    pub items_in: usize,
    pub items_out: usize,
    pub retry_attempts: u32,
    pub trace: Vec<String>,
}

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Errored(ErrorPayload),
}

/// Serializes run state transitions on top of a [`RunStore`]
#[derive(Clone)]
pub struct RunTracker {
    store: Arc<dyn RunStore>,
}

impl RunTracker {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Claim the active slot for (pipeline, dataset) and start a run
    pub async fn begin(&self, pipeline_id: Uuid, dataset_id: &str) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::new(pipeline_id, dataset_id);
        run.start();

        match self.store.try_begin_run(&run).await? {
            BeginOutcome::Begun => {
                info!(run_id = %run.id, %pipeline_id, dataset_id, "Pipeline run started");
                Ok(run)
            }
            BeginOutcome::Conflict(existing) => {
                warn!(
                    %pipeline_id,
                    dataset_id,
                    active_run = %existing.id,
                    "Rejecting run: another run is active"
                );
                Err(PipelineError::Conflict {
                    pipeline_id,
                    dataset_id: dataset_id.to_string(),
                    run_id: existing.id,
                })
            }
        }
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline run {}", run_id)))
    }

    /// Open a task run and move the pipeline run to `processing`
    pub async fn record_task_start(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        task_name: &str,
        ordinal: usize,
    ) -> Result<TaskRun, PipelineError> {
        let mut run = self.load_run(run_id).await?;
        if run.status.is_active() {
            run.processing();
            self.store.update_run(&run).await?;
        }

        let mut task_run = TaskRun::new(run_id, task_id, task_name, ordinal);
        task_run.start();
        self.store.insert_task_run(&task_run).await?;

        info!(%run_id, task = task_name, ordinal, "Task started");
        Ok(task_run)
    }

    /// Close a task run; closing an already closed task run is a no-op
    pub async fn record_task_end(
        &self,
        task_run_id: Uuid,
        outcome: TaskOutcome,
        stats: TaskRunStats,
    ) -> Result<TaskRun, PipelineError> {
        let mut task_run = self
            .store
            .load_task_run(task_run_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("task run {}", task_run_id)))?;

        if task_run.status.is_terminal() {
            debug!(%task_run_id, status = %task_run.status, "Task run already closed");
            return Ok(task_run);
        }

        task_run.items_in = stats.items_in;
        task_run.items_out = stats.items_out;
        task_run.retry_attempts = stats.retry_attempts;
        task_run.trace = stats.trace;

        match outcome {
            TaskOutcome::Completed => task_run.finish(TaskRunStatus::Completed, None),
            TaskOutcome::Errored(detail) => task_run.finish(TaskRunStatus::Errored, Some(detail)),
            TaskOutcome::Skipped(detail) => task_run.finish(TaskRunStatus::Skipped, Some(detail)),
        }
        self.store.update_task_run(&task_run).await?;

        info!(
            run_id = %task_run.pipeline_run_id,
            task = %task_run.task_name,
            ordinal = task_run.ordinal,
            status = %task_run.status,
            items_in = task_run.items_in,
            items_out = task_run.items_out,
            retries = task_run.retry_attempts,
            "Task finished"
        );
        Ok(task_run)
    }

    /// Move a run to its terminal state; finalizing twice is a no-op
    pub async fn finalize(&self, run_id: Uuid, outcome: RunOutcome) -> Result<PipelineRun, PipelineError> {
        let mut run = self.load_run(run_id).await?;
        if run.status.is_terminal() {
            debug!(%run_id, status = %run.status, "Pipeline run already finalized");
            return Ok(run);
        }

        match outcome {
            RunOutcome::Completed(summary) => {
                let summary = serde_json::to_value(&summary).context("Failed to encode run summary")?;
                run.complete(summary);
            }
            RunOutcome::Errored(error) => {
                let error = serde_json::to_value(&error).context("Failed to encode run error")?;
                run.fail(error);
            }
        }
        self.store.update_run(&run).await?;

        info!(%run_id, status = %run.status, "Pipeline run finalized");
        Ok(run)
    }

    /// Record the processing state of one source item
    pub async fn mark_item(
        &self,
        dataset_id: &str,
        fingerprint: &str,
        state: ItemState,
        run_id: Uuid,
    ) -> Result<(), PipelineError> {
        let status = DataItemStatus::new(dataset_id, fingerprint, state, run_id);
        self.store.upsert_item_status(&status).await?;
        Ok(())
    }

    /// Item statuses of a dataset, keyed by fingerprint
    pub async fn item_statuses(&self, dataset_id: &str) -> Result<HashMap<String, DataItemStatus>, PipelineError> {
        let statuses = self.store.load_item_statuses(dataset_id).await?;
        Ok(statuses
            .into_iter()
            .map(|status| (status.fingerprint.clone(), status))
            .collect())
    }

    pub async fn run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, PipelineError> {
        Ok(self.store.load_run(run_id).await?)
    }

    pub async fn task_runs(&self, run_id: Uuid) -> Result<Vec<TaskRun>, PipelineError> {
        Ok(self.store.list_task_runs(run_id).await?)
    }

    /// Past and current runs, newest first
    pub async fn history(&self, filter: &RunFilter) -> Result<Vec<PipelineRun>, PipelineError> {
        Ok(self.store.list_runs(filter).await?)
    }

    /// Delete a run together with its task runs
    pub async fn delete_run(&self, run_id: Uuid) -> Result<bool, PipelineError> {
        Ok(self.store.delete_run(run_id).await?)
    }
}
