//! Task context - per-run information handed to every task

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Execution context for one task inside a pipeline run
///
/// Cloning is cheap; clones share the cancellation token and the retry counter.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Dataset being processed
    pub dataset_id: String,

    /// Pipeline run this task belongs to
    pub run_id: Uuid,

    /// Position of the task within the pipeline
    pub ordinal: usize,

    /// Task name, for logging
    pub task_name: String,

    cancel: CancellationToken,
    retries: Arc<AtomicU32>,
}

impl TaskContext {
    pub fn new(
        dataset_id: impl Into<String>,
        run_id: Uuid,
        ordinal: usize,
        task_name: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            run_id,
            ordinal,
            task_name: task_name.into(),
            cancel,
            retries: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Whether the caller asked for the run to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that resolves once the run is cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Count one retry of an external call
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    /// Retries recorded so far
    pub fn retry_attempts(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }
}
