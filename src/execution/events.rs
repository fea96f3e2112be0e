//! Progress events streamed to the caller of a run

use crate::core::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Progress of a pipeline run, as seen by the caller
///
/// A run produces exactly one `Started`, any number of `Yield`s and exactly
/// one terminal event (`Completed` or `Errored`).
///
/// There is one `Yield` per item leaving the last task, sent as it is
/// produced. Intermediate tasks emit no `Yield`; their progress is recorded
/// on their TaskRun (`items_in`, `items_out`). A pipeline ending in an
/// aggregating task therefore yields only once that task emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineRunInfo {
    Started { pipeline_run_id: Uuid },
    Yield { payload: Value },
    Completed { summary: RunSummary },
    Errored { error: ErrorPayload },
}

impl PipelineRunInfo {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineRunInfo::Completed { .. } | PipelineRunInfo::Errored { .. }
        )
    }
}

/// Counts reported when a run completes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub items_admitted: usize,
    pub items_skipped: usize,
    pub items_produced: usize,
    pub tasks: usize,
    pub elapsed_ms: u64,
}

/// Error reported when a run fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub detail: String,

    /// Task that raised the error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl From<&PipelineError> for ErrorPayload {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::Task { task, source, .. } => ErrorPayload {
                kind: source.kind.to_string(),
                detail: source.detail.clone(),
                task: Some(task.clone()),
            },
            other => ErrorPayload {
                kind: other.kind().to_string(),
                detail: other.to_string(),
                task: None,
            },
        }
    }
}

/// Sending half of a run's event channel
///
/// Drops everything after the first terminal event.
pub struct EventEmitter {
    tx: mpsc::Sender<PipelineRunInfo>,
    terminated: bool,
}

impl EventEmitter {
    /// Create an emitter and the receiver the caller reads from
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PipelineRunInfo>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                terminated: false,
            },
            rx,
        )
    }

    /// Deliver an event; waits while the caller is behind
    ///
    /// Returns `false` if the event was dropped: either a terminal event was
    /// already emitted or the caller went away.
    pub async fn emit(&mut self, event: PipelineRunInfo) -> bool {
        if self.terminated {
            debug!(?event, "Dropping event after terminal event");
            return false;
        }
        if event.is_terminal() {
            self.terminated = true;
        }
        self.tx.send(event).await.is_ok()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}
