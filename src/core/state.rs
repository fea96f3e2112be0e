//! Run records and their state machines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineRunStatus {
    /// Run record created, nothing executed yet
    Registered,
    /// Run claimed the (pipeline, dataset) slot
    Started,
    /// A task boundary was crossed
    Processing,
    /// All tasks finished successfully
    Completed,
    /// A task failed or the run was cancelled
    Errored,
}

impl PipelineRunStatus {
    /// Active runs hold the single slot for their (pipeline, dataset) pair
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineRunStatus::Started | PipelineRunStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineRunStatus::Completed | PipelineRunStatus::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineRunStatus::Registered => "registered",
            PipelineRunStatus::Started => "started",
            PipelineRunStatus::Processing => "processing",
            PipelineRunStatus::Completed => "completed",
            PipelineRunStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for PipelineRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(PipelineRunStatus::Registered),
            "started" => Ok(PipelineRunStatus::Started),
            "processing" => Ok(PipelineRunStatus::Processing),
            "completed" => Ok(PipelineRunStatus::Completed),
            "errored" => Ok(PipelineRunStatus::Errored),
            other => Err(format!("unknown pipeline run status '{}'", other)),
        }
    }
}

/// State of a single task inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunStatus {
    Pending,
    Running,
    Completed,
    Errored,
    /// Started, then aborted because another part of the run failed
    Skipped,
}

impl TaskRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskRunStatus::Completed | TaskRunStatus::Errored | TaskRunStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunStatus::Pending => "pending",
            TaskRunStatus::Running => "running",
            TaskRunStatus::Completed => "completed",
            TaskRunStatus::Errored => "errored",
            TaskRunStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskRunStatus::Pending),
            "running" => Ok(TaskRunStatus::Running),
            "completed" => Ok(TaskRunStatus::Completed),
            "errored" => Ok(TaskRunStatus::Errored),
            "skipped" => Ok(TaskRunStatus::Skipped),
            other => Err(format!("unknown task run status '{}'", other)),
        }
    }
}

/// Processing state of a data item within its dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Pending,
    Processing,
    Done,
    Error,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Processing => "processing",
            ItemState::Done => "done",
            ItemState::Error => "error",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemState::Pending),
            "processing" => Ok(ItemState::Processing),
            "done" => Ok(ItemState::Done),
            "error" => Ok(ItemState::Error),
            other => Err(format!("unknown item state '{}'", other)),
        }
    }
}

/// One execution of a pipeline against a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub dataset_id: String,
    pub status: PipelineRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Run summary once completed
    pub summary: Option<Value>,

    /// Error payload once errored
    pub error: Option<Value>,
}

impl PipelineRun {
    /// Create a run in the `registered` state
    pub fn new(pipeline_id: Uuid, dataset_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            dataset_id: dataset_id.into(),
            status: PipelineRunStatus::Registered,
            started_at: None,
            finished_at: None,
            summary: None,
            error: None,
        }
    }

    /// Mark run as started
    pub fn start(&mut self) {
        self.status = PipelineRunStatus::Started;
        self.started_at = Some(Utc::now());
    }

    /// Enter `processing` (once per task boundary)
    pub fn processing(&mut self) {
        if self.status.is_active() {
            self.status = PipelineRunStatus::Processing;
        }
    }

    /// Mark run as completed
    pub fn complete(&mut self, summary: Value) {
        self.status = PipelineRunStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.summary = Some(summary);
    }

    /// Mark run as errored
    pub fn fail(&mut self, error: Value) {
        self.status = PipelineRunStatus::Errored;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// Execution record of one task inside a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: Uuid,
    pub pipeline_run_id: Uuid,
    pub task_id: Uuid,
    pub task_name: String,
    pub ordinal: usize,
    pub status: TaskRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    /// Items received from upstream
    pub items_in: usize,

    /// Items handed downstream
    pub items_out: usize,

    /// Retries of external calls performed while the task ran
    pub retry_attempts: u32,

    /// Source fingerprints the task processed
    pub trace: Vec<String>,
}

impl TaskRun {
    pub fn new(pipeline_run_id: Uuid, task_id: Uuid, task_name: impl Into<String>, ordinal: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_run_id,
            task_id,
            task_name: task_name.into(),
            ordinal,
            status: TaskRunStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
            items_in: 0,
            items_out: 0,
            retry_attempts: 0,
            trace: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = TaskRunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: TaskRunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Durable per-item dedup marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItemStatus {
    pub dataset_id: String,
    pub fingerprint: String,
    pub status: ItemState,

    /// Run that last touched the item
    pub pipeline_run_id: Uuid,

    pub updated_at: DateTime<Utc>,
}

impl DataItemStatus {
    pub fn new(
        dataset_id: impl Into<String>,
        fingerprint: impl Into<String>,
        status: ItemState,
        pipeline_run_id: Uuid,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            fingerprint: fingerprint.into(),
            status,
            pipeline_run_id,
            updated_at: Utc::now(),
        }
    }
}
