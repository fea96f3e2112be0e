//! Error types shared by tasks, the run tracker and the engine

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Classification of a task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskErrorKind {
    /// Input or configuration the task cannot work with
    Validation,
    /// External dependency kept failing with retryable errors
    ExternalTransient,
    /// External dependency rejected the request
    ExternalPermanent,
    /// Bug or invariant violation inside the engine or task
    Internal,
}

impl TaskErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::Validation => "validation",
            TaskErrorKind::ExternalTransient => "external-transient",
            TaskErrorKind::ExternalPermanent => "external-permanent",
            TaskErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a task while processing its stream
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {detail}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub detail: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Validation, detail)
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::ExternalTransient, detail)
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::ExternalPermanent, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Internal, detail)
    }

    /// Marker error handed down the stream once the run was cancelled
    pub fn cancelled() -> Self {
        Self::internal("pipeline run was cancelled")
    }
}

/// Errors surfaced by the engine and the run tracker
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline {pipeline_id} already has an active run {run_id} for dataset '{dataset_id}'")]
    Conflict {
        pipeline_id: Uuid,
        dataset_id: String,
        run_id: Uuid,
    },

    #[error("task '{task}' (#{ordinal}) failed: {source}")]
    Task {
        task: String,
        ordinal: usize,
        source: TaskError,
    },

    #[error("pipeline run was cancelled")]
    Cancelled,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid pipeline: {0}")]
    Validation(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    /// Short machine-readable name used in `Errored` events
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Conflict { .. } => "conflict",
            PipelineError::Task { source, .. } => source.kind.as_str(),
            PipelineError::Cancelled => "cancelled",
            PipelineError::NotFound(_) => "not-found",
            PipelineError::Validation(_) => "validation",
            PipelineError::Store(_) => "internal",
        }
    }
}
