//! knowledge-pipeline - incremental task pipelines over datasets

pub mod cli;
pub mod core;
pub mod dataset;
pub mod execution;
pub mod persistence;
pub mod provider;
pub mod tasks;

// Re-export commonly used types
pub use core::{DataItem, Pipeline, PipelineError, Task, TaskContext, TaskDefinition, TaskError};
pub use dataset::{DatasetSource, DirectoryDatasets, InMemoryDatasets};
pub use execution::{ExecutionEngine, PipelineRegistry, PipelineRunInfo, RunHandle, TaskRegistry};
pub use persistence::{InMemoryRunStore, RunStore};
pub use provider::{EmbeddingEngine, MockEmbeddingEngine, ProviderError};
