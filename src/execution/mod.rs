//! Pipeline execution engine

pub mod engine;
pub mod events;
pub mod limiter;
pub mod registry;
pub mod retry;
pub mod stage;
pub mod tracker;

pub use engine::{ExecutionEngine, RunHandle};
pub use events::{ErrorPayload, EventEmitter, PipelineRunInfo, RunSummary};
pub use limiter::RateLimiter;
pub use registry::{PipelineRegistry, TaskFactory, TaskRegistry};
pub use retry::{RetryPolicy, Retryable};
pub use tracker::{RunOutcome, RunTracker, TaskOutcome, TaskRunStats};
