//! Test: Retry Budget - provider retries are bounded and counted

use crate::helpers::*;
use knowledge_pipeline::core::{PipelineRunStatus, TaskDefinition, TaskRunStatus};
use knowledge_pipeline::provider::ProviderError;
use std::sync::Arc;

fn embed_only() -> Vec<TaskDefinition> {
    vec![TaskDefinition::new("embed", "embed")]
}

/// Two transient failures are absorbed and show up on the TaskRun
#[tokio::test]
async fn test_transient_failures_are_retried() {
    let engine = Arc::new(FlakyEngine::new(2, ProviderError::from_status(503, "busy")));
    let harness = TestHarness::builder()
        .embedding_engine(engine.clone())
        .build();
    harness.load_texts(&["alpha", "beta", "gamma"]).await;
    let pipeline_id = harness.pipeline("embed", embed_only()).await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.run.status, PipelineRunStatus::Completed);
    assert_eq!(result.summary().items_produced, 3);
    let embed = result.task_run("embed").unwrap();
    assert_eq!(embed.status, TaskRunStatus::Completed);
    assert_eq!(embed.retry_attempts, 2);
    assert_eq!(engine.call_count(), 3);
}

/// A non-retryable provider error fails the run on the first call
#[tokio::test]
async fn test_not_found_is_not_retried() {
    let engine = Arc::new(FlakyEngine::new(
        1,
        ProviderError::NotFound("model".to_string()),
    ));
    let harness = TestHarness::builder()
        .embedding_engine(engine.clone())
        .build();
    harness.load_texts(&["alpha"]).await;
    let pipeline_id = harness.pipeline("embed", embed_only()).await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.run.status, PipelineRunStatus::Errored);
    let error = result.error();
    assert_eq!(error.kind, "external-permanent");
    assert_eq!(error.task.as_deref(), Some("embed"));

    let embed = result.task_run("embed").unwrap();
    assert_eq!(embed.status, TaskRunStatus::Errored);
    assert_eq!(embed.retry_attempts, 0);
    assert_eq!(engine.call_count(), 1);
}

/// A provider that never recovers exhausts the budget
#[tokio::test]
async fn test_budget_exhaustion_is_transient_error() {
    let engine = Arc::new(FlakyEngine::new(
        usize::MAX,
        ProviderError::from_status(503, "down"),
    ));
    let harness = TestHarness::builder()
        .embedding_engine(engine.clone())
        .build();
    harness.load_texts(&["alpha"]).await;
    let pipeline_id = harness.pipeline("embed", embed_only()).await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.run.status, PipelineRunStatus::Errored);
    assert_eq!(result.error().kind, "external-transient");
    let embed = result.task_run("embed").unwrap();
    assert!(embed.retry_attempts > 0);
    assert_eq!(engine.call_count(), embed.retry_attempts as usize + 1);
}
