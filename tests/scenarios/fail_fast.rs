//! Test: Fail Fast - the first task error ends the run

use crate::helpers::*;
use knowledge_pipeline::core::{
    ItemState, PipelineRunStatus, TaskDefinition, TaskError, TaskRunStatus,
};

fn exploding_harness() -> TestHarness {
    TestHarness::builder()
        .task("explode", FailingTask::new(TaskError::permanent("boom")))
        .build()
}

/// A failing first task leaves no TaskRun for the tasks after it
#[tokio::test]
async fn test_later_tasks_never_start() {
    let harness = exploding_harness();
    harness.load_texts(&["alpha", "beta", "gamma"]).await;
    let pipeline_id = harness
        .pipeline(
            "broken",
            vec![
                TaskDefinition::new("explode", "explode"),
                TaskDefinition::new("chunk", "chunk"),
                TaskDefinition::new("embed", "embed"),
            ],
        )
        .await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.run.status, PipelineRunStatus::Errored);
    let error = result.error();
    assert_eq!(error.kind, "external-permanent");
    assert_eq!(error.task.as_deref(), Some("explode"));
    assert_eq!(error.detail, "boom");
    assert!(result.yields().is_empty());

    assert_eq!(result.task_runs.len(), 1);
    let explode = result.task_run("explode").unwrap();
    assert_eq!(explode.status, TaskRunStatus::Errored);
    assert_eq!(explode.error.as_deref(), Some("external-permanent: boom"));
}

/// Only the task that raised the error is blamed; the tasks before it finish
#[tokio::test]
async fn test_upstream_task_completes_before_blame() {
    let harness = exploding_harness();
    harness.load_texts(&["alpha", "beta"]).await;
    let pipeline_id = harness
        .pipeline(
            "broken",
            vec![
                TaskDefinition::new("chunk", "chunk"),
                TaskDefinition::new("explode", "explode"),
                TaskDefinition::new("embed", "embed"),
            ],
        )
        .await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.task_runs.len(), 2);
    let chunk = result.task_run("chunk").unwrap();
    assert_eq!(chunk.status, TaskRunStatus::Completed);
    assert_eq!(chunk.items_in, 2);
    assert_eq!(chunk.items_out, 2);
    assert_eq!(
        result.task_run("explode").unwrap().status,
        TaskRunStatus::Errored
    );
    assert!(result.task_run("embed").is_none());
}

/// A task that already passed items downstream before failing still leaves
/// no TaskRun for the tasks after it
#[tokio::test]
async fn test_failure_after_output_leaves_no_downstream_task_run() {
    let harness = TestHarness::builder()
        .task("relay", FailingTask::after(1, TaskError::permanent("lost connection")))
        .build();
    harness.load_texts(&["alpha", "beta", "gamma"]).await;
    let pipeline_id = harness
        .pipeline(
            "half-broken",
            vec![
                TaskDefinition::new("chunk", "chunk"),
                TaskDefinition::new("relay", "relay"),
                TaskDefinition::new("embed", "embed"),
            ],
        )
        .await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.run.status, PipelineRunStatus::Errored);
    assert_eq!(result.error().task.as_deref(), Some("relay"));
    assert!(result.yields().is_empty());

    assert_eq!(result.task_runs.len(), 2);
    assert!(result.task_run("embed").is_none());

    let chunk = result.task_run("chunk").unwrap();
    assert_eq!(chunk.status, TaskRunStatus::Completed);
    assert_eq!(chunk.items_out, 3);

    let relay = result.task_run("relay").unwrap();
    assert_eq!(relay.status, TaskRunStatus::Errored);
    assert_eq!(relay.items_in, 2);
    assert_eq!(relay.items_out, 1);
    assert!(chunk.finished_at.unwrap() <= relay.started_at.unwrap());

    let statuses = harness.item_statuses().await;
    assert_eq!(statuses.len(), 3);
    assert!(statuses.values().all(|s| s.status == ItemState::Error));
}

/// Items of a failed run are marked `error` and picked up by the next run
#[tokio::test]
async fn test_errored_items_are_retried() {
    let harness = exploding_harness();
    harness.load_texts(&["alpha", "beta", "gamma"]).await;
    let broken = harness
        .pipeline("broken", vec![TaskDefinition::new("explode", "explode")])
        .await;

    let failed = harness.run(broken, false).await;
    let statuses = harness.item_statuses().await;
    assert!(!statuses.is_empty());
    for status in statuses.values() {
        assert_eq!(status.status, ItemState::Error);
        assert_eq!(status.pipeline_run_id, failed.run.id);
    }

    let working = harness.pipeline("ingest", chunk_embed_tasks()).await;
    let retried = harness.run(working, false).await;

    assert_eq!(retried.run.status, PipelineRunStatus::Completed);
    assert_eq!(retried.summary().items_admitted, 3);
    let statuses = harness.item_statuses().await;
    assert_eq!(statuses.len(), 3);
    assert!(statuses.values().all(|s| s.status == ItemState::Done));
}
