//! Test: Cancellation - explicit cancel and dropped handles

use crate::helpers::*;
use knowledge_pipeline::core::{ItemState, PipelineRunStatus, TaskDefinition, TaskRunStatus};

fn gate_tasks() -> Vec<TaskDefinition> {
    vec![TaskDefinition::new("hold", "gate")]
}

#[tokio::test]
async fn test_cancel_ends_run_as_errored() {
    let gate = Gate::new();
    let harness = TestHarness::builder().task("gate", gate.clone()).build();
    harness.load_texts(&["one", "two"]).await;
    let pipeline_id = harness.pipeline("gated", gate_tasks()).await;

    let handle = harness
        .engine
        .run_pipeline(pipeline_id, DATASET, false)
        .await
        .unwrap();
    let run_id = handle.run_id();

    gate.wait_for_item().await;
    handle.cancel();
    let events = handle.collect_events().await;
    let result = harness.result(run_id, events).await;

    assert_eq!(result.run.status, PipelineRunStatus::Errored);
    assert_eq!(result.error().kind, "cancelled");

    let hold = result.task_run("hold").unwrap();
    assert_eq!(hold.status, TaskRunStatus::Skipped);
    assert!(hold.error.as_deref().unwrap().contains("cancelled"));

    let statuses = harness.item_statuses().await;
    assert!(!statuses.is_empty());
    assert!(statuses.values().all(|s| s.status == ItemState::Error));
}

/// Dropping the handle cancels the run and frees the slot
#[tokio::test]
async fn test_dropped_handle_cancels_run() {
    let gate = Gate::new();
    let harness = TestHarness::builder().task("gate", gate.clone()).build();
    harness.load_texts(&["one"]).await;
    let pipeline_id = harness.pipeline("gated", gate_tasks()).await;

    let handle = harness
        .engine
        .run_pipeline(pipeline_id, DATASET, false)
        .await
        .unwrap();
    let run_id = handle.run_id();

    gate.wait_for_item().await;
    drop(handle);

    let run = wait_until_finished(&harness, run_id).await;
    assert_eq!(run.status, PipelineRunStatus::Errored);

    gate.open();
    let next = harness.run(pipeline_id, false).await;
    assert_eq!(next.run.status, PipelineRunStatus::Completed);
    assert_eq!(next.summary().items_admitted, 1);
}
