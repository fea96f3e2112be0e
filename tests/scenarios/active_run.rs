//! Test: Active Run - one run per (pipeline, dataset) at a time

use crate::helpers::*;
use knowledge_pipeline::core::{PipelineError, PipelineRunStatus, TaskDefinition};

fn gated(gate: &Gate) -> TestHarness {
    TestHarness::builder().task("gate", gate.clone()).build()
}

fn gate_tasks() -> Vec<TaskDefinition> {
    vec![TaskDefinition::new("hold", "gate")]
}

/// A second run for the same pair is rejected while the first is active
#[tokio::test]
async fn test_second_run_conflicts() {
    let gate = Gate::new();
    let harness = gated(&gate);
    harness.load_texts(&["one"]).await;
    let pipeline_id = harness.pipeline("gated", gate_tasks()).await;

    let first = harness
        .engine
        .run_pipeline(pipeline_id, DATASET, false)
        .await
        .unwrap();

    match harness.engine.run_pipeline(pipeline_id, DATASET, false).await {
        Err(PipelineError::Conflict { run_id, dataset_id, .. }) => {
            assert_eq!(run_id, first.run_id());
            assert_eq!(dataset_id, DATASET);
        }
        Err(other) => panic!("expected Conflict, got {:?}", other),
        Ok(_) => panic!("expected Conflict, got a second run"),
    }

    // Another dataset is independent
    harness.datasets.insert_texts("other", &["two"]).await;
    let other = harness
        .engine
        .run_pipeline(pipeline_id, "other", false)
        .await
        .unwrap();

    gate.open();
    let first_id = first.run_id();
    let events = first.collect_events().await;
    let first = harness.result(first_id, events).await;
    assert_eq!(first.run.status, PipelineRunStatus::Completed);
    other.collect_events().await;

    // The slot is free again once the run finished
    let again = harness.run(pipeline_id, false).await;
    assert_eq!(again.run.status, PipelineRunStatus::Completed);
}

/// Racing starts admit exactly one run
#[tokio::test]
async fn test_concurrent_begin_admits_one() {
    let gate = Gate::new();
    let harness = gated(&gate);
    harness.load_texts(&["one"]).await;
    let pipeline_id = harness.pipeline("gated", gate_tasks()).await;

    let (a, b) = tokio::join!(
        harness.engine.run_pipeline(pipeline_id, DATASET, false),
        harness.engine.run_pipeline(pipeline_id, DATASET, false),
    );

    let mut handles = Vec::new();
    let mut conflicts = 0;
    for result in [a, b] {
        match result {
            Ok(handle) => handles.push(handle),
            Err(PipelineError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(handles.len(), 1);
    assert_eq!(conflicts, 1);

    gate.open();
    for handle in handles {
        handle.collect_events().await;
    }
}
