//! Test: Event Order - Started, Yields, then exactly one terminal event

use crate::helpers::*;
use futures::{future, StreamExt};
use knowledge_pipeline::core::{
    fingerprint, ItemStream, Task, TaskContext, TaskDefinition, TaskError, TaskRunStatus,
};
use knowledge_pipeline::execution::PipelineRunInfo;
use serde_json::json;

/// Task that consumes everything and produces nothing
struct DiscardTask;

impl Task for DiscardTask {
    fn run(&self, input: ItemStream, _ctx: TaskContext) -> ItemStream {
        input.filter(|result| future::ready(result.is_err())).boxed()
    }
}

fn terminal_count(events: &[PipelineRunInfo]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

#[tokio::test]
async fn test_completed_run_event_sequence() {
    let harness = TestHarness::builder().build();
    let text = "one two three four five six seven";
    harness.load_texts(&[text]).await;
    let pipeline_id = harness
        .pipeline(
            "small-chunks",
            vec![
                TaskDefinition::new("chunk", "chunk").with_param("max_chunk_chars", json!(10)),
                TaskDefinition::new("embed", "embed"),
            ],
        )
        .await;

    let result = harness.run(pipeline_id, false).await;
    let events = &result.events;

    assert!(matches!(
        events[0],
        PipelineRunInfo::Started { pipeline_run_id } if pipeline_run_id == result.run.id
    ));
    assert_eq!(terminal_count(events), 1);
    assert!(events.last().unwrap().is_terminal());

    let yields = result.yields();
    assert_eq!(yields.len(), events.len() - 2);
    assert!(yields.len() > 1);
    assert_eq!(result.summary().items_produced, yields.len());
    for payload in yields {
        assert_eq!(payload["origin"], fingerprint(text));
        assert_eq!(payload["embedding_dims"], DIMENSIONS);
        assert!(payload["content"].as_str().unwrap().chars().count() <= 10);
    }

    let started = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(started["type"], "started");
}

#[tokio::test]
async fn test_errored_run_event_sequence() {
    let harness = TestHarness::builder()
        .task("explode", FailingTask::new(TaskError::validation("bad input")))
        .build();
    harness.load_texts(&["alpha"]).await;
    let pipeline_id = harness
        .pipeline("broken", vec![TaskDefinition::new("explode", "explode")])
        .await;

    let result = harness.run(pipeline_id, false).await;

    assert!(matches!(result.events[0], PipelineRunInfo::Started { .. }));
    assert_eq!(result.events.len(), 2);
    assert_eq!(terminal_count(&result.events), 1);
    assert_eq!(result.error().kind, "validation");

    let errored = serde_json::to_value(result.events.last().unwrap()).unwrap();
    assert_eq!(errored["type"], "errored");
    assert_eq!(errored["error"]["task"], "explode");
}

/// Output of intermediate tasks never reaches the caller as `Yield`
#[tokio::test]
async fn test_only_last_task_output_is_yielded() {
    let harness = TestHarness::builder().task("discard", DiscardTask).build();
    harness.load_texts(&["alpha", "beta"]).await;
    let pipeline_id = harness
        .pipeline(
            "sink",
            vec![
                TaskDefinition::new("chunk", "chunk"),
                TaskDefinition::new("discard", "discard"),
            ],
        )
        .await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.events.len(), 2);
    assert!(result.yields().is_empty());
    assert_eq!(result.summary().items_produced, 0);

    let chunk = result.task_run("chunk").unwrap();
    assert_eq!(chunk.status, TaskRunStatus::Completed);
    assert_eq!(chunk.items_out, 2);
    let discard = result.task_run("discard").unwrap();
    assert_eq!(discard.status, TaskRunStatus::Completed);
    assert_eq!(discard.items_in, 2);
    assert_eq!(discard.items_out, 0);
}
