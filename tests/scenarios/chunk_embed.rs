//! Test: Chunk + Embed - incremental processing over a dataset

use crate::helpers::*;
use knowledge_pipeline::core::{fingerprint, ItemState, PipelineRunStatus, TaskRunStatus};

/// A fresh dataset goes through both tasks and every item ends `done`
#[tokio::test]
async fn test_fresh_dataset_is_fully_processed() {
    let harness = TestHarness::builder().build();
    harness.load_texts(&["alpha doc", "beta doc", "gamma doc"]).await;
    let pipeline_id = harness.pipeline("ingest", chunk_embed_tasks()).await;

    let result = harness.run(pipeline_id, false).await;

    assert_eq!(result.run.status, PipelineRunStatus::Completed);
    let summary = result.summary();
    assert_eq!(summary.items_admitted, 3);
    assert_eq!(summary.items_skipped, 0);
    assert_eq!(summary.items_produced, 3);

    assert_eq!(result.task_runs.len(), 2);
    for task_run in &result.task_runs {
        assert_eq!(task_run.status, TaskRunStatus::Completed);
        assert_eq!(task_run.items_in, 3);
        assert_eq!(task_run.items_out, 3);
        assert_eq!(task_run.trace.len(), 3);
    }
    assert_eq!(result.task_runs[0].task_name, "chunk");
    assert_eq!(result.task_runs[1].task_name, "embed");

    for payload in result.yields() {
        assert_eq!(payload["embedding_dims"], DIMENSIONS);
    }

    let statuses = harness.item_statuses().await;
    assert_eq!(statuses.len(), 3);
    for status in statuses.values() {
        assert_eq!(status.status, ItemState::Done);
        assert_eq!(status.pipeline_run_id, result.run.id);
    }
}

/// Running again over unchanged data admits nothing
#[tokio::test]
async fn test_rerun_skips_done_items() {
    let harness = TestHarness::builder().build();
    harness.load_texts(&["alpha doc", "beta doc", "gamma doc"]).await;
    let pipeline_id = harness.pipeline("ingest", chunk_embed_tasks()).await;

    let first = harness.run(pipeline_id, false).await;
    let second = harness.run(pipeline_id, false).await;

    assert_eq!(second.run.status, PipelineRunStatus::Completed);
    let summary = second.summary();
    assert_eq!(summary.items_admitted, 0);
    assert_eq!(summary.items_skipped, 3);
    assert_eq!(summary.items_produced, 0);
    assert!(second.yields().is_empty());

    // Tasks still run, over an empty stream
    assert_eq!(second.task_runs.len(), 2);
    for task_run in &second.task_runs {
        assert_eq!(task_run.status, TaskRunStatus::Completed);
        assert_eq!(task_run.items_in, 0);
        assert!(task_run.trace.is_empty());
    }

    for status in harness.item_statuses().await.values() {
        assert_eq!(status.pipeline_run_id, first.run.id);
    }
}

/// Only the changed item is reprocessed; untouched statuses keep their run
#[tokio::test]
async fn test_changed_item_is_reprocessed() {
    let harness = TestHarness::builder().build();
    harness.load_texts(&["alpha doc", "beta doc", "gamma doc"]).await;
    let pipeline_id = harness.pipeline("ingest", chunk_embed_tasks()).await;

    let first = harness.run(pipeline_id, false).await;
    let before = harness.item_statuses().await;

    harness
        .load_texts(&["alpha doc", "beta doc, revised", "gamma doc"])
        .await;
    let second = harness.run(pipeline_id, false).await;

    let summary = second.summary();
    assert_eq!(summary.items_admitted, 1);
    assert_eq!(summary.items_skipped, 2);

    let changed = fingerprint("beta doc, revised");
    let chunk = second.task_run("chunk").unwrap();
    assert_eq!(chunk.trace, vec![changed.clone()]);

    let after = harness.item_statuses().await;
    assert_eq!(after[&changed].status, ItemState::Done);
    assert_eq!(after[&changed].pipeline_run_id, second.run.id);

    for text in ["alpha doc", "gamma doc"] {
        let fp = fingerprint(text);
        assert_eq!(after[&fp].pipeline_run_id, first.run.id);
        assert_eq!(after[&fp].updated_at, before[&fp].updated_at);
    }
}

/// Forcing a run reprocesses items already done
#[tokio::test]
async fn test_force_reprocesses_everything() {
    let harness = TestHarness::builder().build();
    harness.load_texts(&["alpha doc", "beta doc"]).await;
    let pipeline_id = harness.pipeline("ingest", chunk_embed_tasks()).await;

    harness.run(pipeline_id, false).await;
    let forced = harness.run(pipeline_id, true).await;

    assert_eq!(forced.summary().items_admitted, 2);
    for status in harness.item_statuses().await.values() {
        assert_eq!(status.pipeline_run_id, forced.run.id);
    }
}

/// Identical content inside one dataset is processed once
#[tokio::test]
async fn test_duplicate_content_is_processed_once() {
    let harness = TestHarness::builder().build();
    harness.load_texts(&["same text", "same text", "other text"]).await;
    let pipeline_id = harness.pipeline("ingest", chunk_embed_tasks()).await;

    let result = harness.run(pipeline_id, false).await;

    let summary = result.summary();
    assert_eq!(summary.items_admitted, 2);
    assert_eq!(summary.items_skipped, 1);
    assert_eq!(harness.item_statuses().await.len(), 2);
}
