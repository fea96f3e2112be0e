//! Test utility functions for knowledge-pipeline

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use knowledge_pipeline::core::{
    DataItemStatus, ItemResult, ItemStream, Pipeline, PipelineRun, Task, TaskContext, TaskDefinition,
    TaskError, TaskRun,
};
use knowledge_pipeline::dataset::InMemoryDatasets;
use knowledge_pipeline::execution::{
    ErrorPayload, ExecutionEngine, PipelineRegistry, PipelineRunInfo, RateLimiter, RetryPolicy,
    RunSummary, TaskRegistry,
};
use knowledge_pipeline::persistence::InMemoryRunStore;
use knowledge_pipeline::provider::{EmbeddingEngine, MockEmbeddingEngine, ProviderError};
use knowledge_pipeline::tasks::register_builtins;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DATASET: &str = "docs";
pub const DIMENSIONS: usize = 8;

/// Retry policy that keeps scenario tests fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(1),
        Duration::from_millis(5),
        Duration::from_secs(1),
    )
}

/// Embedding engine whose first `failures` calls fail with `error`
pub struct FlakyEngine {
    failures: usize,
    error: ProviderError,
    calls: AtomicUsize,
}

impl FlakyEngine {
    pub fn new(failures: usize, error: ProviderError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingEngine for FlakyEngine {
    fn provider(&self) -> &str {
        "flaky"
    }

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }
        Ok(texts.iter().map(|_| vec![0.5; DIMENSIONS]).collect())
    }

    fn get_vector_size(&self) -> usize {
        DIMENSIONS
    }

    fn get_batch_size(&self) -> usize {
        16
    }
}

/// Task that fails on an item, by default the first one it sees
pub struct FailingTask {
    error: TaskError,
    pass: usize,
}

impl FailingTask {
    pub fn new(error: TaskError) -> Self {
        Self { error, pass: 0 }
    }

    /// Let the first `pass` items through unchanged, then fail
    pub fn after(pass: usize, error: TaskError) -> Self {
        Self { error, pass }
    }
}

impl Task for FailingTask {
    fn run(&self, input: ItemStream, _ctx: TaskContext) -> ItemStream {
        let error = self.error.clone();
        let mut remaining = self.pass;
        input
            .map(move |result| -> ItemResult {
                let item = result?;
                if remaining > 0 {
                    remaining -= 1;
                    return Ok(item);
                }
                Err(error.clone())
            })
            .boxed()
    }
}

/// Task that holds every item until the gate is opened
#[derive(Clone, Default)]
pub struct Gate {
    release: CancellationToken,
    entered: Arc<Notify>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.release.cancel();
    }

    /// Wait until at least one item reached the gate
    pub async fn wait_for_item(&self) {
        self.entered.notified().await;
    }
}

impl Task for Gate {
    fn run(&self, input: ItemStream, _ctx: TaskContext) -> ItemStream {
        let gate = self.clone();
        input
            .then(move |result| {
                let gate = gate.clone();
                async move {
                    gate.entered.notify_one();
                    gate.release.cancelled().await;
                    result
                }
            })
            .boxed()
    }
}

/// Engine wired with in-memory stores for scenario tests
pub struct TestHarness {
    pub engine: ExecutionEngine,
    pub datasets: InMemoryDatasets,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// Register a pipeline from task definitions
    pub async fn pipeline(&self, name: &str, tasks: Vec<TaskDefinition>) -> Uuid {
        self.engine
            .pipelines()
            .register(Pipeline::new(name, tasks))
            .await
            .unwrap_or_else(|e| panic!("Failed to register pipeline '{}': {}", name, e))
            .id
    }

    pub async fn load_texts(&self, texts: &[&str]) {
        self.datasets.insert_texts(DATASET, texts).await;
    }

    /// Run to completion and collect every event
    pub async fn run(&self, pipeline_id: Uuid, force: bool) -> RunResult {
        let handle = self
            .engine
            .run_pipeline(pipeline_id, DATASET, force)
            .await
            .unwrap_or_else(|e| panic!("Failed to start run: {}", e));
        let run_id = handle.run_id();
        let events = handle.collect_events().await;
        self.result(run_id, events).await
    }

    pub async fn result(&self, run_id: Uuid, events: Vec<PipelineRunInfo>) -> RunResult {
        let tracker = self.engine.tracker();
        let run = tracker
            .run(run_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("Run {} not found", run_id));
        let task_runs = tracker.task_runs(run_id).await.unwrap();

        RunResult {
            run,
            task_runs,
            events,
        }
    }

    pub async fn item_statuses(&self) -> HashMap<String, DataItemStatus> {
        self.engine.tracker().item_statuses(DATASET).await.unwrap()
    }
}

#[derive(Default)]
pub struct TestHarnessBuilder {
    engine: Option<Arc<dyn EmbeddingEngine>>,
    custom: Vec<(String, Arc<dyn Task>)>,
}

impl TestHarnessBuilder {
    pub fn embedding_engine(mut self, engine: Arc<dyn EmbeddingEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Register `task` under a custom kind
    pub fn task(mut self, kind: &str, task: impl Task + 'static) -> Self {
        self.custom.push((kind.to_string(), Arc::new(task)));
        self
    }

    pub fn build(self) -> TestHarness {
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(MockEmbeddingEngine::new(DIMENSIONS, 4)));

        let mut tasks = TaskRegistry::new();
        register_builtins(&mut tasks, engine, RateLimiter::new(2), fast_retry());
        for (kind, task) in self.custom {
            tasks.register(kind.as_str(), move |_| Ok(task.clone()));
        }

        let datasets = InMemoryDatasets::new();
        let engine = ExecutionEngine::new(
            PipelineRegistry::new(),
            tasks,
            Arc::new(InMemoryRunStore::new()),
            Arc::new(datasets.clone()),
        );

        TestHarness { engine, datasets }
    }
}

/// Everything recorded about one run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run: PipelineRun,
    pub task_runs: Vec<TaskRun>,
    pub events: Vec<PipelineRunInfo>,
}

impl RunResult {
    pub fn task_run(&self, name: &str) -> Option<&TaskRun> {
        self.task_runs.iter().find(|t| t.task_name == name)
    }

    pub fn yields(&self) -> Vec<&serde_json::Value> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PipelineRunInfo::Yield { payload } => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> &RunSummary {
        match self.events.last() {
            Some(PipelineRunInfo::Completed { summary }) => summary,
            other => panic!("Run should have completed, last event was: {:?}", other),
        }
    }

    pub fn error(&self) -> &ErrorPayload {
        match self.events.last() {
            Some(PipelineRunInfo::Errored { error }) => error,
            other => panic!("Run should have errored, last event was: {:?}", other),
        }
    }
}

/// Standard chunk -> embed pipeline definitions
pub fn chunk_embed_tasks() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::new("chunk", "chunk"),
        TaskDefinition::new("embed", "embed"),
    ]
}

/// Poll the tracker until the run is no longer active
pub async fn wait_until_finished(harness: &TestHarness, run_id: Uuid) -> PipelineRun {
    for _ in 0..200 {
        let run = harness.engine.tracker().run(run_id).await.unwrap();
        if let Some(run) = run {
            if !run.status.is_active() {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Run {} did not finish in time", run_id);
}
