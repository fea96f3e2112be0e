//! Main execution engine - runs pipelines over datasets

use crate::{
    core::{DataItem, ItemState, ItemStream, Pipeline, PipelineError, Task, TaskContext},
    dataset::DatasetSource,
    execution::{
        events::{EventEmitter, PipelineRunInfo, RunSummary},
        registry::{PipelineRegistry, TaskRegistry},
        stage::{admit, guard_input, guard_output, Admission, RunFailure, RunState, StageMonitor},
        tracker::{RunOutcome, RunTracker, TaskOutcome},
    },
    persistence::RunStore,
};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events buffered between the run and a slow caller
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Main pipeline execution engine
pub struct ExecutionEngine {
    pipelines: PipelineRegistry,
    tasks: TaskRegistry,
    tracker: RunTracker,
    datasets: Arc<dyn DatasetSource>,
    event_buffer: usize,
}

impl ExecutionEngine {
    pub fn new(
        pipelines: PipelineRegistry,
        tasks: TaskRegistry,
        store: Arc<dyn RunStore>,
        datasets: Arc<dyn DatasetSource>,
    ) -> Self {
        Self {
            pipelines,
            tasks,
            tracker: RunTracker::new(store),
            datasets,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Number of events held back while the caller is not reading
    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size.max(1);
        self
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    /// Start running a pipeline over a dataset
    ///
    /// Unknown pipelines, unbuildable tasks and an already active run for the
    /// same (pipeline, dataset) pair are reported here. Everything after that
    /// is reported through the returned event stream.
    pub async fn run_pipeline(
        &self,
        pipeline_id: Uuid,
        dataset_id: &str,
        force_reprocess: bool,
    ) -> Result<RunHandle, PipelineError> {
        let pipeline = self
            .pipelines
            .get(pipeline_id)
            .await
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline {}", pipeline_id)))?;
        pipeline.validate()?;

        let tasks = pipeline
            .tasks()
            .iter()
            .map(|stage| self.tasks.build(&stage.task))
            .collect::<Result<Vec<_>, _>>()?;

        let run = self.tracker.begin(pipeline.id, dataset_id).await?;
        let cancel = CancellationToken::new();
        let (emitter, rx) = EventEmitter::channel(self.event_buffer);

        let driver = RunDriver {
            run_id: run.id,
            pipeline,
            tasks,
            dataset_id: dataset_id.to_string(),
            force: force_reprocess,
            tracker: self.tracker.clone(),
            datasets: self.datasets.clone(),
            cancel: cancel.clone(),
            emitter,
        };
        tokio::spawn(driver.drive());

        Ok(RunHandle::new(run.id, cancel, rx))
    }
}

/// Caller's view of a run: a stream of [`PipelineRunInfo`] events
///
/// Dropping the handle before the terminal event cancels the run.
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    events: BoxStream<'static, PipelineRunInfo>,
    finished: bool,
}

impl RunHandle {
    fn new(run_id: Uuid, cancel: CancellationToken, rx: tokio::sync::mpsc::Receiver<PipelineRunInfo>) -> Self {
        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed();

        Self {
            run_id,
            cancel,
            events,
            finished: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask the run to stop; it ends with an `Errored` event of kind `cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream until the terminal event
    pub async fn collect_events(mut self) -> Vec<PipelineRunInfo> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for RunHandle {
    type Item = PipelineRunInfo;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = this.events.poll_next_unpin(cx);
        match &poll {
            Poll::Ready(Some(event)) if event.is_terminal() => this.finished = true,
            Poll::Ready(None) => this.finished = true,
            _ => {}
        }
        poll
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}

/// What the caller sees of each item leaving the last task
fn yield_payload(item: &DataItem) -> Value {
    json!({
        "id": item.id,
        "origin": item.origin,
        "content": item.content,
        "metadata": item.metadata,
        "embedding_dims": item.embedding.as_ref().map(|e| e.len()),
    })
}

/// Drives one run in the background
struct RunDriver {
    run_id: Uuid,
    pipeline: Arc<Pipeline>,
    tasks: Vec<Arc<dyn Task>>,
    dataset_id: String,
    force: bool,
    tracker: RunTracker,
    datasets: Arc<dyn DatasetSource>,
    cancel: CancellationToken,
    emitter: EventEmitter,
}

impl RunDriver {
    async fn drive(mut self) {
        let started = Instant::now();
        let run_id = self.run_id;

        if !self
            .emitter
            .emit(PipelineRunInfo::Started { pipeline_run_id: run_id })
            .await
        {
            warn!(%run_id, "Caller went away before the run started");
            self.cancel.cancel();
        }

        let state = Arc::new(RunState::new());
        let (monitors, produced) = self.process(&state).await;

        let failure = state.failure().await;
        let leftover = match &failure {
            None => TaskOutcome::Completed,
            Some(failure) => TaskOutcome::Skipped(format!("aborted: {}", failure.reason())),
        };
        for monitor in &monitors {
            monitor.close_if_open(leftover.clone()).await;
        }

        let admitted = state.admitted().await;
        let event = match failure {
            None => {
                let summary = RunSummary {
                    items_admitted: admitted.len(),
                    items_skipped: state.skipped().await,
                    items_produced: produced,
                    tasks: self.pipeline.tasks().len(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                self.finish_completed(&admitted, summary).await
            }
            Some(failure) => self.finish_errored(&admitted, failure).await,
        };

        self.emitter.emit(event).await;
    }

    /// Wire the stages and pull the last one dry
    async fn process(&mut self, state: &Arc<RunState>) -> (Vec<Arc<StageMonitor>>, usize) {
        let statuses = match self.tracker.item_statuses(&self.dataset_id).await {
            Ok(statuses) => statuses,
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "Failed to load item statuses");
                state.fail(RunFailure::Engine(err.to_string())).await;
                return (Vec::new(), 0);
            }
        };

        let source = self.datasets.items(&self.dataset_id);
        let mut stream: ItemStream = admit(
            source,
            Admission {
                tracker: self.tracker.clone(),
                state: state.clone(),
                statuses,
                dataset_id: self.dataset_id.clone(),
                run_id: self.run_id,
                force: self.force,
                cancel: self.cancel.clone(),
            },
        );

        let mut monitors = Vec::with_capacity(self.tasks.len());
        for (stage, task) in self.pipeline.tasks().iter().zip(&self.tasks) {
            let ctx = TaskContext::new(
                self.dataset_id.clone(),
                self.run_id,
                stage.ordinal,
                stage.task.name.clone(),
                self.cancel.clone(),
            );
            let monitor = Arc::new(StageMonitor::new(
                self.tracker.clone(),
                state.clone(),
                stage.clone(),
                ctx.clone(),
                stream,
            ));

            let input = guard_input(monitor.clone());
            stream = guard_output(task.run(input, ctx), monitor.clone());
            monitors.push(monitor);
        }

        let mut produced = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(run_id = %self.run_id, "Pipeline run cancelled");
                    state.fail(RunFailure::Cancelled).await;
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(item)) => {
                    produced += 1;
                    let event = PipelineRunInfo::Yield {
                        payload: yield_payload(&item),
                    };
                    if !self.emitter.emit(event).await {
                        warn!(run_id = %self.run_id, "Event stream dropped, cancelling run");
                        self.cancel.cancel();
                    }
                }
                Some(Err(_)) | None => break,
            }
        }

        (monitors, produced)
    }

    async fn mark_items(&self, fingerprints: &[String], state: ItemState) -> Result<(), PipelineError> {
        for fingerprint in fingerprints {
            self.tracker
                .mark_item(&self.dataset_id, fingerprint, state, self.run_id)
                .await?;
        }
        Ok(())
    }

    async fn finish_completed(&self, admitted: &[String], summary: RunSummary) -> PipelineRunInfo {
        let finalized = match self.mark_items(admitted, ItemState::Done).await {
            Ok(()) => {
                self.tracker
                    .finalize(self.run_id, RunOutcome::Completed(summary.clone()))
                    .await
            }
            Err(err) => Err(err),
        };

        match finalized {
            Ok(_) => {
                info!(
                    run_id = %self.run_id,
                    admitted = summary.items_admitted,
                    skipped = summary.items_skipped,
                    produced = summary.items_produced,
                    elapsed_ms = summary.elapsed_ms,
                    "Pipeline run completed"
                );
                PipelineRunInfo::Completed { summary }
            }
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "Failed to complete pipeline run");
                self.finish_errored(admitted, RunFailure::Engine(err.to_string()))
                    .await
            }
        }
    }

    async fn finish_errored(&self, admitted: &[String], failure: RunFailure) -> PipelineRunInfo {
        if let Err(err) = self.mark_items(admitted, ItemState::Error).await {
            error!(run_id = %self.run_id, error = %err, "Failed to mark items as errored");
        }

        let payload = failure.to_payload();
        if let Err(err) = self
            .tracker
            .finalize(self.run_id, RunOutcome::Errored(payload.clone()))
            .await
        {
            error!(run_id = %self.run_id, error = %err, "Failed to finalize pipeline run");
        }

        warn!(
            run_id = %self.run_id,
            kind = %payload.kind,
            task = payload.task.as_deref(),
            detail = %payload.detail,
            "Pipeline run errored"
        );
        PipelineRunInfo::Errored { error: payload }
    }
}
