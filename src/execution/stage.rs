//! Stage wiring - admission filter and the guards around each task stream
//!
//! Every task sits between an input guard and an output guard. The guards
//! count items, open each TaskRun at its ordinal boundary and record the
//! failure of the run, blaming the lowest-ordinal task that raised an error.

use crate::core::{
    fingerprint, DataItem, DataItemStatus, ItemState, ItemStream, PipelineError, PipelineTask,
    TaskContext, TaskError,
};
use crate::execution::events::ErrorPayload;
use crate::execution::tracker::{RunTracker, TaskOutcome, TaskRunStats};
use futures::stream::{self, Fuse, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// First failure observed during a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunFailure {
    /// A task raised an error
    Task {
        ordinal: usize,
        task: String,
        error: TaskError,
    },
    /// The dataset source could not deliver items
    Source(TaskError),
    /// The caller cancelled the run
    Cancelled,
    /// The tracker or store failed
    Engine(String),
}

impl RunFailure {
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            RunFailure::Task {
                ordinal,
                task,
                error,
            } => ErrorPayload::from(&PipelineError::Task {
                task: task.clone(),
                ordinal: *ordinal,
                source: error.clone(),
            }),
            RunFailure::Source(error) => ErrorPayload {
                kind: error.kind.to_string(),
                detail: format!("dataset source failed: {}", error.detail),
                task: None,
            },
            RunFailure::Cancelled => ErrorPayload::from(&PipelineError::Cancelled),
            RunFailure::Engine(detail) => ErrorPayload {
                kind: "internal".to_string(),
                detail: detail.clone(),
                task: None,
            },
        }
    }

    /// Short reason recorded on aborted task runs
    pub fn reason(&self) -> String {
        match self {
            RunFailure::Task { task, ordinal, .. } => format!("task '{}' (#{}) failed", task, ordinal),
            RunFailure::Source(_) => "dataset source failed".to_string(),
            RunFailure::Cancelled => "run cancelled".to_string(),
            RunFailure::Engine(_) => "engine error".to_string(),
        }
    }
}

#[derive(Default)]
struct RunStateInner {
    failure: Option<RunFailure>,
    admitted: Vec<String>,
    skipped: usize,
}

/// State shared by all stages of one run
#[derive(Default)]
pub struct RunState {
    inner: Mutex<RunStateInner>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; returns `true` if it is the first one
    pub async fn fail(&self, failure: RunFailure) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.failure.is_some() {
            return false;
        }
        inner.failure = Some(failure);
        true
    }

    pub async fn failure(&self) -> Option<RunFailure> {
        self.inner.lock().await.failure.clone()
    }

    pub async fn has_failed(&self) -> bool {
        self.inner.lock().await.failure.is_some()
    }

    async fn admit(&self, fingerprint: String) {
        self.inner.lock().await.admitted.push(fingerprint);
    }

    async fn skip(&self) {
        self.inner.lock().await.skipped += 1;
    }

    /// Fingerprints admitted into the run, in admission order
    pub async fn admitted(&self) -> Vec<String> {
        self.inner.lock().await.admitted.clone()
    }

    pub async fn skipped(&self) -> usize {
        self.inner.lock().await.skipped
    }
}

/// Everything the admission filter needs
pub struct Admission {
    pub tracker: RunTracker,
    pub state: Arc<RunState>,
    pub statuses: HashMap<String, DataItemStatus>,
    pub dataset_id: String,
    pub run_id: Uuid,
    pub force: bool,
    pub cancel: CancellationToken,
}

impl Admission {
    async fn engine_error(&self, err: PipelineError) -> TaskError {
        error!(run_id = %self.run_id, error = %err, "Failed to record item status");
        self.state.fail(RunFailure::Engine(err.to_string())).await;
        TaskError::internal(err.to_string())
    }
}

/// Filter source items down to the ones this run must process
///
/// Drops items already `done` (unless forced) and duplicate fingerprints,
/// and marks admitted items `processing`.
pub fn admit(source: ItemStream, admission: Admission) -> ItemStream {
    let seen = HashSet::new();
    stream::unfold(Some((source, admission, seen)), |state| async move {
        let (mut source, admission, mut seen) = state?;

        loop {
            if admission.cancel.is_cancelled() {
                admission.state.fail(RunFailure::Cancelled).await;
                return Some((Err(TaskError::cancelled()), None));
            }

            let mut item: DataItem = match source.next().await {
                None => return None,
                Some(Err(err)) => {
                    warn!(run_id = %admission.run_id, error = %err, "Dataset source failed");
                    admission.state.fail(RunFailure::Source(err.clone())).await;
                    return Some((Err(err), None));
                }
                Some(Ok(item)) => item,
            };

            let fp = fingerprint(&item.content);
            item.origin = fp.clone();

            if !seen.insert(fp.clone()) {
                debug!(run_id = %admission.run_id, fingerprint = %fp, "Skipping duplicate item");
                admission.state.skip().await;
                continue;
            }

            let done = admission
                .statuses
                .get(&fp)
                .map_or(false, |status| status.status == ItemState::Done);
            if done && !admission.force {
                debug!(run_id = %admission.run_id, fingerprint = %fp, "Skipping already processed item");
                admission.state.skip().await;
                continue;
            }

            if let Err(err) = admission
                .tracker
                .mark_item(&admission.dataset_id, &fp, ItemState::Processing, admission.run_id)
                .await
            {
                let err = admission.engine_error(err).await;
                return Some((Err(err), None));
            }
            admission.state.admit(fp).await;

            return Some((Ok(item), Some((source, admission, seen))));
        }
    })
    .boxed()
}

#[derive(Default)]
struct StageProgress {
    task_run_id: Option<Uuid>,
    closed: bool,
    input_done: bool,
    items_in: usize,
    items_out: usize,
    trace: Vec<String>,
    traced: HashSet<String>,
}

/// Tracks one task of a run and owns its TaskRun record
///
/// The first task's TaskRun opens with its first element. Every later
/// TaskRun opens only once the task before it closed `completed`, so run
/// records follow ordinal order even though items stream through all tasks
/// at once. Counts and trace gathered before that point are kept in memory.
pub struct StageMonitor {
    tracker: RunTracker,
    state: Arc<RunState>,
    stage: PipelineTask,
    ctx: TaskContext,
    input: Mutex<Fuse<ItemStream>>,
    progress: Mutex<StageProgress>,
}

impl StageMonitor {
    pub fn new(
        tracker: RunTracker,
        state: Arc<RunState>,
        stage: PipelineTask,
        ctx: TaskContext,
        input: ItemStream,
    ) -> Self {
        Self {
            tracker,
            state,
            stage,
            ctx,
            input: Mutex::new(input.fuse()),
            progress: Mutex::new(StageProgress::default()),
        }
    }

    async fn engine_error(&self, err: PipelineError) -> TaskError {
        error!(
            run_id = %self.ctx.run_id,
            task = %self.stage.task.name,
            error = %err,
            "Failed to record task run"
        );
        self.state.fail(RunFailure::Engine(err.to_string())).await;
        TaskError::internal(err.to_string())
    }

    /// Open the TaskRun unless already open
    async fn ensure_started(&self) -> Result<(), TaskError> {
        let mut progress = self.progress.lock().await;
        if progress.task_run_id.is_some() {
            return Ok(());
        }

        match self
            .tracker
            .record_task_start(
                self.ctx.run_id,
                self.stage.task.id,
                &self.stage.task.name,
                self.stage.ordinal,
            )
            .await
        {
            Ok(task_run) => {
                progress.task_run_id = Some(task_run.id);
                Ok(())
            }
            Err(err) => {
                drop(progress);
                Err(self.engine_error(err).await)
            }
        }
    }

    async fn record_in(&self, item: &DataItem) {
        let mut progress = self.progress.lock().await;
        progress.items_in += 1;
        if progress.traced.insert(item.origin.clone()) {
            progress.trace.push(item.origin.clone());
        }
    }

    async fn record_out(&self) {
        self.progress.lock().await.items_out += 1;
    }

    /// Pull what is left of the input so the tasks before this one finish
    ///
    /// Drained items are not handed to this task. An upstream error or a
    /// cancellation stops the drain and is recorded by whoever raised it.
    async fn drain_input(&self) {
        let Ok(mut input) = self.input.try_lock() else {
            warn!(
                run_id = %self.ctx.run_id,
                task = %self.stage.task.name,
                "Task input is busy, upstream tasks left unfinished"
            );
            return;
        };

        let mut drained = 0usize;
        loop {
            if self.ctx.is_cancelled() {
                self.state.fail(RunFailure::Cancelled).await;
                break;
            }
            match input.next().await {
                Some(Ok(_)) => drained += 1,
                Some(Err(_)) => break,
                None => {
                    self.progress.lock().await.input_done = true;
                    break;
                }
            }
        }

        if drained > 0 {
            debug!(
                run_id = %self.ctx.run_id,
                task = %self.stage.task.name,
                drained,
                "Drained task input"
            );
        }
    }

    async fn close(&self, outcome: TaskOutcome) -> Result<(), PipelineError> {
        let mut progress = self.progress.lock().await;
        let task_run_id = match progress.task_run_id {
            Some(id) if !progress.closed => id,
            _ => return Ok(()),
        };
        progress.closed = true;

        let stats = TaskRunStats {
            items_in: progress.items_in,
            items_out: progress.items_out,
            retry_attempts: self.ctx.retry_attempts(),
            trace: progress.trace.clone(),
        };
        drop(progress);

        self.tracker.record_task_end(task_run_id, outcome, stats).await?;
        Ok(())
    }

    /// The task's output is exhausted
    async fn complete(&self) -> Result<(), TaskError> {
        let input_done = self.progress.lock().await.input_done;
        if !input_done && !self.state.has_failed().await {
            // The task stopped reading early
            self.drain_input().await;
        }

        if let Some(failure) = self.state.failure().await {
            // Output ended because the run is being torn down
            if let Err(err) = self.close(TaskOutcome::Skipped(format!("aborted: {}", failure.reason()))).await {
                return Err(self.engine_error(err).await);
            }
            return Ok(());
        }

        self.ensure_started().await?;
        if let Err(err) = self.close(TaskOutcome::Completed).await {
            return Err(self.engine_error(err).await);
        }
        Ok(())
    }

    /// The task yielded an error
    ///
    /// Errors passed down from upstream are already recorded. For its own
    /// error the task is blamed only after the tasks before it ran to the
    /// end without failing; an earlier task's error takes precedence.
    async fn fail(&self, err: &TaskError) {
        if self.state.has_failed().await {
            return;
        }
        self.drain_input().await;

        let failure = RunFailure::Task {
            ordinal: self.stage.ordinal,
            task: self.stage.task.name.clone(),
            error: err.clone(),
        };
        if !self.state.fail(failure).await {
            return;
        }

        error!(
            run_id = %self.ctx.run_id,
            task = %self.stage.task.name,
            ordinal = self.stage.ordinal,
            error = %err,
            "Task failed"
        );
        if self.ensure_started().await.is_err() {
            return;
        }
        let detail = format!("{}: {}", err.kind, err.detail);
        if let Err(store_err) = self.close(TaskOutcome::Errored(detail)).await {
            error!(run_id = %self.ctx.run_id, error = %store_err, "Failed to record task failure");
        }
    }

    /// Close a TaskRun left open when the run ended
    ///
    /// Tasks whose TaskRun was never opened stay without one.
    pub async fn close_if_open(&self, outcome: TaskOutcome) {
        if let Err(err) = self.close(outcome).await {
            error!(
                run_id = %self.ctx.run_id,
                task = %self.stage.task.name,
                error = %err,
                "Failed to close task run"
            );
        }
    }
}

/// The stream handed to a task, reading the monitor's input
///
/// Stops handing out work once the run is cancelled. Opens the first task's
/// TaskRun on its first element and every other TaskRun at the end of its
/// input, which is when the task before it completed.
pub fn guard_input(monitor: Arc<StageMonitor>) -> ItemStream {
    stream::unfold(Some(monitor), |monitor| async move {
        let monitor = monitor?;

        if monitor.ctx.is_cancelled() {
            monitor.state.fail(RunFailure::Cancelled).await;
            return Some((Err(TaskError::cancelled()), None));
        }

        let next = monitor.input.lock().await.next().await;
        match next {
            Some(Ok(item)) => {
                if monitor.stage.ordinal == 0 {
                    if let Err(err) = monitor.ensure_started().await {
                        return Some((Err(err), None));
                    }
                }
                monitor.record_in(&item).await;
                Some((Ok(item), Some(monitor)))
            }
            Some(Err(err)) => Some((Err(err), None)),
            None => {
                monitor.progress.lock().await.input_done = true;
                if monitor.state.has_failed().await {
                    return None;
                }
                // End of input from a successful upstream still starts the task
                if let Err(err) = monitor.ensure_started().await {
                    return Some((Err(err), None));
                }
                None
            }
        }
    })
    .boxed()
}

/// Wrap the stream a task produced
///
/// Counts output, records the task's failure or completion, and ends the
/// stream after the first error.
pub fn guard_output(output: ItemStream, monitor: Arc<StageMonitor>) -> ItemStream {
    stream::unfold(Some(output), move |output| {
        let monitor = monitor.clone();
        async move {
            let mut output = output?;

            match output.next().await {
                Some(Ok(item)) => {
                    monitor.record_out().await;
                    Some((Ok(item), Some(output)))
                }
                Some(Err(err)) => {
                    monitor.fail(&err).await;
                    Some((Err(err), None))
                }
                None => match monitor.complete().await {
                    Ok(()) => None,
                    Err(err) => Some((Err(err), None)),
                },
            }
        }
    })
    .boxed()
}
