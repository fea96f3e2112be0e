//! CLI output formatting

use crate::{
    core::{PipelineRun, PipelineRunStatus, TaskRun, TaskRunStatus},
    execution::PipelineRunInfo,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Spinner shown while items stream through the pipeline
pub fn create_item_spinner() -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} items {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: PipelineRunStatus) -> String {
    match status {
        PipelineRunStatus::Registered => style("REGISTERED").dim().to_string(),
        PipelineRunStatus::Started => style("STARTED").yellow().to_string(),
        PipelineRunStatus::Processing => style("PROCESSING").yellow().to_string(),
        PipelineRunStatus::Completed => style("COMPLETED").green().to_string(),
        PipelineRunStatus::Errored => style("ERRORED").red().to_string(),
    }
}

/// Format a task run status for display
pub fn format_task_status(status: TaskRunStatus) -> String {
    match status {
        TaskRunStatus::Pending => style("PENDING").dim().to_string(),
        TaskRunStatus::Running => style("RUNNING").yellow().to_string(),
        TaskRunStatus::Completed => style("COMPLETED").green().to_string(),
        TaskRunStatus::Errored => style("ERRORED").red().to_string(),
        TaskRunStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// One history line per run
pub fn format_run(run: &PipelineRun) -> String {
    let status_icon = match run.status {
        PipelineRunStatus::Completed => CHECK,
        PipelineRunStatus::Errored => CROSS,
        PipelineRunStatus::Started | PipelineRunStatus::Processing => SPINNER,
        PipelineRunStatus::Registered => INFO,
    };
    let started = run
        .started_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} {} - {} - {} - {}",
        status_icon,
        style(short_id(&run.id)).dim(),
        style(&run.dataset_id).bold(),
        format_status(run.status),
        style(started).dim()
    )
}

/// One line per task run
pub fn format_task_run(task_run: &TaskRun) -> String {
    let mut line = format!(
        "#{} {} - {} - in {} / out {} - {} retries",
        task_run.ordinal,
        style(&task_run.task_name).cyan(),
        format_task_status(task_run.status),
        task_run.items_in,
        task_run.items_out,
        task_run.retry_attempts
    );
    if let Some(error) = &task_run.error {
        line.push_str(&format!(" - {}", style(error).red()));
    }
    line
}

/// Format a run event for display
pub fn format_run_event(event: &PipelineRunInfo) -> String {
    match event {
        PipelineRunInfo::Started { pipeline_run_id } => format!(
            "{} Run {} started",
            ROCKET,
            style(short_id(pipeline_run_id)).dim()
        ),
        PipelineRunInfo::Yield { payload } => {
            let dims = payload
                .get("embedding_dims")
                .and_then(|d| d.as_u64())
                .map(|d| format!(" ({} dims)", d))
                .unwrap_or_default();
            let content = payload
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default();
            format!("{} {}{}", INFO, style(format_output(content, 1)).dim(), dims)
        }
        PipelineRunInfo::Completed { summary } => format!(
            "{} Completed: {} admitted, {} skipped, {} produced by {} tasks in {} ms",
            CHECK,
            style(summary.items_admitted).cyan(),
            style(summary.items_skipped).dim(),
            style(summary.items_produced).cyan(),
            summary.tasks,
            summary.elapsed_ms
        ),
        PipelineRunInfo::Errored { error } => {
            let task = error
                .task
                .as_ref()
                .map(|t| format!(" in task {}", style(t).bold()))
                .unwrap_or_default();
            format!(
                "{} Errored ({}){}: {}",
                CROSS,
                style(&error.kind).red(),
                task,
                error.detail
            )
        }
    }
}

/// Format text output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
