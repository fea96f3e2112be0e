use anyhow::{Context, Result};
use futures::StreamExt;
use knowledge_pipeline::cli::commands::{HistoryCommand, RunCommand, ValidateCommand};
use knowledge_pipeline::cli::output::*;
use knowledge_pipeline::cli::{Cli, Command};
use knowledge_pipeline::core::config::PipelineConfig;
use knowledge_pipeline::dataset::DirectoryDatasets;
use knowledge_pipeline::execution::{
    ExecutionEngine, PipelineRegistry, PipelineRunInfo, RateLimiter, TaskRegistry,
};
use knowledge_pipeline::persistence::{InMemoryRunStore, RunFilter, RunStore, SqliteRunStore};
use knowledge_pipeline::provider::MockEmbeddingEngine;
use knowledge_pipeline::tasks::register_builtins;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let store: Arc<dyn RunStore> = if cmd.no_history {
        Arc::new(InMemoryRunStore::new())
    } else {
        Arc::new(SqliteRunStore::with_default_path().await?)
    };

    // No real provider client ships with the binary
    let embedding = &config.embedding;
    let mut tasks = TaskRegistry::new();
    register_builtins(
        &mut tasks,
        Arc::new(MockEmbeddingEngine::new(embedding.dimensions, embedding.batch_size)),
        RateLimiter::new(embedding.max_concurrent),
        config.retry.to_policy(),
    );

    let pipelines = PipelineRegistry::new();
    let pipeline = pipelines.register(config.to_pipeline()).await?;
    println!(
        "  {} tasks, id {}",
        style(pipeline.tasks().len()).cyan(),
        style(pipeline.id).dim()
    );

    let engine = ExecutionEngine::new(
        pipelines,
        tasks,
        store,
        Arc::new(DirectoryDatasets::new(&cmd.data_dir)),
    );

    let mut handle = engine
        .run_pipeline(pipeline.id, &cmd.dataset, cmd.force)
        .await?;

    let spinner = create_item_spinner();
    let mut failed = false;
    loop {
        let event = tokio::select! {
            event = handle.next() => event,
            _ = tokio::signal::ctrl_c() => {
                spinner.println(format!("{} Cancelling run...", WARN));
                handle.cancel();
                continue;
            }
        };

        let Some(event) = event else { break };
        match &event {
            PipelineRunInfo::Yield { .. } => {
                spinner.inc(1);
                if cmd.show_items {
                    spinner.println(format_run_event(&event));
                }
            }
            PipelineRunInfo::Errored { .. } => {
                failed = true;
                spinner.println(format_run_event(&event));
            }
            _ => spinner.println(format_run_event(&event)),
        }
    }
    spinner.finish_and_clear();

    if !cmd.no_history {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&handle.run_id().to_string()[..8]).dim()
        );
    }

    if failed {
        println!("\n{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
        std::process::exit(1);
    }

    println!(
        "\n{} {} completed {}",
        CHECK,
        style(&pipeline.name).bold(),
        style("successfully").green()
    );
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Tasks: {}", style(config.tasks.len()).cyan());
            for (ordinal, task) in config.tasks.iter().enumerate() {
                println!("    #{} {} ({})", ordinal, style(&task.name).cyan(), task.kind);
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = SqliteRunStore::with_default_path().await?;

    // A single run with its task runs
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        let Some(run) = store.load_run(run_id).await? else {
            println!("{} Run not found", WARN);
            return Ok(());
        };
        let task_runs = store.list_task_runs(run_id).await?;

        if cmd.json {
            let data = serde_json::json!({ "run": run, "task_runs": task_runs });
            println!("{}", serde_json::to_string_pretty(&data)?);
            return Ok(());
        }

        println!("{} Run Details", INFO);
        println!("  ID: {}", style(run.id).cyan());
        println!("  Pipeline: {}", style(run.pipeline_id).dim());
        println!("  Dataset: {}", style(&run.dataset_id).bold());
        println!("  Status: {}", format_status(run.status));
        if let (Some(started), Some(finished)) = (run.started_at, run.finished_at) {
            if let Ok(duration) = finished.signed_duration_since(started).to_std() {
                println!("  Duration: {}", style(format_duration(duration)).dim());
            }
        }
        if let Some(error) = &run.error {
            println!("  Error: {}", style(error).red());
        }
        for task_run in &task_runs {
            println!("  {}", format_task_run(task_run));
        }
        return Ok(());
    }

    let pipeline_id = cmd
        .pipeline
        .as_deref()
        .map(uuid::Uuid::parse_str)
        .transpose()
        .context("Invalid pipeline ID format")?;
    let runs = store
        .list_runs(&RunFilter {
            pipeline_id,
            dataset_id: cmd.dataset.clone(),
            limit: Some(cmd.limit),
        })
        .await?;

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for run in &runs {
            println!("  {}", format_run(run));
        }
    }

    Ok(())
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
