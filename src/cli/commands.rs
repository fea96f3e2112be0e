//! CLI command definitions

use clap::Args;

/// Run a pipeline over a dataset
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Dataset to process (a directory under the data dir)
    #[arg(short, long)]
    pub dataset: String,

    /// Directory holding one sub-directory per dataset
    #[arg(long, default_value = ".")]
    pub data_dir: String,

    /// Reprocess items that are already done
    #[arg(long)]
    pub force: bool,

    /// Keep run records in memory only
    #[arg(long)]
    pub no_history: bool,

    /// Print every produced item
    #[arg(long)]
    pub show_items: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline ID to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Dataset to filter by
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run with its task runs
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
