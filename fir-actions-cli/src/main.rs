//! fir-actions CLI: drive the actions and blocks workflow from a terminal.
//!
//! Every command loads the JSON state file, runs one engine operation and
//! saves the state again when autosave is on.

mod commands;
mod output;

use clap::Parser;
use fir_actions_core::config::{ConfigOverrides, FirConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Remediation actions and network blocks for incident response
#[derive(Parser, Debug)]
#[command(name = "fir-actions", version, about, long_about = None)]
pub struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// State file (overrides store.state_path)
    #[arg(long)]
    state: Option<PathBuf>,

    /// Act as this user (falls back to FIR_ACTIONS_USER)
    #[arg(long = "as", value_name = "USER")]
    actor: Option<String>,

    /// Print records as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Load business lines, users, locations and templates from a TOML fixture
    Seed {
        /// Fixture file
        fixture: PathBuf,
    },
    /// Manage incidents
    Incident {
        #[command(subcommand)]
        action: IncidentAction,
    },
    /// Manage actions
    Action {
        #[command(subcommand)]
        action: ActionAction,
    },
    /// Manage blocks
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },
    /// Inspect indicators
    Artifacts {
        #[command(subcommand)]
        action: ArtifactsAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Create the default workspace configuration file
    Init,
    /// Show the effective configuration
    Show,
}

#[derive(clap::Subcommand, Debug)]
pub enum IncidentAction {
    /// Open an incident and instantiate its action templates
    Create {
        /// Incident subject
        subject: String,
        /// Concerned business line, by name (repeatable)
        #[arg(short, long = "business-line")]
        business_lines: Vec<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        detection: Option<String>,
        #[arg(long)]
        plan: Option<String>,
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ActionAction {
    /// Create an action by hand
    Create {
        /// Action subject
        subject: String,
        /// Owning business line, by name
        #[arg(short, long = "business-line")]
        business_line: String,
        /// Incident id
        #[arg(short, long)]
        incident: Option<u64>,
        /// investigation, alerting, countermeasure or other
        #[arg(short = 't', long = "type", default_value = "other")]
        action_type: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Apply a transition (assign, block, unblock, close, force_close)
    Transition {
        id: u64,
        transition: String,
        /// Free-text reason appended to the audit comment
        #[arg(short, long)]
        comment: Option<String>,
        /// Business line to assign to, by name
        #[arg(short, long = "business-line")]
        business_line: Option<String>,
        /// Replace the subject on assign
        #[arg(long)]
        subject: Option<String>,
        /// Replace the description on assign
        #[arg(long)]
        description: Option<String>,
    },
    /// List visible actions, newest first
    List {
        #[arg(short, long)]
        incident: Option<u64>,
        /// active or inactive
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show an action with its audit trail and available transitions
    Show { id: u64 },
}

#[derive(clap::Subcommand, Debug)]
pub enum BlockAction {
    /// Request blocks on behalf of an incident, one per target line
    Add {
        /// Incident id
        #[arg(short, long)]
        incident: u64,
        /// Block location, by name
        #[arg(long = "where")]
        location: String,
        /// Block type, by name
        #[arg(long = "how")]
        block_type: String,
        /// Targets; each argument is one target
        #[arg(required = true)]
        what: Vec<String>,
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Apply a transition (approve, refuse, enforce, block, unblock, ...)
    Transition {
        id: u64,
        transition: String,
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// List visible blocks, newest first
    List {
        #[arg(short, long)]
        incident: Option<u64>,
        /// active or inactive
        #[arg(short, long)]
        status: Option<String>,
        /// Block location, by name
        #[arg(long = "where")]
        location: Option<String>,
        /// Block type, by name
        #[arg(long = "how")]
        block_type: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ArtifactsAction {
    /// Extract indicators from text without touching the state
    Extract { text: String },
    /// Show the indicators linked to a block
    Show { block: u64 },
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let overrides = ConfigOverrides {
        state_path: cli.state.clone(),
        log_level: None,
    };
    let config = fir_actions_core::load_config(Some(&workspace), Some(&overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let _guard = init_tracing(&cli, &config);

    commands::handle_command(&cli, &workspace, &config)
}

/// Install the stderr layer and, when configured, a daily JSON log file.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(
    cli: &Cli,
    config: &FirConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = match cli.verbose {
        0 if cli.quiet => "error".to_string(),
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    if !config.logging.json_file {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    }

    let log_dir = config.logging.log_dir.clone().unwrap_or_else(|| {
        directories::ProjectDirs::from("org", "fir", "fir-actions")
            .map(|d| d.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "fir-actions.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    Some(guard)
}
