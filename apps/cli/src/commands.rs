//! CLI command definitions, routing, and tracing setup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use vigil_core::{
    BatchOptions, Committer, Engine, GitCommitter, HandlebarsRenderer, NoopCommitter,
    render_summary,
};
use vigil_dedup::FingerprintIndex;
use vigil_discovery::{HttpSearchSource, Ingestor};
use vigil_shared::{
    AppConfig, MonitorEntry, StateTag, config_file_path, init_config, load_config,
    validate_tracker_token,
};
use vigil_tracker::{HttpTracker, RateLimiter, TrackerClient};
use vigil_workflow::matcher::KeywordScorer;
use vigil_workflow::{WorkflowRegistry, load_all};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Vigil — label-driven batch processing for discovered content.
#[derive(Parser)]
#[command(
    name = "vigil",
    version,
    about = "Discover monitored content, file tickets, and drive them through analysis workflows.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Lifecycle stage filter for `run`.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StageArg {
    Discovery,
    Analysis,
    Assigned,
    Processing,
    Ready,
}

impl From<StageArg> for StateTag {
    fn from(stage: StageArg) -> Self {
        match stage {
            StageArg::Discovery => StateTag::Discovery,
            StageArg::Analysis => StateTag::Analysis,
            StageArg::Assigned => StateTag::Assigned,
            StageArg::Processing => StateTag::Processing,
            StageArg::Ready => StateTag::Ready,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process a batch of open tickets through their lifecycle stages.
    Run {
        /// Maximum tickets to pull this run (defaults to config).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Match and detect only; mutate nothing.
        #[arg(long)]
        dry_run: bool,

        /// Keep going after per-ticket errors (defaults to config).
        #[arg(long)]
        continue_on_error: Option<bool>,

        /// Only pull tickets carrying at least one of these labels
        /// (repeatable).
        #[arg(long = "label-filter")]
        label_filter: Vec<String>,

        /// Only process tickets currently in this stage.
        #[arg(long)]
        stage: Option<StageArg>,

        /// Worker pool size (defaults to config).
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Batch deadline in seconds; unstarted tickets past it are
        /// skipped.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Search monitored queries and file tickets for new content.
    Discover {
        /// Run a single ad-hoc query instead of the configured monitors.
        #[arg(long)]
        query: Option<String>,

        /// Report what would be filed without filing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Workflow definition management.
    Workflows {
        #[command(subcommand)]
        action: WorkflowsAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Workflow subcommands.
#[derive(Subcommand)]
pub(crate) enum WorkflowsAction {
    /// List loaded workflow definitions.
    List,
    /// Validate every definition in the workflows directory.
    Check,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "vigil=info",
        1 => "vigil=debug",
        _ => "vigil=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            batch_size,
            dry_run,
            continue_on_error,
            label_filter,
            stage,
            max_concurrency,
            timeout_secs,
        } => {
            cmd_run(
                batch_size,
                dry_run,
                continue_on_error,
                label_filter,
                stage,
                max_concurrency,
                timeout_secs,
            )
            .await
        }
        Command::Discover { query, dry_run } => cmd_discover(query, dry_run).await,
        Command::Workflows { action } => match action {
            WorkflowsAction::List => cmd_workflows_list(),
            WorkflowsAction::Check => cmd_workflows_check(),
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

fn build_tracker(config: &AppConfig) -> Result<Arc<dyn TrackerClient>> {
    let limiter = Arc::new(RateLimiter::new(
        Duration::from_millis(config.tracker.rate_limit_ms),
        Duration::from_millis(config.tracker.max_wait_ms),
    ));
    Ok(Arc::new(HttpTracker::new(&config.tracker, limiter)?))
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    bar.enable_steady_tick(Duration::from_millis(80));
    bar.set_message(message.to_string());
    bar
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    batch_size: Option<usize>,
    dry_run: bool,
    continue_on_error: Option<bool>,
    label_filter: Vec<String>,
    stage: Option<StageArg>,
    max_concurrency: Option<usize>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let config = load_config()?;
    validate_tracker_token(&config)?;

    let registry = Arc::new(WorkflowRegistry::load(Path::new(&config.workflows.dir))?);
    let tracker = build_tracker(&config)?;
    let committer: Arc<dyn Committer> = if dry_run {
        Arc::new(NoopCommitter)
    } else {
        let cwd = std::env::current_dir().map_err(|e| eyre!("working directory: {e}"))?;
        Arc::new(GitCommitter::new(cwd))
    };

    let engine = Engine::new(
        tracker,
        registry,
        Some(Arc::new(KeywordScorer)),
        config.matcher.clone(),
        Arc::new(HandlebarsRenderer::new()),
        committer,
    );

    let opts = BatchOptions {
        max_concurrency: max_concurrency.unwrap_or(config.batch.max_concurrency),
        continue_on_error: continue_on_error.unwrap_or(config.batch.continue_on_error),
        dry_run,
        stage: stage.map(StateTag::from),
        timeout: timeout_secs.map(Duration::from_secs),
    };

    let bar = spinner("Selecting tickets");
    let tickets = engine
        .select_tickets(&label_filter, batch_size.unwrap_or(config.batch.batch_size))
        .await?;
    info!(count = tickets.len(), dry_run, "tickets selected");

    bar.set_message(format!("Processing {} ticket(s)", tickets.len()));
    let batch = engine.run_batch(tickets, &opts).await?;
    bar.finish_and_clear();

    print!("{}", render_summary(&batch));
    Ok(())
}

async fn cmd_discover(query: Option<String>, dry_run: bool) -> Result<()> {
    let config = load_config()?;
    validate_tracker_token(&config)?;
    if config.discovery.endpoint.is_empty() {
        return Err(eyre!("no discovery endpoint configured; run `vigil config init`"));
    }

    let index = Arc::new(FingerprintIndex::from_config(&config.dedup)?);
    let tracker = build_tracker(&config)?;
    let source = Arc::new(HttpSearchSource::new(config.discovery.endpoint.clone())?);
    let ingestor = Ingestor::new(source, tracker, index);

    let monitors: Vec<MonitorEntry> = match query {
        Some(query) => vec![MonitorEntry {
            query,
            labels: Vec::new(),
        }],
        None => config.discovery.monitors.clone(),
    };
    if monitors.is_empty() {
        return Err(eyre!("no monitors configured and no --query given"));
    }

    let bar = spinner("Searching monitored queries");
    let report = ingestor.run_all(&monitors, dry_run).await?;
    bar.finish_and_clear();

    if dry_run {
        println!(
            "Dry run: {} new, {} duplicate(s)",
            report.would_create, report.duplicates
        );
    } else {
        println!(
            "Filed {} ticket(s); {} duplicate(s), {} error(s)",
            report.created, report.duplicates, report.errors
        );
    }
    Ok(())
}

fn cmd_workflows_list() -> Result<()> {
    let config = load_config()?;
    let registry = WorkflowRegistry::load(Path::new(&config.workflows.dir))?;

    let workflows = registry.all();
    if workflows.is_empty() {
        println!("No workflow definitions in {}", config.workflows.dir);
        return Ok(());
    }

    for wf in workflows {
        let triggers: Vec<&str> = wf.trigger_labels.iter().map(String::as_str).collect();
        println!(
            "{:<24} {:<28} priority {:>2}  triggers: {}  deliverables: {}",
            wf.id,
            wf.display_name,
            wf.priority,
            triggers.join(", "),
            wf.deliverables.len()
        );
    }
    Ok(())
}

fn cmd_workflows_check() -> Result<()> {
    let config = load_config()?;
    match load_all(Path::new(&config.workflows.dir)) {
        Ok(definitions) => {
            println!("{} definition(s) OK", definitions.len());
            Ok(())
        }
        Err(vigil_shared::VigilError::Definition { problems }) => {
            for problem in &problems {
                eprintln!("  - {problem}");
            }
            Err(eyre!("{} definition problem(s)", problems.len()))
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config written to {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let rendered =
        toml::to_string_pretty(&config).map_err(|e| eyre!("failed to render config: {e}"))?;
    println!("# {}", config_file_path()?.display());
    print!("{rendered}");
    Ok(())
}
