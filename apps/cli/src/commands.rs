//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use llmsforge_core::{DetailLevel, PipelineHandle, RestartStage, plan_restart, summarize, task_detail};
use llmsforge_shared::adapters::ProgressSink;
use llmsforge_shared::{Request, StartInput, StopAfterStage, TaskId, now_ms};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// llmsforge — turn documentation into searchable, AI-ready vector content.
#[derive(Parser)]
#[command(
    name = "llmsforge",
    version,
    about = "Discover, fetch, synthesize, and embed documentation into a vector store.",
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

/// Which kind of seed a `submit` input is (§4.3 `StartInput`).
#[derive(Clone, Debug, ValueEnum)]
pub(crate) enum InputKind {
    /// A topic string or a URL, runs discovery first.
    TopicOrUrl,
    /// Path to a previously-written discovery sources file.
    DiscoveryFile,
    /// Path to a previously-written fetch output directory.
    FetchDir,
    /// Path to a previously-synthesized content file.
    SynthesizedFile,
}

/// Where a task should stop short of embedding (§4.3 `StopAfterStage`).
#[derive(Clone, Debug, ValueEnum)]
pub(crate) enum StopAfter {
    Discovery,
    Fetch,
    Synthesize,
}

impl From<StopAfter> for StopAfterStage {
    fn from(value: StopAfter) -> Self {
        match value {
            StopAfter::Discovery => StopAfterStage::Discovery,
            StopAfter::Fetch => StopAfterStage::Fetch,
            StopAfter::Synthesize => StopAfterStage::Synthesize,
        }
    }
}

/// Which stage a restart plan should resume at (§4.10).
#[derive(Clone, Debug, ValueEnum)]
pub(crate) enum RestartAt {
    Discovery,
    Fetch,
    Synthesize,
    Embed,
}

impl From<RestartAt> for RestartStage {
    fn from(value: RestartAt) -> Self {
        match value {
            RestartAt::Discovery => RestartStage::Discovery,
            RestartAt::Fetch => RestartStage::Fetch,
            RestartAt::Synthesize => RestartStage::Synthesize,
            RestartAt::Embed => RestartStage::Embed,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Submit a new ingestion task and run it to completion (or to
    /// `--stop-after`).
    Submit {
        /// The seed value: a topic/URL, or a path, per `--input-kind`.
        input: String,

        /// Category label stored on the task's artifacts.
        #[arg(short, long)]
        category: String,

        /// What kind of value `input` is.
        #[arg(long, value_enum, default_value = "topic-or-url")]
        input_kind: InputKind,

        /// Crawl depth for discovery (default 2).
        #[arg(long)]
        crawl_depth: Option<u32>,

        /// Maximum sources to discover/fetch (default 50).
        #[arg(long)]
        max_urls: Option<usize>,

        /// Maximum LLM calls during synthesis (default 10).
        #[arg(long)]
        max_llm_calls: Option<usize>,

        /// Stop after this stage instead of running to embed.
        #[arg(long, value_enum)]
        stop_after: Option<StopAfter>,
    },

    /// Inspect and control submitted tasks.
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },

    /// Print an overall progress summary (§4.11).
    Progress,

    /// Build the request that would restart a failed task at a given stage
    /// (§4.10), without submitting it.
    RestartPlan {
        /// The failed task's id.
        task_id: String,

        /// Stage to resume at.
        #[arg(long, value_enum)]
        stage: RestartAt,

        /// Submit the resulting request immediately instead of just printing it.
        #[arg(long)]
        submit: bool,
    },
}

/// `tasks` subcommands.
#[derive(Subcommand)]
pub(crate) enum TasksAction {
    /// List every task's id and status.
    List,
    /// Show a single task's status fields.
    Get { task_id: String },
    /// Show a single task's `details`, simplified or raw.
    Details {
        task_id: String,
        /// Print the raw structured JSON instead of a one-line summary.
        #[arg(long)]
        raw: bool,
    },
    /// Request cooperative cancellation of one task.
    Cancel { task_id: String },
    /// Request cooperative cancellation of every non-terminal task.
    CancelAll,
    /// Drop terminal tasks older than `--max-age-ms` (default 24h).
    Cleanup {
        #[arg(long, default_value_t = 86_400_000)]
        max_age_ms: i64,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "llmsforge=info",
        1 => "llmsforge=debug",
        _ => "llmsforge=trace",
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
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner, implementing the
/// pipeline's [`ProgressSink`] trait.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

#[async_trait::async_trait]
impl ProgressSink for CliProgress {
    async fn report(&self, task_id: &str, message: &str) {
        self.spinner.set_message(format!("[{task_id}] {message}"));
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command against an already-wired [`PipelineHandle`].
pub(crate) async fn run(cli: Cli, handle: &PipelineHandle) -> Result<()> {
    match cli.command {
        Command::Submit {
            input,
            category,
            input_kind,
            crawl_depth,
            max_urls,
            max_llm_calls,
            stop_after,
        } => {
            cmd_submit(
                handle,
                input,
                category,
                input_kind,
                crawl_depth,
                max_urls,
                max_llm_calls,
                stop_after,
            )
            .await
        }
        Command::Tasks { action } => match action {
            TasksAction::List => cmd_tasks_list(handle).await,
            TasksAction::Get { task_id } => cmd_tasks_get(handle, &task_id).await,
            TasksAction::Details { task_id, raw } => cmd_tasks_details(handle, &task_id, raw).await,
            TasksAction::Cancel { task_id } => cmd_tasks_cancel(handle, &task_id).await,
            TasksAction::CancelAll => cmd_tasks_cancel_all(handle).await,
            TasksAction::Cleanup { max_age_ms } => cmd_tasks_cleanup(handle, max_age_ms).await,
        },
        Command::Progress => cmd_progress(handle).await,
        Command::RestartPlan { task_id, stage, submit } => {
            cmd_restart_plan(handle, &task_id, stage, submit).await
        }
    }
}

fn start_input(input: String, kind: InputKind) -> StartInput {
    match kind {
        InputKind::TopicOrUrl => StartInput::TopicOrUrl(input),
        InputKind::DiscoveryFile => StartInput::DiscoveryOutputFilePath(input),
        InputKind::FetchDir => StartInput::FetchOutputDirPath(input),
        InputKind::SynthesizedFile => StartInput::SynthesizedContentFilePath(input),
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_submit(
    handle: &PipelineHandle,
    input: String,
    category: String,
    input_kind: InputKind,
    crawl_depth: Option<u32>,
    max_urls: Option<usize>,
    max_llm_calls: Option<usize>,
    stop_after: Option<StopAfter>,
) -> Result<()> {
    let request = Request {
        category,
        start: start_input(input, input_kind),
        crawl_depth,
        max_urls,
        max_llm_calls,
        stop_after_stage: stop_after.map(Into::into),
    };

    let task_id = handle.submit(request).await.map_err(|e| eyre!(e))?;
    info!(%task_id, "task submitted, running dispatcher");

    handle.drain().await.map_err(|e| eyre!(e))?;

    let record = handle
        .registry()
        .get(&task_id)
        .await
        .ok_or_else(|| eyre!("task {task_id} vanished after drain"))?;

    println!();
    println!("  Task:   {task_id}");
    println!("  Status: {:?}", record.status);
    println!("  Stage:  {}", record.stage);
    if !record.details.is_empty() {
        println!("  Details: {}", record.details);
    }
    println!();

    Ok(())
}

async fn cmd_tasks_list(handle: &PipelineHandle) -> Result<()> {
    for task in handle.registry().list().await {
        println!("{}\t{:?}\t{}", task.task_id, task.status, task.stage);
    }
    Ok(())
}

async fn cmd_tasks_get(handle: &PipelineHandle, task_id: &str) -> Result<()> {
    let view = task_detail(handle.registry(), &TaskId::from(task_id.to_string()), DetailLevel::Simple, now_ms())
        .await
        .map_err(|e| eyre!(e))?;
    println!("task_id:  {}", view.task_id);
    println!("status:   {}", view.status);
    println!("stage:    {}", view.stage);
    if let (Some(current), Some(total)) = (view.progress_current, view.progress_total) {
        println!("progress: {current}/{total}");
    }
    if let Some(eta) = view.eta_timestamp {
        println!("eta_ms:   {eta}");
    }
    Ok(())
}

async fn cmd_tasks_details(handle: &PipelineHandle, task_id: &str, raw: bool) -> Result<()> {
    let level = if raw { DetailLevel::Detailed } else { DetailLevel::Simple };
    let view = task_detail(handle.registry(), &TaskId::from(task_id.to_string()), level, now_ms())
        .await
        .map_err(|e| eyre!(e))?;
    println!("{}", view.details);
    Ok(())
}

async fn cmd_tasks_cancel(handle: &PipelineHandle, task_id: &str) -> Result<()> {
    handle
        .cancel_task(&TaskId::from(task_id.to_string()))
        .await
        .map_err(|e| eyre!(e))?;
    println!("cancellation requested for {task_id}");
    Ok(())
}

async fn cmd_tasks_cancel_all(handle: &PipelineHandle) -> Result<()> {
    let count = handle.cancel_all().await.map_err(|e| eyre!(e))?;
    println!("cancellation requested for {count} task(s)");
    Ok(())
}

async fn cmd_tasks_cleanup(handle: &PipelineHandle, max_age_ms: i64) -> Result<()> {
    let removed = handle.cleanup_terminal(max_age_ms).await.map_err(|e| eyre!(e))?;
    println!("removed {removed} terminal task(s) older than {max_age_ms}ms");
    Ok(())
}

async fn cmd_progress(handle: &PipelineHandle) -> Result<()> {
    let summary = summarize(handle.registry(), now_ms()).await;
    println!("By status:");
    let mut statuses: Vec<_> = summary.by_status.iter().collect();
    statuses.sort_by_key(|(label, _)| label.to_string());
    for (label, count) in statuses {
        println!("  {label}: {count}");
    }
    if !summary.running.is_empty() {
        println!("Running:");
        for task in &summary.running {
            println!(
                "  {} [{}] {} ({}ms elapsed)",
                task.task_id, task.stage, task.details, task.elapsed_ms
            );
        }
    }
    Ok(())
}

async fn cmd_restart_plan(
    handle: &PipelineHandle,
    task_id: &str,
    stage: RestartAt,
    submit: bool,
) -> Result<()> {
    let request = plan_restart(handle.registry(), &TaskId::from(task_id.to_string()), stage.into())
        .await
        .map_err(|e| eyre!(e))?;

    if submit {
        let new_task_id = handle.submit(request).await.map_err(|e| eyre!(e))?;
        println!("restarted as {new_task_id}, running dispatcher");
        handle.drain().await.map_err(|e| eyre!(e))?;
    } else {
        println!("{}", serde_json::to_string_pretty(&request)?);
    }
    Ok(())
}
