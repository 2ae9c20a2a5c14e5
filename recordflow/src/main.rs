//! recordflow - fills missing fields of table rows from staged model completions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recordflow::auth::CredentialBroker;
use recordflow::cancellation::CancellationToken;
use recordflow::chain::EnrichmentStageChain;
use recordflow::completion::openai::OpenAiTransport;
use recordflow::completion::CompletionClient;
use recordflow::config::{AppConfig, API_KEY_ENV};
use recordflow::events::LoggingEventSink;
use recordflow::observability::{init_tracing, LogFormat};
use recordflow::reconciler::Reconciler;
use recordflow::stages::presets::{
    builtin_prompts, demo_analysis_stages, demo_completeness_policy, STAGE_NAMES,
};
use recordflow::store::feishu::FeishuClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "recordflow", version, about)]
struct Cli {
    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation pass.
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Process at most this many incomplete records (0 means no limit).
    limit: Option<usize>,

    /// Treat every record as incomplete.
    #[arg(long)]
    all: bool,

    /// Only fill fields that are missing, skipping stages with nothing to do.
    #[arg(long)]
    missing_only: bool,

    /// Records enriched concurrently.
    #[arg(long)]
    workers: Option<usize>,

    /// Directory holding the config files.
    #[arg(long, default_value = ".", env = "RECORDFLOW_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Directory of `<stage>.md` prompt files overriding the built-in ones.
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Also write the report as JSON to this path.
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    init_tracing(format).context("failed to install tracing subscriber")?;

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting recordflow");

    let mut config = AppConfig::load(&args.config_dir)
        .with_context(|| format!("failed to load configuration from {}", args.config_dir.display()))?;
    if args.all {
        config.pass.force_all = true;
    }
    if args.missing_only {
        config.pass.missing_only = true;
    }
    if let Some(workers) = args.workers {
        config.pass.workers = workers.max(1);
    }
    let limit = args.limit.filter(|n| *n > 0);

    let store = Arc::new(FeishuClient::new(config.store.base_url.clone())?);
    let broker = Arc::new(CredentialBroker::new(store.clone(), config.store.broker_settings()));

    let api_key = config
        .completion
        .api_key
        .clone()
        .with_context(|| format!("no completion API key; set {API_KEY_ENV} or api_key in the config"))?;
    let transport = OpenAiTransport::new(
        &config.completion.base_url,
        &config.completion.endpoint,
        api_key,
        config.completion.timeout(),
    )?;
    let mut client = CompletionClient::new(Arc::new(transport), config.completion.model_id.clone())
        .with_retry(config.completion.retry.clone())
        .with_timeout(config.completion.timeout())
        .with_sampling(config.completion.sampling);
    if let Some(ref system) = config.completion.system_prompt {
        client = client.with_system_prompt(system.clone());
    }

    let mut prompts = builtin_prompts();
    if let Some(dir) = args.prompts.or(config.prompts_dir.clone()) {
        prompts = prompts
            .load_dir(&dir, &STAGE_NAMES)
            .with_context(|| format!("failed to read prompts from {}", dir.display()))?;
    }
    let chain = EnrichmentStageChain::new(demo_analysis_stages(&prompts), Arc::new(client));

    let cancel = Arc::new(CancellationToken::new());
    let reconciler = Reconciler::new(
        store,
        broker,
        config.store.reader_config(),
        config.store.table(),
        chain,
        demo_completeness_policy(),
    )
    .with_config(config.pass.clone())
    .with_event_sink(Arc::new(LoggingEventSink::debug()))
    .with_cancellation(cancel.clone());

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight writes");
            signal_token.cancel("interrupted");
        }
    });

    let report = reconciler.run_pass(limit).await.context("pass failed")?;
    println!("{}", report.summary());

    if let Some(path) = args.report_json {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    Ok(())
}
