use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forgeflow::config::AppConfig;
use forgeflow::server::{create_router, AppState};
use forgeflow::shutdown::{graceful_shutdown, wait_for_shutdown};
use forgeflow::workflow::{Pipeline, RunOutcome, RunRequest};

#[derive(Parser)]
#[command(
    name = "forgeflow",
    about = "Generate, validate, repair and publish workflow agents"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a single run and print its report
    Run {
        /// JSON file holding the workflow specification
        #[arg(long)]
        spec: PathBuf,
        /// Target repository, `owner/repo` or an HTTPS URL
        #[arg(long)]
        repo: String,
        /// Branch to publish to (defaults to a timestamped name)
        #[arg(long)]
        branch: Option<String>,
        /// Revision attempts after the first generation
        #[arg(long)]
        max_revisions: Option<u32>,
        /// Also save the artifact locally when it is published
        #[arg(long)]
        download: bool,
        /// Remote-control endpoint embedded into the artifact
        #[arg(long)]
        os_url: Option<String>,
    },
    /// Accept runs over HTTP
    Serve,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            spec,
            repo,
            branch,
            max_revisions,
            download,
            os_url,
        } => {
            let raw = tokio::fs::read_to_string(&spec)
                .await
                .with_context(|| format!("reading {}", spec.display()))?;
            let spec: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", spec.display()))?;

            let mut request = RunRequest::new(spec, repo);
            request.branch_name = branch;
            request.max_revision_attempts = max_revisions;
            request.download = download;
            request.os_url = os_url;

            let outcome = run_once(&config, request).await?;
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Command::Serve => serve(config).await?,
    }

    Ok(())
}

async fn run_once(config: &AppConfig, request: RunRequest) -> anyhow::Result<RunOutcome> {
    let pipeline = Pipeline::from_config(config).await?;
    let run_id = uuid::Uuid::new_v4().to_string();

    // Ctrl+C cancels the run; the sandbox is still torn down.
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        cancel_tx.send_replace(true);
    });

    let report = pipeline.run(&run_id, request, cancel_rx).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.outcome)
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        max_concurrent_runs = config.server.max_concurrent_runs,
        "Starting Forgeflow server"
    );

    let state = Arc::new(AppState::new(config.clone()).await?);

    let queue_state = Arc::clone(&state);
    tokio::spawn(async move {
        forgeflow::queue::run_queue_processor(queue_state).await;
    });

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(())
}
