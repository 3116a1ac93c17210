#![forbid(unsafe_code)]

//! `relaybot` server binary.
//!
//! Bootstraps configuration and the connection pools, then runs the
//! resource monitor, the dispatcher, and the webhook listener until a
//! shutdown signal arrives.

use std::fs::{self, File, OpenOptions};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use relaybot::config::GlobalConfig;
use relaybot::generator::OpenAiGenerator;
use relaybot::ingress::{self, WebhookState};
use relaybot::monitor::{ProcSampler, ResourceMonitor};
use relaybot::notifier::WhatsAppNotifier;
use relaybot::orchestrator::{settle, Collaborators, Dispatcher, GenerationExecutor};
use relaybot::persistence::{PoolManager, QueryRepo};
use relaybot::queue::RequestQueue;
use relaybot::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "relaybot", about = "WhatsApp question-answering relay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Append logs to this file instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Override the webhook listener port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format, args.log_file.as_deref())?;
    info!("relaybot bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.apply_env_overrides();
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.load_credentials().await?;
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let pools = Arc::new(PoolManager::initialize(&config.database).await.map_err(|err| {
        error!(%err, "database unavailable; refusing to start");
        err
    })?);

    // ── Build pipeline ──────────────────────────────────
    let queue = RequestQueue::new();
    let monitor = Arc::new(ResourceMonitor::new(
        Arc::new(ProcSampler::new()),
        config.monitor.clone(),
    ));
    let executor = Arc::new(GenerationExecutor::new(config.dispatcher.generation_threads)?);
    let collaborators = Collaborators {
        generator: Arc::new(OpenAiGenerator::new(config.openai.clone())?),
        notifier: Arc::new(WhatsAppNotifier::new(&config.whatsapp)?),
        store: Arc::new(QueryRepo::new(Arc::clone(&pools))),
    };
    let dispatcher = Dispatcher::new(
        queue.clone(),
        Arc::clone(&monitor),
        collaborators,
        executor,
        config.dispatcher.clone(),
    );

    // ── Start background tasks ──────────────────────────
    let ct = CancellationToken::new();
    let monitor_handle = monitor.start();

    let dispatch_ct = ct.clone();
    let dispatch_handle = tokio::spawn(async move {
        dispatcher.run(&dispatch_ct).await;
    });

    let webhook_ct = ct.clone();
    let webhook_state = WebhookState::new(queue.clone(), config.whatsapp.verify_token.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let webhook_handle = tokio::spawn(async move {
        let served = ingress::serve(webhook_state, addr, webhook_ct.clone()).await;
        if let Err(err) = &served {
            error!(%err, "webhook listener failed");
            webhook_ct.cancel();
        }
        served
    });

    info!(port = config.http_port, "relaybot ready");

    // ── Wait for shutdown signal ────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = ct.cancelled() => {}
    }
    ct.cancel();
    monitor.stop();

    // ── Wait for background tasks ───────────────────────
    let (dispatched, served, monitored) = tokio::join!(
        settle("dispatcher", dispatch_handle),
        settle("webhook", webhook_handle),
        settle("monitor", monitor_handle),
    );
    pools.close().await;
    info!(unprocessed = queue.len(), "relaybot shut down");

    served.unwrap_or_else(|| Err(AppError::Ingress("webhook task did not finish".into())))?;
    if dispatched.is_none() || monitored.is_none() {
        return Err(AppError::Executor("background task did not finish".into()));
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = match log_file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(std::io::stdout),
    };
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none());

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

/// Open `path` for appending, creating it and its parent directory.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            AppError::Config(format!("failed to open log file {}: {err}", path.display()))
        })
}
