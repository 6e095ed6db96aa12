//! audiomanager - automatic per-application volume control
//!
//! Polls the audio sessions, applies the volume profiles and serves the
//! HTTP control endpoints.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiomanager::api::{self, ApiState};
use audiomanager::backend::{create_backend, AudioBackend};
use audiomanager::config::{BackendKind, SettingsFile, DEFAULT_RETRY_DELAY};
use audiomanager::control::Controller;
use audiomanager::paths::AppPaths;
use audiomanager::poller::Poller;

/// audiomanager - Lower music while you talk, raise it when you stop
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding config.yaml and profiles/ (portable layout)
    #[arg(short, long, env = "AUDIOMANAGER_DIR")]
    config_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Audio backend, overriding the settings file
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// List the current audio sessions and exit
    #[arg(long)]
    list_sessions: bool,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = match &args.config_dir {
        Some(dir) => AppPaths::portable(dir),
        None => AppPaths::detect(),
    };
    paths.ensure_directories()?;

    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("Starting audiomanager v{}...", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", paths.base_dir().display());

    // Startup waits for a valid settings file like every later reload
    let settings_file = Arc::new(SettingsFile::new(&paths.config));
    let settings = settings_file.load_with_retry(DEFAULT_RETRY_DELAY).await;
    let backend = create_backend(args.backend.unwrap_or(settings.backend), &settings.tools);

    if args.list_sessions {
        return list_sessions(backend.as_ref()).await;
    }

    let controller = Controller::new(Arc::clone(&settings_file), Arc::clone(&backend));
    if let Err(e) = controller.reset_hear_through().await {
        warn!("Failed to reset hear through: {:#}", e);
    }

    let mut poller = Poller::new(&paths, settings_file, Arc::clone(&backend));

    if args.once {
        let (settings, profiles) = poller.load().await;
        let report = poller.tick(&settings, &profiles).await;
        info!(
            "Device: {:?}, started transitions: {:?}",
            report.device, report.scheduled
        );
        while poller.scheduler().in_flight_count() > 0 {
            tokio::time::sleep(settings.transition_step()).await;
        }
        return Ok(());
    }

    let state = Arc::new(ApiState { controller });
    let port = settings.port;
    tokio::spawn(async move {
        if let Err(e) = api::start_server(state, port).await {
            error!("Control API stopped: {:#}", e);
        }
    });

    poller.run(shutdown_signal()).await;

    info!("Shutting down...");
    Ok(())
}

/// Console output plus a daily rolling file in the logs directory
fn init_logging(level: &str, paths: &AppPaths) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "audiomanager.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

async fn list_sessions(backend: &dyn AudioBackend) -> Result<()> {
    use colored::*;

    let sessions = backend.sessions().await?;

    println!("\n{}", "=== Audio Sessions ===".bold().cyan());
    if sessions.is_empty() {
        println!("  {}", "No audio sessions".yellow());
    }

    for session in &sessions {
        let state = if session.is_active {
            "active".green()
        } else {
            "idle".dimmed()
        };
        let muted = if session.is_muted { " (muted)".red() } else { "".normal() };
        println!(
            "  {:<32} {:>5.2}  {}{}",
            session.name().bold(),
            session.volume,
            state,
            muted
        );
    }

    match backend.default_output_device().await {
        Ok(device) => println!("\n  Default output: {}", device.green()),
        Err(e) => println!("\n  Default output: {}", e.to_string().red()),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
