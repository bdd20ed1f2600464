//! Gifwright Daemon
//!
//! Standalone process that connects the gifwright conversation engine to the
//! Telegram Bot API and the ffmpeg render pipeline, and runs the indefinite
//! getUpdates long-poll loop.
//!
//! # Usage
//!
//! ```bash
//! # Start with the token from the environment
//! BOT_TOKEN=123:abc gifwright-daemon
//!
//! # With a config file and custom font
//! gifwright-daemon --config ./gifwright.toml --font /fonts/impact.ttf
//!
//! # With verbose logging
//! RUST_LOG=debug gifwright-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `BOT_TOKEN`: bot access token (required)
//! - `GIFWRIGHT_CONFIG`: TOML config file path
//! - `GIFWRIGHT_WORK_DIR`: directory for transient video/GIF files
//! - `GIFWRIGHT_FONT`: font file for the caption overlay
//! - `RUST_LOG`: log level (trace, debug, info, warn, error)
//!
//! # Files
//!
//! - PID file: `$XDG_RUNTIME_DIR/gifwright/gifwright.pid`
//!   (or `/tmp/gifwright-$UID/gifwright.pid`)
//! - Transient artifacts under the work dir, swept at startup
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: graceful shutdown (drains in-flight renders, removes
//!   the PID file)

mod server;

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use gifwright_core::{
    BotConfig, Engine, EngineConfig, FfmpegPipeline, RenderPipeline, TelegramApi, WorkDir,
};

use server::PollServer;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "gifwright-daemon", about = "Telegram video-to-GIF bot daemon")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "GIFWRIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for transient video/GIF files.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Font file for the caption overlay.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Long-poll timeout in seconds.
    #[arg(long, default_value_t = 30)]
    poll_timeout: u64,
}

/// Get the default PID file path.
///
/// Uses `XDG_RUNTIME_DIR` if available, otherwise `/tmp/gifwright-$UID/`.
fn default_pid_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("gifwright")
            .join("gifwright.pid")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/gifwright-{}/gifwright.pid", uid))
    }
}

/// Write the PID file.
fn write_pid_file(path: &PathBuf) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pid = std::process::id();
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", pid)?;

    info!(pid = pid, path = ?path, "PID file created");
    Ok(())
}

/// Remove the PID file.
fn remove_pid_file(path: &PathBuf) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = ?path, "Failed to remove PID file");
        } else {
            info!(path = ?path, "PID file removed");
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gifwright_daemon=info".parse()?)
                .add_directive("gifwright_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    info!("Starting gifwright daemon");
    info!("PID: {}", std::process::id());

    let mut config = BotConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(font) = args.font {
        config.font_file = font;
    }

    let pid_path = default_pid_path();
    write_pid_file(&pid_path)
        .with_context(|| format!("Failed to write PID file at {pid_path:?}"))?;

    let work = WorkDir::open(&config.work_dir)
        .with_context(|| format!("Failed to open work dir {:?}", config.work_dir))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Uploads are private to the requesters; keep the staging dir ours.
        if let Err(e) = fs::set_permissions(work.root(), fs::Permissions::from_mode(0o700)) {
            warn!(error = %e, "Failed to tighten work dir permissions");
        }
    }
    match work.sweep_stale() {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Swept stale artifacts from a previous run"),
        Err(e) => warn!(error = %e, "Stale artifact sweep failed"),
    }

    let pipeline = FfmpegPipeline::new(&config.font_file)
        .with_timeout(Duration::from_secs(config.render_timeout_secs));
    if !pipeline.health_check().await {
        // Not fatal: renders will fail per-request with a user-visible error.
        warn!("ffmpeg not runnable - renders will fail until it is installed");
    }
    if !config.font_file.exists() {
        warn!(font = ?config.font_file, "Configured font does not exist - captioned renders will fail");
    }

    let api = TelegramApi::new(config.token.clone());
    let engine = Arc::new(Engine::new(
        pipeline,
        api.clone(),
        EngineConfig::from(&config),
        work.clone(),
    ));

    let server = PollServer::new(api, Arc::clone(&engine), work, args.poll_timeout);
    let result = server.run(Box::pin(shutdown_signal())).await;

    let stats = engine.stats();
    info!(
        sessions = stats.sessions_started,
        rendered = stats.renders_succeeded,
        failed = stats.renders_failed,
        "Shutting down"
    );
    remove_pid_file(&pid_path);

    result
}
