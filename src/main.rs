//! Warden - fleet supervisor daemon
//!
//! # Usage
//!
//! ```bash
//! # Run with ./warden.toml (or $WARDEN_CONFIG, or built-in defaults)
//! warden
//!
//! # Explicit config, different bind address, JSON logs
//! warden --config /etc/warden/warden.toml --addr 0.0.0.0:6000 --log-json
//!
//! # Validate a config and print the effective settings
//! warden check-config --config warden.toml
//! ```
//!
//! # Environment Variables
//!
//! - `WARDEN_CONFIG`: path to the TOML config file
//! - `WARDEN_CORS_ORIGINS`: comma-separated origins allowed to call the API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use warden::api::{create_app, ApiState};
use warden::config::SupervisorConfig;
use warden::storage::ProcessLock;
use warden::supervisor::{Collaborators, ControlLoop};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Fleet supervisor: health checks, bounded restarts, tiered approvals")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the server address (default from [server].addr)
    #[arg(short, long)]
    addr: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "WARDEN_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Load and validate the config, then print the effective settings
    CheckConfig,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    ControlLoop,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::ControlLoop => write!(f, "ControlLoop"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the control loop task into the JoinSet.
fn spawn_control_loop(
    task_set: &mut JoinSet<Result<TaskName>>,
    control_loop: ControlLoop,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        control_loop.run(cancel_token).await;
        Ok(TaskName::ControlLoop)
    });
}

/// Monitor tasks; cancel everything when one fails.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {:#}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the remaining tasks observe cancellation and finish
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("Supervisor: task {} stopped", task_name),
            Ok(Err(e)) => error!("Supervisor: task failed during shutdown: {:#}", e),
            Err(e) => error!("Supervisor: task panicked during shutdown: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Startup
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn check_config(config: &SupervisorConfig) -> Result<()> {
    let rendered = config.to_toml().context("Failed to render config")?;
    println!("# Effective configuration");
    println!("{rendered}");
    info!(
        units = config.units.len(),
        enabled = config.enabled_units().count(),
        "Config is valid"
    );
    Ok(())
}

async fn run_daemon(config: SupervisorConfig, addr_override: Option<String>) -> Result<()> {
    let config = Arc::new(config);
    let server_addr = addr_override.unwrap_or_else(|| config.server.addr.clone());

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  {} - fleet supervisor", config.daemon.name);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (name, unit) in &config.units {
        info!(
            unit = %name,
            enabled = unit.enabled,
            auto_restart = unit.auto_restart,
            session = %unit.session(name),
            "Unit configured"
        );
    }

    let _process_lock = ProcessLock::acquire(&config.daemon.data_dir)
        .context("Failed to acquire process lock")?;
    info!("Process lock acquired");

    let collaborators = Collaborators::system(&config).context("Failed to open action store")?;
    let (control_loop, commands, snapshot) = ControlLoop::new(Arc::clone(&config), collaborators);

    let app = create_app(ApiState::new(snapshot, commands));
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {server_addr}"))?;
    info!("HTTP API listening on http://{}/api/v1", server_addr);

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_control_loop(&mut task_set, control_loop, cancel_token.clone());

    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let config = SupervisorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Some(SubCommand::CheckConfig) => check_config(&config)?,
        None => {
            run_daemon(config, args.addr).await?;
            info!("Warden shutdown complete");
        }
    }
    Ok(())
}
