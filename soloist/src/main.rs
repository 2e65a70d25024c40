//! Soloist - single-instance coordination
//!
//! CLI entry point: settles ownership for the configured key, then stays
//! resident until displaced or interrupted.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info};

use soloist::cli::{Cli, Command};
use soloist::config::Config;
use soloist::{ExitReason, InstanceCoordinator, Resolution, VERSION, segment_exists};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soloist")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Racing instances share this file, so never truncate it
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("soloist.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(pid = std::process::id(), "Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    if let Some(key) = &cli.key {
        config.key = key.clone();
    }
    let version = cli.as_version.clone().unwrap_or_else(|| VERSION.to_string());
    let coordinator = InstanceCoordinator::from_config(&config, version).context("Invalid coordination key")?;

    debug!(command = ?cli.command, quit = cli.quit, "main: dispatching command");
    match cli.command {
        Some(Command::Status) => cmd_status(&coordinator).await,
        None => cmd_run(&coordinator, &cli).await,
    }
}

/// Report the running instance without disturbing it
async fn cmd_status(coordinator: &InstanceCoordinator) -> Result<()> {
    debug!("cmd_status: called");
    let key = coordinator.key();

    if !segment_exists(key) {
        println!("{} No instance of {} is running", "○".dimmed(), key.to_string().cyan());
        return Ok(());
    }

    match coordinator.client().query_version().await {
        Ok(version) => {
            println!(
                "{} {} is running (version {})",
                "●".green(),
                key.to_string().cyan(),
                version.yellow()
            );
        }
        Err(e) => {
            debug!(error = %e, "cmd_status: owner unreachable");
            println!("{} No reachable instance of {}", "○".dimmed(), key.to_string().cyan());
        }
    }
    Ok(())
}

/// Settle ownership, then stay resident as long as this instance should run
async fn cmd_run(coordinator: &InstanceCoordinator, cli: &Cli) -> Result<()> {
    let key = coordinator.key().to_string();
    // Installed before serving so a SIGTERM never skips the release
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let resolution = coordinator.start(cli.scheme()).await;

    match &resolution {
        Resolution::Owner => {
            if !cli.quit {
                println!("{} {} running (version {})", "✓".green(), key.cyan(), coordinator.version());
            }
        }
        Resolution::Conceded { remote_version } => {
            println!(
                "{} {} is already running (version {})",
                "✗".yellow(),
                key.cyan(),
                remote_version
            );
        }
        Resolution::Unenforced if cli.quit => {
            eprintln!("{} Could not stop the running {}", "!".red(), key.cyan());
        }
        Resolution::Unenforced => {
            eprintln!(
                "{} Could not coordinate with other {} instances; running anyway",
                "!".red(),
                key.cyan()
            );
        }
    }

    if cli.quit {
        info!("Quit requested, shutting down after coordination");
        coordinator.shutdown().await;
        if resolution.became_owner() {
            println!("{} Stopped {}", "✓".green(), key.cyan());
        }
        return Ok(());
    }

    let reason = wait_for_exit(coordinator, &mut sigterm).await;
    info!(?reason, "Exiting");
    coordinator.shutdown().await;

    if reason == Some(ExitReason::Displaced) {
        println!("{} {} {}", "→".blue(), key.cyan(), ExitReason::Displaced);
    }
    Ok(())
}

/// Wait for a coordination exit request or a termination signal
async fn wait_for_exit(coordinator: &InstanceCoordinator, sigterm: &mut Signal) -> Option<ExitReason> {
    tokio::select! {
        reason = coordinator.wait_for_exit() => Some(reason),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            None
        }
    }
}
