// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # OS Watcher CLI
//!
//! The `oswatcher` binary captures a libvirt virtual machine's operating
//! system into the graph store.
//!
//! ## Commands
//!
//! - `oswatcher capture <VM>` - Boot a disposable clone and capture it
//! - `oswatcher store wipe` - Delete every node from the graph store
//! - `oswatcher import <IMAGE>...` - Define libvirt domains for disk images
//! - `oswatcher config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use oswatcher_cli::commands::{self, CaptureArgs, ConfigCommand, ImportArgs, StoreCommand};

/// OS Watcher - Capture operating systems into a graph database
#[derive(Parser)]
#[command(name = "oswatcher")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "OSWATCHER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "OSWATCHER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Shortcut for --log-level debug
    #[arg(short, long, global = true)]
    debug: bool,

    /// Serve Prometheus metrics on this address while the command runs
    #[arg(long, global = true, env = "OSWATCHER_METRICS_ADDR", value_name = "ADDR")]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a virtual machine into the graph store
    #[command(name = "capture")]
    Capture(CaptureArgs),

    /// Graph store maintenance
    #[command(name = "store")]
    Store {
        #[command(subcommand)]
        command: StoreCommand,
    },

    /// Import disk images as libvirt domains
    #[command(name = "import")]
    Import(ImportArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    init_logging(level)?;

    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr)?;
    }

    match cli.command {
        Some(Commands::Capture(args)) => commands::capture::handle_command(args, cli.config).await,
        Some(Commands::Store { command }) => {
            commands::store::handle_command(command, cli.config).await
        }
        Some(Commands::Import(args)) => commands::import::handle_command(args, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

fn init_metrics(addr: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Serving metrics on http://{}/metrics", addr);
    Ok(())
}
