// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use oswatcher_core::domain::capture_config::CaptureConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./oswatcher-config.yaml)
        #[arg(short, long, default_value = "./oswatcher-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(&output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = CaptureConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. OSWATCHER_CONFIG_PATH: {}",
            std::env::var("OSWATCHER_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./oswatcher-config.yaml");
        println!("  4. ~/.oswatcher/config.yaml");
        println!("  5. /etc/oswatcher/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let connection = &config.spec.connection;
    println!("{}", "Connection:".bold());
    println!("  URI: {}", connection.uri);
    println!("  virsh: {}", connection.virsh_path.display());
    println!("  Clone: {}", connection.clone);
    println!();

    let graph = &config.spec.graph;
    println!("{}", "Graph store:".bold());
    println!("  Backend: {:?}", graph.backend);
    println!("  URI: {}", graph.uri);
    println!("  User: {}", graph.user);
    println!(
        "  Password: {}",
        if graph.password.is_some() { "(set)" } else { "(default)" }
    );
    println!("  Wipe before capture: {}", graph.delete);
    println!();

    let capture = &config.spec.capture;
    println!("{}", "Capture:".bold());
    println!(
        "  VM: {}",
        capture.vm_name.as_deref().unwrap_or("(none)")
    );
    println!(
        "  Desktop ready delay: {}",
        humantime_secs(capture.desktop_ready_delay.as_secs())
    );
    println!("  Replace: {}", capture.guard.replace());
    println!("  Append: {}", capture.guard.append);
    println!();

    let collectors = &config.spec.collectors;
    println!("{}", "Collectors:".bold());
    println!(
        "  hardening: {} ({:?} on failure)",
        enabled(collectors.hardening.enabled),
        collectors.hardening.on_failure
    );
    println!(
        "  introspection: {} ({:?} on failure)",
        enabled(collectors.introspection.enabled),
        collectors.introspection.on_failure
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CaptureConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", output);
    }

    CaptureConfigManifest::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn enabled(flag: bool) -> colored::ColoredString {
    if flag {
        "enabled".green()
    } else {
        "disabled".dimmed()
    }
}

fn humantime_secs(secs: u64) -> String {
    if secs % 60 == 0 && secs > 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
