// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Graph store maintenance commands
//!
//! Commands: status, wipe

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use tracing::warn;

use oswatcher_core::application::create_graph_store;

#[derive(Subcommand)]
pub enum StoreCommand {
    /// Show the configured backend and how many nodes it holds
    Status,

    /// Delete every node and edge from the graph store
    Wipe {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

pub async fn handle_command(command: StoreCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_override)?;
    let store = create_graph_store(&config.spec.graph)
        .await
        .context("Failed to open graph store")?;

    match command {
        StoreCommand::Status => {
            let nodes = store.node_count().await.context("Failed to count nodes")?;
            println!("{}", "Graph store:".bold());
            println!("  Backend: {:?}", config.spec.graph.backend);
            println!("  URI: {}", config.spec.graph.uri);
            println!("  Nodes: {}", nodes);
        }
        StoreCommand::Wipe { yes } => {
            if !yes {
                bail!("Refusing to wipe the graph store without --yes");
            }
            let before = store.node_count().await.context("Failed to count nodes")?;
            warn!("Wiping graph store ({} nodes)", before);
            store.delete_all().await.context("Failed to wipe graph store")?;
            println!("{}", format!("✓ Removed {} nodes", before).green());
        }
    }

    Ok(())
}
