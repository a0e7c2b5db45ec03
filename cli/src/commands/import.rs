// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Image import command

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tracing::error;

use oswatcher_core::infrastructure::{ImageImporter, ImportOutcome, VirshClient};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// qcow2 disk images, each with a `.json` metadata file next to it
    #[arg(value_name = "IMAGE", required = true)]
    pub images: Vec<PathBuf>,

    /// Domain name to define (only valid with a single image)
    #[arg(long)]
    pub vm_name: Option<String>,
}

pub async fn handle_command(args: ImportArgs, config_override: Option<PathBuf>) -> Result<()> {
    if args.vm_name.is_some() && args.images.len() > 1 {
        bail!("--vm-name can only be used when importing a single image");
    }

    let config = super::load_config(config_override)?;
    let connection = &config.spec.connection;
    let importer = ImageImporter::new(
        VirshClient::new(connection.uri.clone(), connection.virsh_path.clone()),
        config.spec.import.clone(),
    );

    let mut failed = 0usize;
    for image in &args.images {
        match importer.import(image, args.vm_name.as_deref()).await {
            Ok(ImportOutcome::Defined { name, disk }) => {
                println!(
                    "{}",
                    format!("✓ Defined {} ({})", name, disk.display()).green()
                );
            }
            Ok(ImportOutcome::AlreadyDefined { name }) => {
                println!("{}", format!("⊘ {} already defined", name).yellow());
            }
            Err(e) => {
                failed += 1;
                error!("Failed to import {:?}: {}", image, e);
                println!("{}", format!("✗ {}: {}", image.display(), e).red());
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} images failed to import", failed, args.images.len());
    }
    Ok(())
}
