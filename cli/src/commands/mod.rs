// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the oswatcher CLI

pub mod capture;
pub mod config;
pub mod import;
pub mod store;

pub use self::capture::CaptureArgs;
pub use self::config::ConfigCommand;
pub use self::import::ImportArgs;
pub use self::store::StoreCommand;

use anyhow::{Context, Result};
use std::path::PathBuf;

use oswatcher_core::domain::capture_config::CaptureConfigManifest;

/// Load, override and validate the manifest shared by every command
pub(crate) fn load_config(config_override: Option<PathBuf>) -> Result<CaptureConfigManifest> {
    let config = CaptureConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}
