// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! External hardening scanners

use async_trait::async_trait;
use oswatcher_graph::{HardeningProfile, KernelHardeningFinding};
use std::path::Path;
use thiserror::Error;

/// Computes the binary hardening profile of one executable or shared library
#[async_trait]
pub trait BinaryHardeningScanner: Send + Sync {
    async fn scan(&self, path: &Path) -> Result<HardeningProfile, ScannerError>;
}

/// Checks a kernel configuration file against hardening recommendations
#[async_trait]
pub trait KernelHardeningScanner: Send + Sync {
    async fn check_config(&self, path: &Path) -> Result<Vec<KernelHardeningFinding>, ScannerError>;
}

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("{tool} not found: {reason}")]
    NotInstalled { tool: String, reason: String },

    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {status:?} on {path}: {stderr}")]
    NonZeroExit {
        tool: String,
        path: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Malformed {tool} output: {reason}")]
    MalformedOutput { tool: String, reason: String },

    #[error("{tool} timed out on {path}")]
    Timeout { tool: String, path: String },
}

impl ScannerError {
    pub fn malformed(tool: &str, reason: impl Into<String>) -> Self {
        ScannerError::MalformedOutput {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}
