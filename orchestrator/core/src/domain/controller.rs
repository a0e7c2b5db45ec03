// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use thiserror::Error;

/// Lifecycle control of the virtual machine under capture
#[async_trait]
pub trait DomainController: Send + Sync {
    /// Name of the source domain being captured
    fn domain_name(&self) -> &str;

    /// Name of the domain actually running, when it differs from the source
    /// (a transient clone)
    fn running_domain(&self) -> Option<String> {
        None
    }

    async fn power_on(&self) -> Result<(), DomainError>;

    async fn power_off(&self) -> Result<(), DomainError>;

    /// Domain configuration document (libvirt domain XML)
    async fn configuration_description(&self) -> Result<String, DomainError>;
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Domain not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {status:?}: {stderr}")]
    Command {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Invalid domain XML: {0}")]
    Xml(String),

    #[error("Domain {0} has no file-backed disk")]
    NoDisk(String),

    #[error("Domain storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Domain {0} is not running")]
    NotRunning(String),

    #[error("Domain {0} is already running")]
    AlreadyRunning(String),
}
