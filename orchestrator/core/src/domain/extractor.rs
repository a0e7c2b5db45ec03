// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::{CaptureEvent, EventKind, RunId};

/// What an extractor needs to know about the running capture
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub run_id: RunId,
    /// Name of the running (possibly cloned) domain
    pub domain: String,
}

/// Pulls filesystem, syscall and process facts out of a running guest
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, ctx: &ExtractionContext) -> Result<Vec<CaptureEvent>, ExtractError>;
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to spawn extractor {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extractor {command} exited with status {status:?}: {stderr}")]
    NonZeroExit {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Extractor {command} timed out")]
    Timeout { command: String },

    #[error("Invalid fact on line {line}: {reason}")]
    InvalidFact { line: usize, reason: String },

    #[error("Extractors may not publish lifecycle event {0}")]
    LifecycleEvent(EventKind),

    #[error("Fact on line {line} belongs to run {actual}, expected {expected}")]
    ForeignRun {
        line: usize,
        expected: RunId,
        actual: RunId,
    },

    #[error("Extractor command is empty")]
    EmptyCommand,
}
