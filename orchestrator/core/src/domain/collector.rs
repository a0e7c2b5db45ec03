// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Collector contract
//!
//! A collector subscribes to a fixed set of [`EventKind`]s and reacts to each
//! delivered [`Envelope`]. It never calls another collector; follow-up facts
//! go into the [`EventSink`] and are published by the bus.

use async_trait::async_trait;
use oswatcher_graph::{AttachError, GraphStoreError, OwnershipViolation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::controller::DomainError;
use crate::domain::events::{CaptureEvent, Envelope, EventKind, RunId};
use crate::domain::extractor::ExtractError;
use crate::domain::guest_metadata::MetadataError;
use crate::domain::scanner::ScannerError;

/// What the bus does when a collector's handler fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Abort the capture run
    #[default]
    Abort,
    /// Detach the collector for the rest of the run and keep going
    Isolate,
}

/// Follow-up events emitted by a handler
#[derive(Debug, Default)]
pub struct EventSink {
    events: Vec<CaptureEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: CaptureEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<CaptureEvent> {
        self.events
    }
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Guest metadata: {0}")]
    GuestMetadata(#[from] MetadataError),

    #[error("Domain: {0}")]
    Domain(#[from] DomainError),

    #[error("Scanner: {0}")]
    Scanner(#[from] ScannerError),

    #[error("Extractor: {0}")]
    Extract(#[from] ExtractError),

    #[error("Graph store: {0}")]
    Store(#[from] GraphStoreError),

    #[error("Ownership: {0}")]
    Ownership(#[from] OwnershipViolation),

    #[error("{0}")]
    Attach(#[from] AttachError),

    #[error("{event} received before protocol_start")]
    BeforeStart { event: EventKind },

    #[error("{event} received after the OS was written")]
    AfterEnd { event: EventKind },

    #[error("Event from run {actual} delivered to run {expected}")]
    ForeignRun { expected: RunId, actual: RunId },
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Event kinds this collector is subscribed to
    fn interests(&self) -> &[EventKind];

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Abort
    }

    async fn on_event(&mut self, envelope: &Envelope, sink: &mut EventSink) -> Result<(), CollectorError>;

    /// Forget every fact received from `collector`; called when the bus
    /// isolates that collector so none of its partial output is written
    fn discard_contributions(&mut self, _collector: &str) {}
}
