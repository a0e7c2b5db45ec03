// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capture domain
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Events, collector contract, external collaborator traits,
//!   guest metadata and scanner output normalization, configuration manifest

pub mod capture_config;
pub mod collector;
pub mod controller;
pub mod events;
pub mod extractor;
pub mod guest_metadata;
pub mod hardening;
pub mod protocol;
pub mod run_guard;
pub mod scanner;

pub use capture_config::{CaptureConfigManifest, ConfigError};
pub use collector::{Collector, CollectorError, EventSink, FailurePolicy};
pub use controller::{DomainController, DomainError};
pub use events::{CaptureEvent, Envelope, EventKind, RunId};
pub use extractor::{ExtractError, ExtractionContext, Extractor};
pub use guest_metadata::{GuestMetadata, MetadataError};
pub use protocol::{IllegalTransition, ProtocolState};
pub use run_guard::{GuardAction, GuardPolicy};
pub use scanner::{BinaryHardeningScanner, KernelHardeningScanner, ScannerError};
