// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod capture_protocol;
pub mod capture_service;
pub mod hardening_collector;
pub mod introspection;
pub mod os_assembly;
pub mod run_guard;
pub mod store_factory;

// Re-export use cases for convenience
pub use capture_protocol::{CaptureProtocol, ProtocolError};
pub use capture_service::{CaptureError, CaptureOutcome, CaptureService};
pub use hardening_collector::HardeningCollector;
pub use introspection::IntrospectionCollector;
pub use os_assembly::OsAssemblyCollector;
pub use run_guard::{GuardDecision, RunGuard};
pub use store_factory::create_graph_store;
