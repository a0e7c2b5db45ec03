// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OS Watcher core
//!
//! Captures a virtual machine's operating system into the graph store: boots
//! a disposable clone, lets collectors gather facts over the event bus and
//! writes one owned subgraph per run.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Capture pipeline (domain, use cases, adapters)

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
