// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OS capture graph
//!
//! Typed model of "this OS, as observed at this point in time" and the stores
//! that persist it.
//!
//! # Architecture
//!
//! - **Layer:** Graph bounded context
//! - **Purpose:** Owns the node/edge vocabulary, the owned-by invariant and
//!   the `GraphStore` contract used by the capture pipeline

pub mod domain;
pub mod infrastructure;

pub use domain::*;
pub use infrastructure::*;
