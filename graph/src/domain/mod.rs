// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Graph domain
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entities of a capture run and their flattening into nodes
//!   and edges

pub mod node;
pub mod hardening;
pub mod os;
pub mod subgraph;

pub use node::*;
pub use hardening::*;
pub use os::*;
pub use subgraph::*;
