// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod memory_store;
pub mod neo4j_store;
pub mod store;

pub use memory_store::InMemoryGraphStore;
pub use neo4j_store::Neo4jGraphStore;
pub use store::{GraphStore, GraphStoreError};
