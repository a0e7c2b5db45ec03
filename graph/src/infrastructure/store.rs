// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Graph store contract
//! Defines what the capture pipeline needs from a graph database

use async_trait::async_trait;

use crate::domain::node::GraphNode;
use crate::domain::subgraph::{OwnershipViolation, RootMode, Subgraph};

#[derive(Debug, thiserror::Error)]
pub enum GraphStoreError {
    #[error("Graph store connection failed: {0}")]
    Connection(String),

    #[error("Graph query failed: {0}")]
    Query(String),

    #[error("Subgraph violates ownership: {0}")]
    Ownership(#[from] OwnershipViolation),

    #[error("OS node not found: {0}")]
    OsNotFound(String),

    #[error("OS node already exists: {0}")]
    OsExists(String),

    #[error("Stored OS {os} has id {stored}, subgraph expects {expected}")]
    RootMismatch {
        os: String,
        stored: String,
        expected: String,
    },

    #[error("Subgraph write for {os} created {created} of {expected} relationships")]
    IncompleteWrite {
        os: String,
        expected: usize,
        created: usize,
    },
}

/// Check a subgraph's root mode against the OS node currently stored under its name
pub fn check_root(subgraph: &Subgraph, existing: Option<&GraphNode>) -> Result<(), GraphStoreError> {
    match (subgraph.root_mode, existing) {
        (RootMode::Create, Some(_)) => Err(GraphStoreError::OsExists(subgraph.root_name.clone())),
        (RootMode::Existing, None) => Err(GraphStoreError::OsNotFound(subgraph.root_name.clone())),
        (RootMode::Existing, Some(node)) if node.id != subgraph.root => Err(GraphStoreError::RootMismatch {
            os: subgraph.root_name.clone(),
            stored: node.id.to_string(),
            expected: subgraph.root.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Storage backend for captured OS subgraphs
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Match the OS node with the given unique name
    async fn find_os(&self, name: &str) -> Result<Option<GraphNode>, GraphStoreError>;

    /// Write a whole subgraph atomically: either every node and edge is
    /// stored or nothing is
    async fn insert_subgraph(&self, subgraph: &Subgraph) -> Result<(), GraphStoreError>;

    /// Delete the OS node and every node transitively owned by it.
    /// Returns the number of deleted nodes, 0 when the OS does not exist
    async fn delete_owned_subgraph(&self, name: &str) -> Result<usize, GraphStoreError>;

    /// Unconditionally wipe every node and edge
    async fn delete_all(&self) -> Result<(), GraphStoreError>;

    /// Total number of stored nodes
    async fn node_count(&self) -> Result<usize, GraphStoreError>;
}
