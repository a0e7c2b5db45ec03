// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory graph store, used for dry runs and tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::node::{GraphEdge, GraphNode, NodeId, NodeLabel, Relation};
use crate::domain::subgraph::Subgraph;
use crate::infrastructure::store::{check_root, GraphStore, GraphStoreError};

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, GraphNode>,
    edges: Vec<GraphEdge>,
}

/// In-memory implementation of [`GraphStore`]
#[derive(Clone, Default)]
pub struct InMemoryGraphStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored edges, for inspection in tests
    pub async fn edges(&self) -> Vec<GraphEdge> {
        self.inner.read().await.edges.clone()
    }

    /// All stored nodes with the given label
    pub async fn nodes_with_label(&self, label: NodeLabel) -> Vec<GraphNode> {
        self.inner
            .read()
            .await
            .nodes
            .values()
            .filter(|n| n.label == label)
            .cloned()
            .collect()
    }

    pub async fn contains(&self, id: NodeId) -> bool {
        self.inner.read().await.nodes.contains_key(&id)
    }
}

fn find_os_in(inner: &Inner, name: &str) -> Option<GraphNode> {
    inner
        .nodes
        .values()
        .find(|n| {
            n.label == NodeLabel::OperatingSystem
                && n.get_property("name").and_then(|v| v.as_str()) == Some(name)
        })
        .cloned()
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn find_os(&self, name: &str) -> Result<Option<GraphNode>, GraphStoreError> {
        let inner = self.inner.read().await;
        Ok(find_os_in(&inner, name))
    }

    async fn insert_subgraph(&self, subgraph: &Subgraph) -> Result<(), GraphStoreError> {
        subgraph.validate_ownership()?;

        // Single write lock: all checks happen before the first mutation
        let mut inner = self.inner.write().await;
        check_root(subgraph, find_os_in(&inner, &subgraph.root_name).as_ref())?;
        if let Some(node) = subgraph
            .nodes_to_create()
            .find(|n| inner.nodes.contains_key(&n.id))
        {
            return Err(GraphStoreError::Query(format!("node {} already stored", node.id)));
        }

        for node in subgraph.nodes_to_create() {
            inner.nodes.insert(node.id, node.clone());
        }
        inner.edges.extend(subgraph.edges.iter().copied());
        Ok(())
    }

    async fn delete_owned_subgraph(&self, name: &str) -> Result<usize, GraphStoreError> {
        let mut inner = self.inner.write().await;
        let Some(os) = find_os_in(&inner, name) else {
            return Ok(0);
        };

        // Walk OWNED_BY edges inward from the OS node
        let mut doomed = HashSet::from([os.id]);
        let mut frontier = vec![os.id];
        while let Some(owner) = frontier.pop() {
            for edge in inner.edges.iter() {
                if edge.relation == Relation::OwnedBy && edge.to == owner && doomed.insert(edge.from) {
                    frontier.push(edge.from);
                }
            }
        }

        inner.nodes.retain(|id, _| !doomed.contains(id));
        inner
            .edges
            .retain(|e| !doomed.contains(&e.from) && !doomed.contains(&e.to));
        Ok(doomed.len())
    }

    async fn delete_all(&self) -> Result<(), GraphStoreError> {
        let mut inner = self.inner.write().await;
        inner.nodes.clear();
        inner.edges.clear();
        Ok(())
    }

    async fn node_count(&self) -> Result<usize, GraphStoreError> {
        Ok(self.inner.read().await.nodes.len())
    }
}
