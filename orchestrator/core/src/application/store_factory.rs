// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Graph Store Factory - Application Layer
//!
//! Creates the concrete `GraphStore` for the configured backend so the
//! domain and the capture service only ever see the trait.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Backend selection for the capture graph

use oswatcher_graph::{GraphStore, GraphStoreError, InMemoryGraphStore, Neo4jGraphStore};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::capture_config::{GraphBackend, GraphConfig};

/// Password used when none is configured, matching a stock lab Neo4j setup
pub const DEFAULT_GRAPH_PASSWORD: &str = "admin";

/// Creates a GraphStore implementation based on the configured backend
pub async fn create_graph_store(config: &GraphConfig) -> Result<Arc<dyn GraphStore>, GraphStoreError> {
    match config.backend {
        GraphBackend::Memory => {
            warn!("Using the in-memory graph store: captured data is discarded on exit");
            Ok(Arc::new(InMemoryGraphStore::new()))
        }
        GraphBackend::Neo4j => {
            let password = config.password.as_deref().unwrap_or_else(|| {
                warn!("No graph password configured (set OSWATCHER_GRAPH_PASSWORD), using the default");
                DEFAULT_GRAPH_PASSWORD
            });
            info!("Connecting to Neo4j at {} as {}", config.uri, config.user);
            let store = Neo4jGraphStore::connect(&config.uri, &config.user, password).await?;
            store.ensure_indexes().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend() {
        let config = GraphConfig {
            backend: GraphBackend::Memory,
            ..GraphConfig::default()
        };
        let store = create_graph_store(&config).await.unwrap();
        assert_eq!(store.node_count().await.unwrap(), 0);
    }
}
