// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Run guard
//!
//! Decides, before the VM is touched, whether a capture creates, skips,
//! replaces or appends to the stored OS. The check and the later write are
//! not atomic: two concurrent captures of the same domain can both pass.

use oswatcher_graph::{GraphStore, GraphStoreError, NodeId};
use std::sync::Arc;
use tracing::info;

use crate::domain::run_guard::{GuardAction, GuardPolicy};

/// Outcome of the guard, after any replacement delete ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Create,
    Skip,
    Replaced { removed: usize },
    Append { root: NodeId },
}

impl GuardDecision {
    pub fn proceeds(&self) -> bool {
        !matches!(self, GuardDecision::Skip)
    }
}

pub struct RunGuard {
    store: Arc<dyn GraphStore>,
    policy: GuardPolicy,
}

impl RunGuard {
    pub fn new(store: Arc<dyn GraphStore>, policy: GuardPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn check(&self, vm_name: &str) -> Result<GuardDecision, GraphStoreError> {
        let existing = self.store.find_os(vm_name).await?.map(|node| node.id);

        match self.policy.decide(existing) {
            GuardAction::Create => Ok(GuardDecision::Create),
            GuardAction::Skip => {
                info!("OS {} already captured, skipping (set replace or append to re-capture)", vm_name);
                Ok(GuardDecision::Skip)
            }
            GuardAction::Replace => {
                let removed = self.store.delete_owned_subgraph(vm_name).await?;
                info!("Replacing OS {}: removed {} nodes", vm_name, removed);
                Ok(GuardDecision::Replaced { removed })
            }
            GuardAction::Append(root) => {
                info!("Appending to existing OS {} ({})", vm_name, root);
                Ok(GuardDecision::Append { root })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oswatcher_graph::{InMemoryGraphStore, OperatingSystem, RootMode, Subgraph};

    async fn store_with(name: &str) -> (InMemoryGraphStore, NodeId) {
        let store = InMemoryGraphStore::new();
        let os = OperatingSystem::new(name, "2020-04-23");
        store
            .insert_subgraph(&Subgraph::from_os(&os, RootMode::Create))
            .await
            .unwrap();
        (store, os.id)
    }

    #[tokio::test]
    async fn test_absent_os_creates() {
        let guard = RunGuard::new(Arc::new(InMemoryGraphStore::new()), GuardPolicy::default());
        assert_eq!(guard.check("fresh").await.unwrap(), GuardDecision::Create);
    }

    #[tokio::test]
    async fn test_existing_os_skipped_by_default() {
        let (store, _) = store_with("ubuntu").await;
        let guard = RunGuard::new(Arc::new(store.clone()), GuardPolicy::default());
        assert_eq!(guard.check("ubuntu").await.unwrap(), GuardDecision::Skip);
        assert_eq!(store.node_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_deletes_before_run() {
        let (store, _) = store_with("ubuntu").await;
        let policy = GuardPolicy { replace: Some(true), append: false };
        let guard = RunGuard::new(Arc::new(store.clone()), policy);
        assert_eq!(
            guard.check("ubuntu").await.unwrap(),
            GuardDecision::Replaced { removed: 1 }
        );
        assert_eq!(store.node_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_keeps_root() {
        let (store, root) = store_with("ubuntu").await;
        let policy = GuardPolicy { replace: None, append: true };
        let guard = RunGuard::new(Arc::new(store), policy);
        assert_eq!(guard.check("ubuntu").await.unwrap(), GuardDecision::Append { root });
    }
}
