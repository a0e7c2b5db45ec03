// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::domain::collector::{Collector, CollectorError, EventSink, FailurePolicy};
use crate::domain::controller::DomainController;
use crate::domain::events::{Envelope, EventKind};
use crate::domain::extractor::{ExtractError, ExtractionContext, Extractor};

const INTERESTS: [EventKind; 1] = [EventKind::DesktopReady];

/// Runs the extractor once the guest desktop is ready and publishes each
/// extracted fact individually
pub struct IntrospectionCollector {
    extractor: Arc<dyn Extractor>,
    controller: Arc<dyn DomainController>,
    policy: FailurePolicy,
}

impl IntrospectionCollector {
    pub fn new(extractor: Arc<dyn Extractor>, controller: Arc<dyn DomainController>) -> Self {
        Self {
            extractor,
            controller,
            policy: FailurePolicy::Abort,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Collector for IntrospectionCollector {
    fn name(&self) -> &str {
        "introspection"
    }

    fn interests(&self) -> &[EventKind] {
        &INTERESTS
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    async fn on_event(&mut self, envelope: &Envelope, sink: &mut EventSink) -> Result<(), CollectorError> {
        let ctx = ExtractionContext {
            run_id: envelope.run_id,
            domain: self
                .controller
                .running_domain()
                .unwrap_or_else(|| self.controller.domain_name().to_string()),
        };
        let facts = self.extractor.extract(&ctx).await?;

        // Validate the whole batch before emitting anything
        if let Some(lifecycle) = facts.iter().map(|f| f.kind()).find(EventKind::is_lifecycle) {
            return Err(ExtractError::LifecycleEvent(lifecycle).into());
        }

        info!("Extractor {} produced {} facts", self.extractor.name(), facts.len());
        for fact in facts {
            sink.emit(fact);
        }
        Ok(())
    }
}
