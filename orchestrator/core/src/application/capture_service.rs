// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capture Service
//!
//! Entry point of one capture run: optional store wipe, run guard, event bus
//! wiring and the capture protocol.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates a single VM capture end to end

use oswatcher_graph::{GraphStore, GraphStoreError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::capture_protocol::{CaptureProtocol, ProtocolError};
use crate::application::os_assembly::OsAssemblyCollector;
use crate::application::run_guard::{GuardDecision, RunGuard};
use crate::domain::collector::Collector;
use crate::domain::controller::DomainController;
use crate::domain::events::RunId;
use crate::domain::run_guard::GuardPolicy;
use crate::infrastructure::event_bus::{EventBus, IsolatedFailure};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid capture settings: {0}")]
    InvalidSettings(String),

    #[error("Graph store error: {0}")]
    Store(#[from] GraphStoreError),

    #[error("Capture protocol failed: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug)]
pub enum CaptureOutcome {
    Captured {
        run_id: RunId,
        os_name: String,
        decision: GuardDecision,
        events_published: u64,
        isolated: Vec<IsolatedFailure>,
        duration: Duration,
    },
    Skipped {
        os_name: String,
    },
}

pub struct CaptureService {
    controller: Arc<dyn DomainController>,
    store: Arc<dyn GraphStore>,
    policy: GuardPolicy,
    desktop_ready_delay: Duration,
    wipe_store: bool,
}

impl CaptureService {
    pub fn new(
        controller: Arc<dyn DomainController>,
        store: Arc<dyn GraphStore>,
        desktop_ready_delay: Duration,
    ) -> Self {
        Self {
            controller,
            store,
            policy: GuardPolicy::default(),
            desktop_ready_delay,
            wipe_store: false,
        }
    }

    pub fn with_guard_policy(mut self, policy: GuardPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Remove every node from the store before the guard runs
    pub fn wipe_store_first(mut self, wipe: bool) -> Self {
        self.wipe_store = wipe;
        self
    }

    /// Run one capture. The OS assembler is registered ahead of `collectors`
    /// so it observes `protocol_start` before any fact producer.
    pub async fn capture(&self, collectors: Vec<Box<dyn Collector>>) -> Result<CaptureOutcome, CaptureError> {
        self.policy.validate().map_err(CaptureError::InvalidSettings)?;
        let os_name = self.controller.domain_name().to_string();

        if self.wipe_store {
            warn!("Wiping graph store before capturing {}", os_name);
            self.store.delete_all().await?;
        }

        let decision = RunGuard::new(self.store.clone(), self.policy).check(&os_name).await?;
        if !decision.proceeds() {
            metrics::counter!("oswatcher_captures_total", "outcome" => "skipped").increment(1);
            return Ok(CaptureOutcome::Skipped { os_name });
        }

        let run_id = RunId::new();
        let started = Instant::now();
        info!("Starting capture {} of {}", run_id.short(), os_name);

        let mut assembler = OsAssemblyCollector::new(os_name.clone(), self.controller.clone(), self.store.clone());
        if let GuardDecision::Append { root } = decision {
            assembler = assembler.appending_to(root);
        }

        let mut bus = EventBus::new(run_id);
        bus.register(Box::new(assembler));
        for collector in collectors {
            bus.register(collector);
        }

        let mut protocol = CaptureProtocol::new(self.controller.clone(), self.desktop_ready_delay);
        if let Err(e) = protocol.run(&mut bus).await {
            metrics::counter!("oswatcher_captures_total", "outcome" => "failed").increment(1);
            return Err(e.into());
        }

        let duration = started.elapsed();
        metrics::counter!("oswatcher_captures_total", "outcome" => "captured").increment(1);
        metrics::histogram!("oswatcher_capture_duration_seconds").record(duration.as_secs_f64());

        let events_published = bus.published();
        let isolated = bus.into_isolated_failures();
        for failure in &isolated {
            warn!(
                "Collector {} was isolated after failing on {}: {}",
                failure.collector, failure.event, failure.error
            );
        }
        info!(
            "Capture {} of {} finished in {} ({} events)",
            run_id.short(),
            os_name,
            humantime::format_duration(Duration::from_secs(duration.as_secs())),
            events_published
        );

        Ok(CaptureOutcome::Captured {
            run_id,
            os_name,
            decision,
            events_published,
            isolated,
            duration,
        })
    }
}
