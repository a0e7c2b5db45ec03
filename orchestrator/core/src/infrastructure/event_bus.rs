// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Synchronous Pub/Sub for Capture Events
//
// One bus is built per capture run. Delivery is sequential on the
// publishing task: every subscribed collector is awaited in registration
// order. Follow-up events a collector emits are published depth-first
// before the next collector sees the current event. Each follow-up is
// stamped with the name of the collector that emitted it; when a collector
// is isolated the remaining collectors are told to discard what it emitted.

use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::domain::collector::{Collector, CollectorError, EventSink, FailurePolicy};
use crate::domain::events::{CaptureEvent, Envelope, EventKind, RunId};

/// Maximum nesting of follow-up publications
pub const MAX_CASCADE_DEPTH: usize = 16;

/// Errors that abort delivery of an event
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Collector {collector} failed on {event}: {source}")]
    Collector {
        collector: String,
        event: EventKind,
        #[source]
        source: CollectorError,
    },

    #[error("Cascade depth {depth} exceeded while publishing {event}")]
    CascadeTooDeep { event: EventKind, depth: usize },
}

/// A collector failure absorbed under [`FailurePolicy::Isolate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedFailure {
    pub collector: String,
    pub event: EventKind,
    pub error: String,
}

struct Registration {
    collector: Box<dyn Collector>,
    detached: bool,
}

/// Event bus for one capture run
pub struct EventBus {
    run_id: RunId,
    sequence: u64,
    registrations: Vec<Registration>,
    subscriptions: HashMap<EventKind, Vec<usize>>,
    isolated: Vec<IsolatedFailure>,
}

impl EventBus {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            sequence: 0,
            registrations: Vec::new(),
            subscriptions: HashMap::new(),
            isolated: Vec::new(),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Subscribe a collector to each of its interests
    pub fn register(&mut self, collector: Box<dyn Collector>) {
        let index = self.registrations.len();
        for kind in collector.interests() {
            let subscribers = self.subscriptions.entry(*kind).or_default();
            if !subscribers.contains(&index) {
                subscribers.push(index);
            }
        }
        debug!(
            "Registered collector {} for {:?}",
            collector.name(),
            collector.interests()
        );
        self.registrations.push(Registration {
            collector,
            detached: false,
        });
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions.get(&kind).map_or(0, Vec::len)
    }

    /// Number of events published so far, follow-ups included
    pub fn published(&self) -> u64 {
        self.sequence
    }

    pub fn isolated_failures(&self) -> &[IsolatedFailure] {
        &self.isolated
    }

    pub fn into_isolated_failures(self) -> Vec<IsolatedFailure> {
        self.isolated
    }

    /// Publish an event and every follow-up it causes
    pub async fn publish(&mut self, event: CaptureEvent) -> Result<(), BusError> {
        self.dispatch(event, None, 0).await
    }

    fn dispatch(
        &mut self,
        event: CaptureEvent,
        source: Option<String>,
        depth: usize,
    ) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            let kind = event.kind();
            if depth > MAX_CASCADE_DEPTH {
                return Err(BusError::CascadeTooDeep { event: kind, depth });
            }

            self.sequence += 1;
            let envelope = Envelope::new(self.run_id, self.sequence, event).with_source(source);
            metrics::counter!("oswatcher_events_published_total", "kind" => kind.as_str()).increment(1);

            let subscribers = self.subscriptions.get(&kind).cloned().unwrap_or_default();
            if subscribers.is_empty() {
                debug!("No subscribers listening to {}", kind);
            }

            for index in subscribers {
                let registration = &mut self.registrations[index];
                if registration.detached {
                    continue;
                }

                let mut sink = EventSink::new();
                if let Err(source) = registration.collector.on_event(&envelope, &mut sink).await {
                    let collector = registration.collector.name().to_string();
                    match registration.collector.failure_policy() {
                        FailurePolicy::Abort => {
                            return Err(BusError::Collector {
                                collector,
                                event: kind,
                                source,
                            })
                        }
                        FailurePolicy::Isolate => {
                            warn!(
                                "Isolating collector {} after failure on {}: {}",
                                collector, kind, source
                            );
                            registration.detached = true;
                            for other in self.registrations.iter_mut().filter(|r| !r.detached) {
                                other.collector.discard_contributions(&collector);
                            }
                            metrics::counter!("oswatcher_collectors_isolated_total").increment(1);
                            self.isolated.push(IsolatedFailure {
                                collector,
                                event: kind,
                                error: source.to_string(),
                            });
                            continue;
                        }
                    }
                }

                let emitter = registration.collector.name().to_string();
                for follow_up in sink.into_events() {
                    self.dispatch(follow_up, Some(emitter.clone()), depth + 1).await?;
                }
            }
            Ok(())
        })
    }
}
