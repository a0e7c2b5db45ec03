// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! OS assembly collector
//!
//! Holds the single in-memory OS node of a run. Facts are attached as they
//! arrive and the whole owned subgraph is written once, atomically, at
//! `protocol_end`.
//!
//! Facts are remembered per emitting collector so that a collector isolated
//! mid-run leaves nothing of its output behind in the written subgraph.

use async_trait::async_trait;
use oswatcher_graph::{
    GraphStore, HardeningProfile, InodeNumber, NodeId, OperatingSystem, RootMode, Subgraph,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::collector::{Collector, CollectorError, EventSink};
use crate::domain::controller::DomainController;
use crate::domain::events::{CaptureEvent, Envelope, EventKind, RunId};
use crate::domain::guest_metadata::GuestMetadata;

const INTERESTS: [EventKind; 7] = [
    EventKind::ProtocolStart,
    EventKind::FilesystemCaptured,
    EventKind::SyscallsCaptured,
    EventKind::ProcessesCaptured,
    EventKind::SecurityProfile,
    EventKind::KernelHardening,
    EventKind::ProtocolEnd,
];

/// A fact attached to the OS on behalf of one collector
#[derive(Debug, Clone, PartialEq)]
enum Contribution {
    RootFilesystem,
    SyscallTables(Vec<NodeId>),
    Processes(Vec<NodeId>),
    KernelHardening,
}

#[derive(Debug)]
enum Phase {
    Waiting,
    Assembling { run_id: RunId, os: OperatingSystem },
    Written,
}

pub struct OsAssemblyCollector {
    vm_name: String,
    existing_root: Option<NodeId>,
    controller: Arc<dyn DomainController>,
    store: Arc<dyn GraphStore>,
    phase: Phase,
    staged_profiles: HashMap<InodeNumber, (Option<String>, HardeningProfile)>,
    contributions: HashMap<String, Vec<Contribution>>,
}

impl OsAssemblyCollector {
    pub fn new(
        vm_name: impl Into<String>,
        controller: Arc<dyn DomainController>,
        store: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            vm_name: vm_name.into(),
            existing_root: None,
            controller,
            store,
            phase: Phase::Waiting,
            staged_profiles: HashMap::new(),
            contributions: HashMap::new(),
        }
    }

    /// Attach this run's facts to an OS node that is already stored
    pub fn appending_to(mut self, root: NodeId) -> Self {
        self.existing_root = Some(root);
        self
    }

    async fn start(&mut self, run_id: RunId) -> Result<(), CollectorError> {
        let xml = self.controller.configuration_description().await?;
        let metadata = GuestMetadata::from_domain_xml(&xml)?;
        debug!("Guest metadata for {}: {:?}", self.vm_name, metadata);

        let mut os = OperatingSystem::new(self.vm_name.clone(), metadata.release_date);
        if let Some(root) = self.existing_root {
            os = os.with_existing_id(root);
        }
        info!("Assembling OS {} (release {})", os.name, os.release_date);
        self.phase = Phase::Assembling { run_id, os };
        Ok(())
    }

    fn assembling(&mut self, envelope: &Envelope) -> Result<&mut OperatingSystem, CollectorError> {
        match &mut self.phase {
            Phase::Assembling { run_id, os } => {
                if *run_id != envelope.run_id {
                    return Err(CollectorError::ForeignRun {
                        expected: *run_id,
                        actual: envelope.run_id,
                    });
                }
                Ok(os)
            }
            Phase::Waiting => Err(CollectorError::BeforeStart { event: envelope.kind() }),
            Phase::Written => Err(CollectorError::AfterEnd { event: envelope.kind() }),
        }
    }

    fn record(&mut self, envelope: &Envelope, contribution: Contribution) {
        if let Some(source) = &envelope.source {
            self.contributions.entry(source.clone()).or_default().push(contribution);
        }
    }

    async fn write(&mut self, envelope: &Envelope) -> Result<(), CollectorError> {
        self.assembling(envelope)?;
        let mut os = match std::mem::replace(&mut self.phase, Phase::Written) {
            Phase::Assembling { os, .. } => os,
            _ => return Err(CollectorError::AfterEnd { event: envelope.kind() }),
        };

        let profiles = std::mem::take(&mut self.staged_profiles)
            .into_iter()
            .map(|(inode, (_, profile))| (inode, profile))
            .collect();
        for (inode, _) in os.resolve_security_profiles(profiles) {
            warn!(
                "Dropping hardening profile for inode {}: not part of the captured filesystem",
                inode
            );
        }

        let mode = if self.existing_root.is_some() {
            RootMode::Existing
        } else {
            RootMode::Create
        };
        let subgraph = Subgraph::from_os(&os, mode);
        subgraph.validate_ownership()?;

        let started = Instant::now();
        self.store.insert_subgraph(&subgraph).await?;
        metrics::histogram!("oswatcher_graph_write_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("oswatcher_nodes_written_total").increment(subgraph.nodes_to_create().count() as u64);

        info!(
            "Inserted OS {} with {} nodes and {} edges",
            os.name,
            subgraph.nodes_to_create().count(),
            subgraph.edges.len()
        );
        Ok(())
    }
}

#[async_trait]
impl Collector for OsAssemblyCollector {
    fn name(&self) -> &str {
        "os-assembly"
    }

    fn interests(&self) -> &[EventKind] {
        &INTERESTS
    }

    async fn on_event(&mut self, envelope: &Envelope, _sink: &mut EventSink) -> Result<(), CollectorError> {
        match &envelope.event {
            CaptureEvent::ProtocolStart => self.start(envelope.run_id).await,
            CaptureEvent::FilesystemCaptured { root } => {
                info!("Adding root filesystem ({} inodes) to OS node", root.inodes.len());
                self.assembling(envelope)?.attach_root_filesystem(root.clone())?;
                self.record(envelope, Contribution::RootFilesystem);
                Ok(())
            }
            CaptureEvent::SyscallsCaptured { tables } => {
                info!("Adding {} syscall tables to OS node", tables.len());
                self.assembling(envelope)?.attach_syscall_tables(tables.iter().cloned());
                self.record(envelope, Contribution::SyscallTables(tables.iter().map(|t| t.id).collect()));
                Ok(())
            }
            CaptureEvent::ProcessesCaptured { processes } => {
                info!("Adding {} processes to OS node", processes.len());
                self.assembling(envelope)?.attach_processes(processes.iter().cloned());
                self.record(envelope, Contribution::Processes(processes.iter().map(|p| p.id).collect()));
                Ok(())
            }
            CaptureEvent::KernelHardening { report } => {
                info!(
                    "Adding kernel hardening report ({} passed, {} failed) to OS node",
                    report.passed(),
                    report.failed()
                );
                self.assembling(envelope)?.attach_kernel_hardening(report.clone())?;
                self.record(envelope, Contribution::KernelHardening);
                Ok(())
            }
            CaptureEvent::SecurityProfile { inode, profile } => {
                self.assembling(envelope)?;
                let staged = (envelope.source.clone(), profile.clone());
                if self.staged_profiles.insert(*inode, staged).is_some() {
                    warn!("Replacing staged hardening profile for inode {}", inode);
                }
                Ok(())
            }
            CaptureEvent::ProtocolEnd => self.write(envelope).await,
            _ => Ok(()),
        }
    }

    fn discard_contributions(&mut self, collector: &str) {
        let before = self.staged_profiles.len();
        self.staged_profiles
            .retain(|_, (source, _)| source.as_deref() != Some(collector));
        let profiles = before - self.staged_profiles.len();

        let contributions = self.contributions.remove(collector).unwrap_or_default();
        let Phase::Assembling { os, .. } = &mut self.phase else {
            return;
        };
        for contribution in &contributions {
            match contribution {
                Contribution::RootFilesystem => {
                    os.detach_root_filesystem();
                }
                Contribution::SyscallTables(ids) => {
                    os.detach_syscall_tables(ids);
                }
                Contribution::Processes(ids) => {
                    os.detach_processes(ids);
                }
                Contribution::KernelHardening => {
                    os.detach_kernel_hardening();
                }
            }
        }
        warn!(
            "Discarded {} hardening profiles and {} facts from isolated collector {}",
            profiles,
            contributions.len(),
            collector
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::controller::DomainError;
    use oswatcher_graph::{
        AttachError, FilesystemRoot, InMemoryGraphStore, Inode, InodeKind, KernelHardeningReport, NodeLabel,
        PieMode,
    };

    struct StaticDomain(String);

    #[async_trait]
    impl DomainController for StaticDomain {
        fn domain_name(&self) -> &str {
            "vm"
        }
        async fn power_on(&self) -> Result<(), DomainError> {
            Ok(())
        }
        async fn power_off(&self) -> Result<(), DomainError> {
            Ok(())
        }
        async fn configuration_description(&self) -> Result<String, DomainError> {
            Ok(self.0.clone())
        }
    }

    fn collector(xml: &str, store: &InMemoryGraphStore) -> OsAssemblyCollector {
        OsAssemblyCollector::new(
            "osw-debian-10",
            Arc::new(StaticDomain(xml.to_string())),
            Arc::new(store.clone()),
        )
    }

    const XML: &str = r#"<domain><name>osw-debian-10</name><description>{"release_date": "2019-07-06"}</description></domain>"#;

    fn profile() -> HardeningProfile {
        HardeningProfile {
            id: NodeId::new(),
            relro: true,
            canary: false,
            nx: true,
            pie: PieMode::Yes,
            rpath: false,
            runpath: false,
            symtables: true,
            fortify_source: false,
            fortified: 0,
            fortifyable: 3,
        }
    }

    fn inode(number: InodeNumber, path: &str) -> Inode {
        Inode {
            id: NodeId::new(),
            number,
            parent: None,
            path: path.into(),
            kind: InodeKind::File,
            mime_type: Some("application/x-pie-executable".into()),
            size: 1,
            security_profile: None,
        }
    }

    fn envelope(run_id: RunId, event: CaptureEvent) -> Envelope {
        Envelope::new(run_id, 1, event)
    }

    async fn deliver(c: &mut OsAssemblyCollector, run_id: RunId, event: CaptureEvent) -> Result<(), CollectorError> {
        c.on_event(&envelope(run_id, event), &mut EventSink::new()).await
    }

    #[tokio::test]
    async fn test_profiles_resolved_and_orphans_dropped() {
        let store = InMemoryGraphStore::new();
        let mut c = collector(XML, &store);
        let run = RunId::new();

        deliver(&mut c, run, CaptureEvent::ProtocolStart).await.unwrap();
        deliver(&mut c, run, CaptureEvent::SecurityProfile { inode: 12, profile: profile() }).await.unwrap();
        deliver(&mut c, run, CaptureEvent::SecurityProfile { inode: 99, profile: profile() }).await.unwrap();
        deliver(&mut c, run, CaptureEvent::FilesystemCaptured { root: FilesystemRoot::new(vec![inode(12, "/bin/ls")]) })
            .await
            .unwrap();
        deliver(&mut c, run, CaptureEvent::ProtocolEnd).await.unwrap();

        assert_eq!(store.nodes_with_label(NodeLabel::HardeningProfile).await.len(), 1);
        let os = store.find_os("osw-debian-10").await.unwrap().unwrap();
        assert_eq!(
            os.get_property("release_date").and_then(|v| v.as_str()),
            Some("2019-07-06")
        );
    }

    #[tokio::test]
    async fn test_isolated_collector_output_is_discarded() {
        let store = InMemoryGraphStore::new();
        let mut c = collector(XML, &store);
        let run = RunId::new();
        let from = |source: &str, event| envelope(run, event).with_source(Some(source.to_string()));
        let mut sink = EventSink::new();

        deliver(&mut c, run, CaptureEvent::ProtocolStart).await.unwrap();
        c.on_event(&from("hardening", CaptureEvent::SecurityProfile { inode: 12, profile: profile() }), &mut sink)
            .await
            .unwrap();
        c.on_event(&from("extractor", CaptureEvent::SecurityProfile { inode: 13, profile: profile() }), &mut sink)
            .await
            .unwrap();
        let report = KernelHardeningReport::new("/boot/config", vec![]);
        c.on_event(&from("hardening", CaptureEvent::KernelHardening { report }), &mut sink)
            .await
            .unwrap();
        let inodes = vec![inode(12, "/bin/ls"), inode(13, "/bin/cat")];
        deliver(&mut c, run, CaptureEvent::FilesystemCaptured { root: FilesystemRoot::new(inodes) })
            .await
            .unwrap();

        c.discard_contributions("hardening");
        deliver(&mut c, run, CaptureEvent::ProtocolEnd).await.unwrap();

        assert_eq!(store.nodes_with_label(NodeLabel::HardeningProfile).await.len(), 1);
        assert_eq!(store.nodes_with_label(NodeLabel::KernelHardeningReport).await.len(), 0);
        assert_eq!(store.nodes_with_label(NodeLabel::FilesystemRoot).await.len(), 1);
    }

    #[tokio::test]
    async fn test_append_refuses_second_root_filesystem() {
        let store = InMemoryGraphStore::new();
        let mut c = collector(XML, &store).appending_to(NodeId::new());
        let run = RunId::new();
        deliver(&mut c, run, CaptureEvent::ProtocolStart).await.unwrap();
        let err = deliver(&mut c, run, CaptureEvent::FilesystemCaptured { root: FilesystemRoot::new(vec![]) })
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Attach(AttachError::AppendOnly { .. })));
    }

    #[tokio::test]
    async fn test_fact_before_start_is_rejected() {
        let store = InMemoryGraphStore::new();
        let mut c = collector(XML, &store);
        let err = deliver(&mut c, RunId::new(), CaptureEvent::ProcessesCaptured { processes: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::BeforeStart { .. }));
    }

    #[tokio::test]
    async fn test_foreign_run_is_rejected() {
        let store = InMemoryGraphStore::new();
        let mut c = collector(XML, &store);
        deliver(&mut c, RunId::new(), CaptureEvent::ProtocolStart).await.unwrap();
        let err = deliver(&mut c, RunId::new(), CaptureEvent::SyscallsCaptured { tables: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::ForeignRun { .. }));
    }

    #[tokio::test]
    async fn test_second_root_filesystem_is_an_error() {
        let store = InMemoryGraphStore::new();
        let mut c = collector(XML, &store);
        let run = RunId::new();
        deliver(&mut c, run, CaptureEvent::ProtocolStart).await.unwrap();
        deliver(&mut c, run, CaptureEvent::FilesystemCaptured { root: FilesystemRoot::new(vec![]) })
            .await
            .unwrap();
        let err = deliver(&mut c, run, CaptureEvent::FilesystemCaptured { root: FilesystemRoot::new(vec![]) })
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Attach(_)));
    }

    #[tokio::test]
    async fn test_bad_metadata_fails_at_start() {
        let store = InMemoryGraphStore::new();
        let mut c = collector("<domain><name>x</name></domain>", &store);
        let err = deliver(&mut c, RunId::new(), CaptureEvent::ProtocolStart).await.unwrap_err();
        assert!(matches!(err, CollectorError::GuestMetadata(_)));
        assert_eq!(store.node_count().await.unwrap(), 0);
    }
}
