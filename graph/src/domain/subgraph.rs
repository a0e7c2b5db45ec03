// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Flattened, owned-by rooted subgraph of one capture run
//!
//! Every non-root node carries exactly one `OWNED_BY` edge to the root OS
//! node. Stores rely on this to delete an OS and everything it owns by
//! following `OWNED_BY` edges inward.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::hardening::{HardeningProfile, KernelHardeningReport};
use super::node::{GraphEdge, GraphNode, NodeId, NodeLabel, Relation};
use super::os::{FilesystemRoot, Inode, OperatingSystem, Process, SyscallTable};

/// Whether the root OS node is created by the write or already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootMode {
    Create,
    /// Append: only sub-resources are written, owned by the stored root
    Existing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnershipViolation {
    #[error("root node {0} is missing from the subgraph")]
    MissingRoot(NodeId),

    #[error("node {0} is not owned by the root OS node")]
    Unowned(NodeId),

    #[error("node {node} has {count} OWNED_BY edges")]
    MultipleOwners { node: NodeId, count: usize },

    #[error("OWNED_BY edge from {from} points to {to}, not the root OS node")]
    ForeignOwner { from: NodeId, to: NodeId },

    #[error("edge {relation} references unknown node {node}")]
    DanglingEdge { relation: Relation, node: NodeId },

    #[error("node {0} appears more than once")]
    DuplicateNode(NodeId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: NodeId,
    /// Unique key of the root OS node
    pub root_name: String,
    pub root_mode: RootMode,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Subgraph {
    /// Flatten an assembled OS into nodes and edges
    pub fn from_os(os: &OperatingSystem, root_mode: RootMode) -> Self {
        let mut builder = Builder::new(os.id);

        builder.push_root(
            GraphNode::new(os.id, NodeLabel::OperatingSystem)
                .with("name", os.name.as_str())
                .with("release_date", os.release_date.as_str())
                .with("captured_at", os.captured_at.to_rfc3339()),
        );

        if let Some(fs) = &os.root_filesystem {
            builder.filesystem(fs);
        }
        for table in &os.syscall_tables {
            builder.syscall_table(table);
        }
        for process in &os.processes {
            builder.process(process);
        }
        if let Some(report) = &os.kernel_hardening {
            builder.kernel_report(report);
        }

        Self {
            root: os.id,
            root_name: os.name.clone(),
            root_mode,
            nodes: builder.nodes,
            edges: builder.edges,
        }
    }

    pub fn root_node(&self) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == self.root)
    }

    /// Nodes the write must create; the root is skipped in append mode
    pub fn nodes_to_create(&self) -> impl Iterator<Item = &GraphNode> {
        let skip_root = self.root_mode == RootMode::Existing;
        self.nodes
            .iter()
            .filter(move |n| !(skip_root && n.id == self.root))
    }

    pub fn count_label(&self, label: NodeLabel) -> usize {
        self.nodes.iter().filter(|n| n.label == label).count()
    }

    /// Check the owned-by closure before anything is written
    pub fn validate_ownership(&self) -> Result<(), OwnershipViolation> {
        let mut ids = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !ids.insert(node.id) {
                return Err(OwnershipViolation::DuplicateNode(node.id));
            }
        }
        if !ids.contains(&self.root) {
            return Err(OwnershipViolation::MissingRoot(self.root));
        }

        let mut owners: HashMap<NodeId, usize> = HashMap::new();
        for edge in &self.edges {
            for endpoint in [edge.from, edge.to] {
                if !ids.contains(&endpoint) {
                    return Err(OwnershipViolation::DanglingEdge {
                        relation: edge.relation,
                        node: endpoint,
                    });
                }
            }
            if edge.relation == Relation::OwnedBy {
                if edge.to != self.root {
                    return Err(OwnershipViolation::ForeignOwner {
                        from: edge.from,
                        to: edge.to,
                    });
                }
                *owners.entry(edge.from).or_default() += 1;
            }
        }

        for node in self.nodes.iter().filter(|n| n.id != self.root) {
            match owners.get(&node.id).copied().unwrap_or(0) {
                0 => return Err(OwnershipViolation::Unowned(node.id)),
                1 => {}
                count => {
                    return Err(OwnershipViolation::MultipleOwners {
                        node: node.id,
                        count,
                    })
                }
            }
        }
        Ok(())
    }
}

struct Builder {
    root: NodeId,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl Builder {
    fn new(root: NodeId) -> Self {
        Self {
            root,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    fn push_root(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    /// Push an owned node linked from `parent` by `relation`
    fn push_owned(&mut self, parent: NodeId, relation: Relation, node: GraphNode) {
        self.edges.push(GraphEdge::new(parent, node.id, relation));
        self.edges.push(GraphEdge::new(node.id, self.root, Relation::OwnedBy));
        self.nodes.push(node);
    }

    fn filesystem(&mut self, fs: &FilesystemRoot) {
        self.push_owned(
            self.root,
            Relation::RootFilesystem,
            GraphNode::new(fs.id, NodeLabel::FilesystemRoot).with("mount_point", fs.mount_point.as_str()),
        );

        let by_number: HashMap<u64, NodeId> = fs.inodes.iter().map(|i| (i.number, i.id)).collect();
        for inode in &fs.inodes {
            let parent = inode
                .parent
                .filter(|p| *p != inode.number)
                .and_then(|p| by_number.get(&p).copied())
                .unwrap_or(fs.id);
            self.inode(parent, inode);
        }
    }

    fn inode(&mut self, parent: NodeId, inode: &Inode) {
        self.push_owned(
            parent,
            Relation::Contains,
            GraphNode::new(inode.id, NodeLabel::Inode)
                .with("number", inode.number)
                .with("path", inode.path.as_str())
                .with("kind", inode.kind.as_str())
                .with_opt("mime_type", inode.mime_type.as_deref())
                .with("size", inode.size),
        );
        if let Some(profile) = &inode.security_profile {
            self.profile(inode.id, profile);
        }
    }

    fn profile(&mut self, inode: NodeId, profile: &HardeningProfile) {
        self.push_owned(
            inode,
            Relation::SecurityProfile,
            GraphNode::new(profile.id, NodeLabel::HardeningProfile)
                .with("relro", profile.relro)
                .with("canary", profile.canary)
                .with("nx", profile.nx)
                .with("pie", profile.pie.as_str())
                .with("rpath", profile.rpath)
                .with("runpath", profile.runpath)
                .with("symtables", profile.symtables)
                .with("fortify_source", profile.fortify_source)
                .with("fortified", profile.fortified)
                .with("fortifyable", profile.fortifyable),
        );
    }

    fn syscall_table(&mut self, table: &SyscallTable) {
        self.push_owned(
            self.root,
            Relation::SyscallTable,
            GraphNode::new(table.id, NodeLabel::SyscallTable).with("name", table.name.as_str()),
        );
        for syscall in &table.syscalls {
            self.push_owned(
                table.id,
                Relation::Contains,
                GraphNode::new(syscall.id, NodeLabel::Syscall)
                    .with("index", syscall.index)
                    .with("name", syscall.name.as_str())
                    .with_opt("address", syscall.address.map(|a| format!("{:#x}", a))),
            );
        }
    }

    fn process(&mut self, process: &Process) {
        self.push_owned(
            self.root,
            Relation::Process,
            GraphNode::new(process.id, NodeLabel::Process)
                .with("pid", process.pid)
                .with_opt("ppid", process.ppid)
                .with("name", process.name.as_str())
                .with_opt("command_line", process.command_line.as_deref())
                .with_opt("uid", process.uid),
        );
    }

    fn kernel_report(&mut self, report: &KernelHardeningReport) {
        self.push_owned(
            self.root,
            Relation::KernelHardening,
            GraphNode::new(report.id, NodeLabel::KernelHardeningReport)
                .with("config_path", report.config_path.as_str())
                .with("passed", report.passed() as u64)
                .with("failed", report.failed() as u64),
        );
        for finding in &report.findings {
            self.push_owned(
                report.id,
                Relation::Finding,
                GraphNode::new(finding.id, NodeLabel::KernelHardeningFinding)
                    .with("option", finding.option.as_str())
                    .with("desired", finding.desired.as_str())
                    .with("decision", finding.decision.as_str())
                    .with("reason", finding.reason.as_str())
                    .with("result", finding.result.as_str())
                    .with("passed", finding.passed),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::hardening::PieMode;
    use crate::domain::os::{InodeKind, Syscall};

    fn sample_os() -> OperatingSystem {
        let mut os = OperatingSystem::new("ubuntu-20.04", "2020-04-23");
        let bin = Inode {
            id: NodeId::new(),
            number: 2,
            parent: None,
            path: "/bin".into(),
            kind: InodeKind::Directory,
            mime_type: None,
            size: 4096,
            security_profile: None,
        };
        let ls = Inode {
            id: NodeId::new(),
            number: 3,
            parent: Some(2),
            path: "/bin/ls".into(),
            kind: InodeKind::File,
            mime_type: Some("application/x-pie-executable".into()),
            size: 142144,
            security_profile: Some(HardeningProfile {
                id: NodeId::new(),
                relro: true,
                canary: true,
                nx: true,
                pie: PieMode::Yes,
                rpath: false,
                runpath: false,
                symtables: false,
                fortify_source: true,
                fortified: 5,
                fortifyable: 17,
            }),
        };
        os.attach_root_filesystem(FilesystemRoot::new(vec![bin, ls])).unwrap();
        os.attach_syscall_tables(vec![SyscallTable {
            id: NodeId::new(),
            name: "sys_call_table".into(),
            syscalls: vec![Syscall {
                id: NodeId::new(),
                index: 0,
                name: "sys_read".into(),
                address: Some(0xffffffff8120c8a0),
            }],
        }]);
        os.attach_processes(vec![Process {
            id: NodeId::new(),
            pid: 1,
            ppid: None,
            name: "systemd".into(),
            command_line: Some("/sbin/init".into()),
            uid: Some(0),
        }]);
        os
    }

    #[test]
    fn test_flatten_counts() {
        let subgraph = Subgraph::from_os(&sample_os(), RootMode::Create);

        assert_eq!(subgraph.count_label(NodeLabel::OperatingSystem), 1);
        assert_eq!(subgraph.count_label(NodeLabel::FilesystemRoot), 1);
        assert_eq!(subgraph.count_label(NodeLabel::Inode), 2);
        assert_eq!(subgraph.count_label(NodeLabel::HardeningProfile), 1);
        assert_eq!(subgraph.count_label(NodeLabel::SyscallTable), 1);
        assert_eq!(subgraph.count_label(NodeLabel::Syscall), 1);
        assert_eq!(subgraph.count_label(NodeLabel::Process), 1);
        assert_eq!(subgraph.nodes.len(), 8);
    }

    #[test]
    fn test_every_node_owned_once() {
        let subgraph = Subgraph::from_os(&sample_os(), RootMode::Create);
        subgraph.validate_ownership().unwrap();

        let owned_by = subgraph
            .edges
            .iter()
            .filter(|e| e.relation == Relation::OwnedBy)
            .count();
        assert_eq!(owned_by, subgraph.nodes.len() - 1);
    }

    #[test]
    fn test_inode_tree_follows_parent() {
        let os = sample_os();
        let fs = os.root_filesystem.as_ref().unwrap();
        let subgraph = Subgraph::from_os(&os, RootMode::Create);

        let contains = |from: NodeId, to: NodeId| {
            subgraph
                .edges
                .contains(&GraphEdge::new(from, to, Relation::Contains))
        };
        assert!(contains(fs.id, fs.inodes[0].id));
        assert!(contains(fs.inodes[0].id, fs.inodes[1].id));
    }

    #[test]
    fn test_unowned_node_rejected() {
        let mut subgraph = Subgraph::from_os(&sample_os(), RootMode::Create);
        let stray = GraphNode::new(NodeId::new(), NodeLabel::Process).with("pid", 7u32);
        let stray_id = stray.id;
        subgraph.nodes.push(stray);

        assert_eq!(
            subgraph.validate_ownership(),
            Err(OwnershipViolation::Unowned(stray_id))
        );
    }

    #[test]
    fn test_foreign_owner_rejected() {
        let mut subgraph = Subgraph::from_os(&sample_os(), RootMode::Create);
        let other_os = GraphNode::new(NodeId::new(), NodeLabel::OperatingSystem);
        let process = subgraph
            .nodes
            .iter()
            .find(|n| n.label == NodeLabel::Process)
            .unwrap()
            .id;
        subgraph
            .edges
            .push(GraphEdge::new(process, other_os.id, Relation::OwnedBy));
        subgraph.nodes.push(other_os);

        assert!(matches!(
            subgraph.validate_ownership(),
            Err(OwnershipViolation::ForeignOwner { .. })
        ));
    }

    #[test]
    fn test_existing_root_not_recreated() {
        let subgraph = Subgraph::from_os(&sample_os(), RootMode::Existing);
        assert!(subgraph
            .nodes_to_create()
            .all(|n| n.label != NodeLabel::OperatingSystem));
    }
}
