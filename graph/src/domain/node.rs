// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node and edge vocabulary of the capture graph

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Node identifier in the capture graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Label of a node in the capture graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    #[serde(rename = "OS")]
    OperatingSystem,
    FilesystemRoot,
    Inode,
    HardeningProfile,
    SyscallTable,
    Syscall,
    Process,
    KernelHardeningReport,
    KernelHardeningFinding,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 9] = [
        NodeLabel::OperatingSystem,
        NodeLabel::FilesystemRoot,
        NodeLabel::Inode,
        NodeLabel::HardeningProfile,
        NodeLabel::SyscallTable,
        NodeLabel::Syscall,
        NodeLabel::Process,
        NodeLabel::KernelHardeningReport,
        NodeLabel::KernelHardeningFinding,
    ];

    /// Label as written to the graph database
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::OperatingSystem => "OS",
            NodeLabel::FilesystemRoot => "FilesystemRoot",
            NodeLabel::Inode => "Inode",
            NodeLabel::HardeningProfile => "HardeningProfile",
            NodeLabel::SyscallTable => "SyscallTable",
            NodeLabel::Syscall => "Syscall",
            NodeLabel::Process => "Process",
            NodeLabel::KernelHardeningReport => "KernelHardeningReport",
            NodeLabel::KernelHardeningFinding => "KernelHardeningFinding",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of edge in the capture graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    /// Sub-resource belongs to exactly one OS node
    OwnedBy,

    /// OS to its captured filesystem root
    RootFilesystem,

    /// OS to an extracted syscall table
    SyscallTable,

    /// OS to an observed running process
    Process,

    /// Filesystem root or directory inode to a child inode, table to syscall
    Contains,

    /// Binary inode to its hardening profile
    SecurityProfile,

    /// OS to its kernel configuration hardening report
    KernelHardening,

    /// Kernel hardening report to one finding
    Finding,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::OwnedBy => "OWNED_BY",
            Relation::RootFilesystem => "ROOT_FILESYSTEM",
            Relation::SyscallTable => "SYSCALL_TABLE",
            Relation::Process => "PROCESS",
            Relation::Contains => "CONTAINS",
            Relation::SecurityProfile => "SECURITY_PROFILE",
            Relation::KernelHardening => "KERNEL_HARDENING",
            Relation::Finding => "FINDING",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar property value storable on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<u64> for PropertyValue {
    /// Values above `i64::MAX` are stored as decimal strings
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => PropertyValue::Int(v),
            Err(_) => PropertyValue::Str(value.to_string()),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

/// Flattened node ready to be written to a graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub label: NodeLabel,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl GraphNode {
    pub fn new(id: NodeId, label: NodeLabel) -> Self {
        Self {
            id,
            label,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Like [`GraphNode::with`], `None` values are skipped
    pub fn with_opt<V: Into<PropertyValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub relation: Relation,
}

impl GraphEdge {
    pub fn new(from: NodeId, to: NodeId, relation: Relation) -> Self {
        Self { from, to, relation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder_skips_none() {
        let node = GraphNode::new(NodeId::new(), NodeLabel::Process)
            .with("pid", 42u32)
            .with_opt::<String>("command_line", None);

        assert_eq!(node.get_property("pid"), Some(&PropertyValue::Int(42)));
        assert!(node.get_property("command_line").is_none());
    }

    #[test]
    fn test_large_u64_property_falls_back_to_string() {
        let value = PropertyValue::from(u64::MAX);
        assert_eq!(value.as_str(), Some("18446744073709551615"));
        assert_eq!(PropertyValue::from(7u64).as_int(), Some(7));
    }

    #[test]
    fn test_label_and_relation_names() {
        assert_eq!(NodeLabel::OperatingSystem.as_str(), "OS");
        assert_eq!(Relation::OwnedBy.to_string(), "OWNED_BY");
        assert_eq!(
            serde_json::to_string(&Relation::RootFilesystem).unwrap(),
            "\"ROOT_FILESYSTEM\""
        );
    }
}
