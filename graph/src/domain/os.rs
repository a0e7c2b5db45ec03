// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Operating system aggregate and the sub-resources it owns
//!
//! An [`OperatingSystem`] is the sole root of one capture run. Facts arriving
//! during the run are attached to it here and flattened into a
//! [`Subgraph`](super::subgraph::Subgraph) for the single durable write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::hardening::{HardeningProfile, KernelHardeningReport};
use super::node::NodeId;

/// Inode number, unique within one captured filesystem
pub type InodeNumber = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeKind {
    #[default]
    File,
    Directory,
    Symlink,
    Other,
}

impl InodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InodeKind::File => "file",
            InodeKind::Directory => "directory",
            InodeKind::Symlink => "symlink",
            InodeKind::Other => "other",
        }
    }
}

/// One entry of the captured filesystem tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    #[serde(default)]
    pub id: NodeId,
    pub number: InodeNumber,
    /// Inode number of the containing directory, `None` for top-level entries
    #[serde(default)]
    pub parent: Option<InodeNumber>,
    pub path: String,
    #[serde(default)]
    pub kind: InodeKind,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub security_profile: Option<HardeningProfile>,
}

/// Root of the captured filesystem tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemRoot {
    #[serde(default)]
    pub id: NodeId,
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
    #[serde(default)]
    pub inodes: Vec<Inode>,
}

fn default_mount_point() -> String {
    "/".to_string()
}

impl FilesystemRoot {
    pub fn new(inodes: Vec<Inode>) -> Self {
        Self {
            id: NodeId::new(),
            mount_point: default_mount_point(),
            inodes,
        }
    }

    pub fn find_inode_mut(&mut self, number: InodeNumber) -> Option<&mut Inode> {
        self.inodes.iter_mut().find(|i| i.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Syscall {
    #[serde(default)]
    pub id: NodeId,
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub address: Option<u64>,
}

/// Syscall table extracted from guest kernel memory (e.g. `sys_call_table`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyscallTable {
    #[serde(default)]
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub syscalls: Vec<Syscall>,
}

/// Process observed running in the guest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    #[serde(default)]
    pub id: NodeId,
    pub pid: u32,
    #[serde(default)]
    pub ppid: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub command_line: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
}

/// Errors raised while attaching facts to an [`OperatingSystem`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("OS {0} already has a root filesystem")]
    DuplicateRootFilesystem(String),

    #[error("OS {0} already has a kernel hardening report")]
    DuplicateKernelReport(String),

    #[error("OS {os} is stored already; appending cannot add another {relation}")]
    AppendOnly { os: String, relation: &'static str },
}

/// The OS node of one capture run with everything it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingSystem {
    pub id: NodeId,
    /// VM identifier, unique key of the OS node
    pub name: String,
    pub release_date: String,
    pub captured_at: DateTime<Utc>,
    pub root_filesystem: Option<FilesystemRoot>,
    pub syscall_tables: Vec<SyscallTable>,
    pub processes: Vec<Process>,
    pub kernel_hardening: Option<KernelHardeningReport>,
    /// Set when the OS node already exists in the store; its singular
    /// sub-resources were written by an earlier run
    #[serde(skip)]
    pub append_only: bool,
}

impl OperatingSystem {
    pub fn new(name: impl Into<String>, release_date: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            release_date: release_date.into(),
            captured_at: Utc::now(),
            root_filesystem: None,
            syscall_tables: Vec::new(),
            processes: Vec::new(),
            kernel_hardening: None,
            append_only: false,
        }
    }

    /// Reuse an OS node that already exists in the store (append mode)
    pub fn with_existing_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self.append_only = true;
        self
    }

    pub fn attach_root_filesystem(&mut self, root: FilesystemRoot) -> Result<(), AttachError> {
        if self.append_only {
            return Err(AttachError::AppendOnly {
                os: self.name.clone(),
                relation: "ROOT_FILESYSTEM",
            });
        }
        if self.root_filesystem.is_some() {
            return Err(AttachError::DuplicateRootFilesystem(self.name.clone()));
        }
        self.root_filesystem = Some(root);
        Ok(())
    }

    pub fn attach_syscall_tables(&mut self, tables: impl IntoIterator<Item = SyscallTable>) {
        self.syscall_tables.extend(tables);
    }

    pub fn attach_processes(&mut self, processes: impl IntoIterator<Item = Process>) {
        self.processes.extend(processes);
    }

    pub fn attach_kernel_hardening(&mut self, report: KernelHardeningReport) -> Result<(), AttachError> {
        if self.append_only {
            return Err(AttachError::AppendOnly {
                os: self.name.clone(),
                relation: "KERNEL_HARDENING",
            });
        }
        if self.kernel_hardening.is_some() {
            return Err(AttachError::DuplicateKernelReport(self.name.clone()));
        }
        self.kernel_hardening = Some(report);
        Ok(())
    }

    pub fn detach_root_filesystem(&mut self) -> Option<FilesystemRoot> {
        self.root_filesystem.take()
    }

    pub fn detach_kernel_hardening(&mut self) -> Option<KernelHardeningReport> {
        self.kernel_hardening.take()
    }

    /// Drop the syscall tables with the given ids, returning how many were removed
    pub fn detach_syscall_tables(&mut self, ids: &[NodeId]) -> usize {
        let before = self.syscall_tables.len();
        self.syscall_tables.retain(|t| !ids.contains(&t.id));
        before - self.syscall_tables.len()
    }

    /// Drop the processes with the given ids, returning how many were removed
    pub fn detach_processes(&mut self, ids: &[NodeId]) -> usize {
        let before = self.processes.len();
        self.processes.retain(|p| !ids.contains(&p.id));
        before - self.processes.len()
    }

    /// Attach staged hardening profiles to the inodes they were computed for.
    ///
    /// Returns the profiles whose inode is not part of the captured tree; they
    /// are not attached so no orphan node can be written.
    pub fn resolve_security_profiles(
        &mut self,
        profiles: HashMap<InodeNumber, HardeningProfile>,
    ) -> Vec<(InodeNumber, HardeningProfile)> {
        let mut unresolved = Vec::new();
        for (number, profile) in profiles {
            match self.root_filesystem.as_mut().and_then(|fs| fs.find_inode_mut(number)) {
                Some(inode) => inode.security_profile = Some(profile),
                None => unresolved.push((number, profile)),
            }
        }
        unresolved.sort_by_key(|(number, _)| *number);
        unresolved
    }
}
