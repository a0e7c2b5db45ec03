// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use oswatcher_graph::{
    FilesystemRoot, HardeningProfile, InodeNumber, KernelHardeningReport, Process, SyscallTable,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier of one capture run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex digits, used to name per-run resources
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a capture event, used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProtocolStart,
    Offline,
    DesktopReady,
    ProtocolEnd,
    FileCaptured,
    FilesystemCaptured,
    SyscallsCaptured,
    ProcessesCaptured,
    SecurityProfile,
    KernelHardening,
}

impl EventKind {
    pub const LIFECYCLE: [EventKind; 4] = [
        EventKind::ProtocolStart,
        EventKind::Offline,
        EventKind::DesktopReady,
        EventKind::ProtocolEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProtocolStart => "protocol_start",
            EventKind::Offline => "offline",
            EventKind::DesktopReady => "desktop_ready",
            EventKind::ProtocolEnd => "protocol_end",
            EventKind::FileCaptured => "file_captured",
            EventKind::FilesystemCaptured => "filesystem_captured",
            EventKind::SyscallsCaptured => "syscalls_captured",
            EventKind::ProcessesCaptured => "processes_captured",
            EventKind::SecurityProfile => "security_profile",
            EventKind::KernelHardening => "kernel_hardening",
        }
    }

    /// Lifecycle events are only ever published by the capture protocol
    pub fn is_lifecycle(&self) -> bool {
        Self::LIFECYCLE.contains(self)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle signal or fact published on the capture bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureEvent {
    ProtocolStart,
    Offline,
    DesktopReady,
    ProtocolEnd,

    /// A guest file was extracted to `path` on the host
    FileCaptured {
        inode: InodeNumber,
        path: PathBuf,
        guest_path: String,
        mime_type: String,
    },
    FilesystemCaptured {
        root: FilesystemRoot,
    },
    SyscallsCaptured {
        tables: Vec<SyscallTable>,
    },
    ProcessesCaptured {
        processes: Vec<Process>,
    },
    SecurityProfile {
        inode: InodeNumber,
        profile: HardeningProfile,
    },
    KernelHardening {
        report: KernelHardeningReport,
    },
}

impl CaptureEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CaptureEvent::ProtocolStart => EventKind::ProtocolStart,
            CaptureEvent::Offline => EventKind::Offline,
            CaptureEvent::DesktopReady => EventKind::DesktopReady,
            CaptureEvent::ProtocolEnd => EventKind::ProtocolEnd,
            CaptureEvent::FileCaptured { .. } => EventKind::FileCaptured,
            CaptureEvent::FilesystemCaptured { .. } => EventKind::FilesystemCaptured,
            CaptureEvent::SyscallsCaptured { .. } => EventKind::SyscallsCaptured,
            CaptureEvent::ProcessesCaptured { .. } => EventKind::ProcessesCaptured,
            CaptureEvent::SecurityProfile { .. } => EventKind::SecurityProfile,
            CaptureEvent::KernelHardening { .. } => EventKind::KernelHardening,
        }
    }
}

/// An event as delivered to collectors, keyed to its capture run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub run_id: RunId,
    /// Position in the run's publication order, starting at 1
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    /// Collector whose handler emitted this event, `None` for protocol publications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub event: CaptureEvent,
}

impl Envelope {
    pub fn new(run_id: RunId, sequence: u64, event: CaptureEvent) -> Self {
        Self {
            run_id,
            sequence,
            published_at: Utc::now(),
            source: None,
            event,
        }
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
