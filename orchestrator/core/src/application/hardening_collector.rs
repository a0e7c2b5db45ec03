// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hardening collector
//!
//! Scans every captured executable or shared library with the binary
//! hardening scanner and, once per run, checks the guest kernel config.

use async_trait::async_trait;
use oswatcher_graph::KernelHardeningReport;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::domain::capture_config::HardeningConfig;
use crate::domain::collector::{Collector, CollectorError, EventSink, FailurePolicy};
use crate::domain::events::{CaptureEvent, Envelope, EventKind};
use crate::domain::scanner::{BinaryHardeningScanner, KernelHardeningScanner};

static ELF_MIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^application/x(-pie)?-(executable|sharedlib)").expect("valid ELF MIME pattern")
});

static KERNEL_CONFIG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/?boot/config-[^/]+$").expect("valid kernel config pattern"));

const INTERESTS: [EventKind; 1] = [EventKind::FileCaptured];

/// MIME types of ELF executables, PIE executables and shared libraries
pub fn is_elf_mime(mime_type: &str) -> bool {
    ELF_MIME.is_match(mime_type)
}

pub struct HardeningCollector {
    binary: Arc<dyn BinaryHardeningScanner>,
    kernel: Option<Arc<dyn KernelHardeningScanner>>,
    kernel_config_path: Option<String>,
    policy: FailurePolicy,
    kernel_checked: bool,
}

impl HardeningCollector {
    pub fn new(binary: Arc<dyn BinaryHardeningScanner>) -> Self {
        Self {
            binary,
            kernel: None,
            kernel_config_path: None,
            policy: FailurePolicy::Abort,
            kernel_checked: false,
        }
    }

    pub fn from_config(
        config: &HardeningConfig,
        binary: Arc<dyn BinaryHardeningScanner>,
        kernel: Option<Arc<dyn KernelHardeningScanner>>,
    ) -> Self {
        let mut collector = Self::new(binary).with_failure_policy(config.on_failure);
        if let Some(kernel) = kernel {
            collector = collector.with_kernel_scanner(kernel, config.kernel_config_path.clone());
        }
        collector
    }

    /// Enable the once-per-run kernel config check
    pub fn with_kernel_scanner(
        mut self,
        scanner: Arc<dyn KernelHardeningScanner>,
        config_path: Option<String>,
    ) -> Self {
        self.kernel = Some(scanner);
        self.kernel_config_path = config_path;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn is_kernel_config(&self, guest_path: &str) -> bool {
        match &self.kernel_config_path {
            Some(explicit) => explicit.trim_start_matches('/') == guest_path.trim_start_matches('/'),
            None => KERNEL_CONFIG.is_match(guest_path),
        }
    }

    async fn check_kernel(&mut self, path: &Path, guest_path: &str, sink: &mut EventSink) -> Result<(), CollectorError> {
        let Some(scanner) = self.kernel.clone() else {
            return Ok(());
        };
        self.kernel_checked = true;

        let findings = scanner.check_config(path).await?;
        let report = KernelHardeningReport::new(guest_path, findings);
        info!(
            "Kernel config {}: {} checks passed, {} failed",
            guest_path,
            report.passed(),
            report.failed()
        );
        sink.emit(CaptureEvent::KernelHardening { report });
        Ok(())
    }
}

#[async_trait]
impl Collector for HardeningCollector {
    fn name(&self) -> &str {
        "hardening"
    }

    fn interests(&self) -> &[EventKind] {
        &INTERESTS
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    async fn on_event(&mut self, envelope: &Envelope, sink: &mut EventSink) -> Result<(), CollectorError> {
        let CaptureEvent::FileCaptured {
            inode,
            path,
            guest_path,
            mime_type,
        } = &envelope.event
        else {
            return Ok(());
        };

        if !self.kernel_checked && self.is_kernel_config(guest_path) {
            self.check_kernel(path, guest_path, sink).await?;
        }

        if !is_elf_mime(mime_type) {
            return Ok(());
        }

        let profile = self.binary.scan(path).await?;
        metrics::counter!("oswatcher_binaries_scanned_total").increment(1);
        debug!("Hardening profile for {} (inode {}): {:?}", guest_path, inode, profile);
        sink.emit(CaptureEvent::SecurityProfile {
            inode: *inode,
            profile,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::RunId;
    use crate::domain::scanner::ScannerError;
    use oswatcher_graph::{HardeningProfile, KernelHardeningFinding, NodeId, PieMode};
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeChecksec {
        scanned: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    #[async_trait]
    impl BinaryHardeningScanner for FakeChecksec {
        async fn scan(&self, path: &Path) -> Result<HardeningProfile, ScannerError> {
            self.scanned.lock().push(path.to_path_buf());
            if self.fail {
                return Err(ScannerError::malformed("checksec", "not json"));
            }
            Ok(HardeningProfile {
                id: NodeId::new(),
                relro: true,
                canary: true,
                nx: true,
                pie: PieMode::Yes,
                rpath: false,
                runpath: false,
                symtables: false,
                fortify_source: true,
                fortified: 1,
                fortifyable: 2,
            })
        }
    }

    struct FakeKernelChecker;

    #[async_trait]
    impl KernelHardeningScanner for FakeKernelChecker {
        async fn check_config(&self, _path: &Path) -> Result<Vec<KernelHardeningFinding>, ScannerError> {
            Ok(vec![KernelHardeningFinding {
                id: NodeId::new(),
                option: "CONFIG_BUG".into(),
                desired: "y".into(),
                decision: "defconfig".into(),
                reason: "self_protection".into(),
                result: "OK".into(),
                passed: true,
            }])
        }
    }

    fn file(inode: u64, guest_path: &str, mime: &str) -> Envelope {
        Envelope::new(
            RunId::new(),
            1,
            CaptureEvent::FileCaptured {
                inode,
                path: PathBuf::from("/tmp/extract").join(guest_path.trim_start_matches('/')),
                guest_path: guest_path.to_string(),
                mime_type: mime.to_string(),
            },
        )
    }

    #[test]
    fn test_kernel_config_pattern() {
        assert!(KERNEL_CONFIG.is_match("/boot/config-4.15.0-20-generic"));
        assert!(KERNEL_CONFIG.is_match("boot/config-5.10"));
        assert!(!KERNEL_CONFIG.is_match("/boot/grub/config-x"));
        assert!(!KERNEL_CONFIG.is_match("/boot/vmlinuz-5.10"));
    }

    #[test]
    fn test_mime_filter() {
        assert!(is_elf_mime("application/x-executable"));
        assert!(is_elf_mime("application/x-pie-executable"));
        assert!(is_elf_mime("application/x-sharedlib"));
        assert!(!is_elf_mime("text/plain"));
        assert!(!is_elf_mime("application/x-object"));
        assert!(!is_elf_mime("inode/x-executable"));
    }

    #[tokio::test]
    async fn test_non_matching_file_is_ignored() {
        let scanner = Arc::new(FakeChecksec::default());
        let mut collector = HardeningCollector::new(scanner.clone());
        let mut sink = EventSink::new();

        collector
            .on_event(&file(3, "/etc/passwd", "text/plain"), &mut sink)
            .await
            .unwrap();

        assert!(sink.is_empty());
        assert!(scanner.scanned.lock().is_empty());
    }

    #[tokio::test]
    async fn test_profile_keyed_by_inode() {
        let scanner = Arc::new(FakeChecksec::default());
        let mut collector = HardeningCollector::new(scanner.clone());
        let mut sink = EventSink::new();

        collector
            .on_event(&file(42, "/usr/bin/ls", "application/x-pie-executable"), &mut sink)
            .await
            .unwrap();

        let events = sink.into_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CaptureEvent::SecurityProfile { inode: 42, .. }));
        assert_eq!(*scanner.scanned.lock(), vec![PathBuf::from("/tmp/extract/usr/bin/ls")]);
    }

    #[tokio::test]
    async fn test_scanner_failure_is_an_error_not_an_empty_profile() {
        let scanner = Arc::new(FakeChecksec { fail: true, ..Default::default() });
        let mut collector = HardeningCollector::new(scanner);
        let mut sink = EventSink::new();

        let err = collector
            .on_event(&file(42, "/usr/lib/libc.so.6", "application/x-sharedlib"), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Scanner(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_kernel_config_checked_once() {
        let mut collector = HardeningCollector::new(Arc::new(FakeChecksec::default()))
            .with_kernel_scanner(Arc::new(FakeKernelChecker), None);
        let mut sink = EventSink::new();

        collector
            .on_event(&file(10, "/boot/config-5.4.0-42-generic", "text/plain"), &mut sink)
            .await
            .unwrap();
        collector
            .on_event(&file(11, "/boot/config-5.4.0-40-generic", "text/plain"), &mut sink)
            .await
            .unwrap();

        let reports: Vec<_> = sink
            .into_events()
            .into_iter()
            .filter(|e| e.kind() == EventKind::KernelHardening)
            .collect();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_kernel_config_path() {
        let mut collector = HardeningCollector::new(Arc::new(FakeChecksec::default()))
            .with_kernel_scanner(Arc::new(FakeKernelChecker), Some("/usr/src/linux/.config".into()));
        let mut sink = EventSink::new();

        collector
            .on_event(&file(10, "/boot/config-5.4.0", "text/plain"), &mut sink)
            .await
            .unwrap();
        assert!(sink.is_empty());

        collector
            .on_event(&file(11, "usr/src/linux/.config", "text/plain"), &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.len(), 1);
    }
}
