// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! External hardening scanner adapters
//!
//! - `checksec --output json --file <path>` for binaries
//! - `kernel-hardening-checker -c <config> -m json` for kernel configs
//!
//! Both tools are located at construction time so a missing tool fails the
//! run before the VM is started.

use async_trait::async_trait;
use oswatcher_graph::{HardeningProfile, KernelHardeningFinding};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::domain::hardening::{normalize_checksec, parse_kernel_findings, CHECKSEC, KERNEL_CHECKER};
use crate::domain::scanner::{BinaryHardeningScanner, KernelHardeningScanner, ScannerError};
use crate::infrastructure::process::{run_command, RunFailure};

/// Resolve a configured tool to an executable path via `PATH` lookup
pub fn locate_tool(tool: &str, configured: &Path) -> Result<PathBuf, ScannerError> {
    which::which(configured).map_err(|e| ScannerError::NotInstalled {
        tool: tool.to_string(),
        reason: format!("{}: {}", configured.display(), e),
    })
}

async fn run_json_tool(
    tool: &str,
    program: &Path,
    args: &[&str],
    target: &Path,
    timeout: Duration,
) -> Result<serde_json::Value, ScannerError> {
    let output = run_command(program, args, Some(timeout))
        .await
        .map_err(|failure| match failure {
            RunFailure::Spawn(source) => ScannerError::Spawn {
                tool: tool.to_string(),
                source,
            },
            RunFailure::TimedOut => ScannerError::Timeout {
                tool: tool.to_string(),
                path: target.display().to_string(),
            },
        })?;

    if !output.success {
        return Err(ScannerError::NonZeroExit {
            tool: tool.to_string(),
            path: target.display().to_string(),
            status: output.status,
            stderr: output.stderr,
        });
    }

    serde_json::from_str(&output.stdout).map_err(|e| ScannerError::malformed(tool, e.to_string()))
}

#[derive(Debug, Clone)]
pub struct ChecksecScanner {
    program: PathBuf,
    timeout: Duration,
}

impl ChecksecScanner {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn locate(configured: &Path, timeout: Duration) -> Result<Self, ScannerError> {
        Ok(Self::new(locate_tool(CHECKSEC, configured)?, timeout))
    }
}

#[async_trait]
impl BinaryHardeningScanner for ChecksecScanner {
    async fn scan(&self, path: &Path) -> Result<HardeningProfile, ScannerError> {
        let file = path.to_string_lossy();
        let document = run_json_tool(
            CHECKSEC,
            &self.program,
            &["--output", "json", "--file", file.as_ref()],
            path,
            self.timeout,
        )
        .await?;
        debug!("checksec {}: {}", path.display(), document);
        normalize_checksec(&document)
    }
}

#[derive(Debug, Clone)]
pub struct KernelHardeningChecker {
    program: PathBuf,
    timeout: Duration,
}

impl KernelHardeningChecker {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn locate(configured: &Path, timeout: Duration) -> Result<Self, ScannerError> {
        Ok(Self::new(locate_tool(KERNEL_CHECKER, configured)?, timeout))
    }
}

#[async_trait]
impl KernelHardeningScanner for KernelHardeningChecker {
    async fn check_config(&self, path: &Path) -> Result<Vec<KernelHardeningFinding>, ScannerError> {
        let config = path.to_string_lossy();
        let document = run_json_tool(
            KERNEL_CHECKER,
            &self.program,
            &["-c", config.as_ref(), "-m", "json"],
            path,
            self.timeout,
        )
        .await?;
        parse_kernel_findings(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_is_reported() {
        let err = locate_tool(CHECKSEC, Path::new("/nonexistent/checksec")).unwrap_err();
        assert!(matches!(err, ScannerError::NotInstalled { ref tool, .. } if tool == "checksec"));
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_checksec_output_normalized() {
            let dir = tempfile::tempdir().unwrap();
            let tool = script(
                dir.path(),
                "checksec",
                r#"echo '{"file": {"relro": "full", "canary": "yes", "nx": "yes", "pie": "yes", "rpath": "no", "runpath": "no", "symtables": "no", "fortify_source": "yes", "fortified": "3", "fortify-able": "7"}}'"#,
            );
            let scanner = ChecksecScanner::locate(&tool, Duration::from_secs(5)).unwrap();
            let profile = scanner.scan(Path::new("/tmp/ls")).await.unwrap();
            assert!(profile.relro);
            assert!(profile.canary);
            assert_eq!(profile.fortified, 3);
            assert_eq!(profile.fortifyable, 7);
        }

        #[tokio::test]
        async fn test_checksec_failure_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let tool = script(dir.path(), "checksec", "echo boom >&2; exit 2");
            let scanner = ChecksecScanner::new(tool, Duration::from_secs(5));
            let err = scanner.scan(Path::new("/tmp/ls")).await.unwrap_err();
            assert!(matches!(err, ScannerError::NonZeroExit { status: Some(2), .. }));
        }

        #[tokio::test]
        async fn test_checksec_garbage_is_malformed() {
            let dir = tempfile::tempdir().unwrap();
            let tool = script(dir.path(), "checksec", "echo not json");
            let scanner = ChecksecScanner::new(tool, Duration::from_secs(5));
            let err = scanner.scan(Path::new("/tmp/ls")).await.unwrap_err();
            assert!(matches!(err, ScannerError::MalformedOutput { .. }));
        }

        #[tokio::test]
        async fn test_kernel_checker_findings() {
            let dir = tempfile::tempdir().unwrap();
            let tool = script(
                dir.path(),
                "kernel-hardening-checker",
                r#"echo '[["CONFIG_BUG", "y", "defconfig", "self_protection", "OK"], ["CONFIG_DEBUG_WX", "y", "kspp", "self_protection", "FAIL: is not set"]]'"#,
            );
            let checker = KernelHardeningChecker::new(tool, Duration::from_secs(5));
            let findings = checker.check_config(Path::new("/tmp/config")).await.unwrap();
            assert_eq!(findings.len(), 2);
            assert!(findings[0].passed);
            assert!(!findings[1].passed);
        }
    }
}
