// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Security hardening facts attached to binaries and to the guest kernel

use serde::{Deserialize, Serialize};
use std::fmt;

use super::node::NodeId;

/// Position-independence of an ELF object as reported by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieMode {
    No,
    Yes,
    Dso,
    /// Any other tool-defined value (e.g. "rel"), kept verbatim
    #[serde(untagged)]
    Other(String),
}

impl PieMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "no" => PieMode::No,
            "yes" => PieMode::Yes,
            "dso" => PieMode::Dso,
            _ => PieMode::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PieMode::No => "no",
            PieMode::Yes => "yes",
            PieMode::Dso => "dso",
            PieMode::Other(s) => s,
        }
    }
}

impl fmt::Display for PieMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized binary hardening profile of one executable or shared library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardeningProfile {
    #[serde(default)]
    pub id: NodeId,
    pub relro: bool,
    pub canary: bool,
    pub nx: bool,
    pub pie: PieMode,
    pub rpath: bool,
    pub runpath: bool,
    pub symtables: bool,
    pub fortify_source: bool,
    pub fortified: i64,
    pub fortifyable: i64,
}

/// One kernel configuration check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelHardeningFinding {
    #[serde(default)]
    pub id: NodeId,
    pub option: String,
    pub desired: String,
    pub decision: String,
    pub reason: String,
    pub result: String,
    pub passed: bool,
}

/// Kernel configuration hardening report, one per captured OS
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelHardeningReport {
    #[serde(default)]
    pub id: NodeId,
    /// Guest path of the analysed kernel config
    pub config_path: String,
    pub findings: Vec<KernelHardeningFinding>,
}

impl KernelHardeningReport {
    pub fn new(config_path: impl Into<String>, findings: Vec<KernelHardeningFinding>) -> Self {
        Self {
            id: NodeId::new(),
            config_path: config_path.into(),
            findings,
        }
    }

    pub fn passed(&self) -> usize {
        self.findings.iter().filter(|f| f.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.findings.len() - self.passed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pie_mode_parse() {
        assert_eq!(PieMode::parse("yes"), PieMode::Yes);
        assert_eq!(PieMode::parse("DSO"), PieMode::Dso);
        assert_eq!(PieMode::parse("no"), PieMode::No);
        assert_eq!(PieMode::parse("REL"), PieMode::Other("REL".to_string()));
        assert_eq!(PieMode::Other("rel".into()).as_str(), "rel");
    }

    #[test]
    fn test_report_counts() {
        let finding = |passed| KernelHardeningFinding {
            id: NodeId::new(),
            option: "CONFIG_BUG".into(),
            desired: "y".into(),
            decision: "defconfig".into(),
            reason: "self_protection".into(),
            result: if passed { "OK".into() } else { "FAIL: not found".into() },
            passed,
        };
        let report = KernelHardeningReport::new("/boot/config-6.1", vec![finding(true), finding(false), finding(true)]);
        assert_eq!(report.passed(), 2);
        assert_eq!(report.failed(), 1);
    }
}
