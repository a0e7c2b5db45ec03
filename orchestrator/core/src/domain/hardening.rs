// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Normalization of hardening scanner output
//!
//! Scanners report flags as loosely typed strings ("yes", "Full RELRO",
//! "1", ...). Everything is mapped onto the typed graph model here so the
//! collectors never see raw tool output.

use oswatcher_graph::{HardeningProfile, KernelHardeningFinding, NodeId, PieMode};
use serde_json::{Map, Value};

use crate::domain::scanner::ScannerError;

pub const CHECKSEC: &str = "checksec";
pub const KERNEL_CHECKER: &str = "kernel-hardening-checker";

/// Case-insensitive truthy string: yes, true, y, 1
pub fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "y" | "1"
    )
}

/// Full and partial RELRO both count as present
pub fn relro_enabled(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    value.starts_with("full") || value.starts_with("partial")
}

/// Select the per-file object from a checksec JSON document.
///
/// Accepts `{"file": {...}}`, `{"<path>": {...}}` and a bare profile object.
fn file_object(document: &Value) -> Result<&Map<String, Value>, ScannerError> {
    let Value::Object(root) = document else {
        return Err(ScannerError::malformed(CHECKSEC, "top-level value is not an object"));
    };
    if let Some(Value::Object(file)) = root.get("file") {
        return Ok(file);
    }
    if root.contains_key("relro") {
        return Ok(root);
    }
    match (root.len(), root.values().next()) {
        (1, Some(Value::Object(file))) => Ok(file),
        _ => Err(ScannerError::malformed(CHECKSEC, "no per-file object found")),
    }
}

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Result<&'a Value, ScannerError> {
    keys.iter()
        .find_map(|k| object.get(*k))
        .ok_or_else(|| ScannerError::malformed(CHECKSEC, format!("missing field '{}'", keys[0])))
}

fn flag(object: &Map<String, Value>, keys: &[&str]) -> Result<bool, ScannerError> {
    match field(object, keys)? {
        Value::String(s) => Ok(str_to_bool(s)),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_i64() == Some(1)),
        other => Err(ScannerError::malformed(
            CHECKSEC,
            format!("field '{}' has unexpected value {}", keys[0], other),
        )),
    }
}

fn count(object: &Map<String, Value>, keys: &[&str]) -> Result<i64, ScannerError> {
    let value = field(object, keys)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ScannerError::malformed(CHECKSEC, format!("field '{}' is not a count: {}", keys[0], value))
    })
}

/// Build a [`HardeningProfile`] from checksec's JSON output
pub fn normalize_checksec(document: &Value) -> Result<HardeningProfile, ScannerError> {
    let file = file_object(document)?;

    let relro = match field(file, &["relro"])? {
        Value::String(s) => relro_enabled(s),
        Value::Bool(b) => *b,
        other => {
            return Err(ScannerError::malformed(
                CHECKSEC,
                format!("field 'relro' has unexpected value {}", other),
            ))
        }
    };
    let pie = match field(file, &["pie"])? {
        Value::String(s) => PieMode::parse(s),
        Value::Bool(true) => PieMode::Yes,
        Value::Bool(false) => PieMode::No,
        other => PieMode::Other(other.to_string()),
    };

    Ok(HardeningProfile {
        id: NodeId::new(),
        relro,
        canary: flag(file, &["canary"])?,
        nx: flag(file, &["nx"])?,
        pie,
        rpath: flag(file, &["rpath"])?,
        runpath: flag(file, &["runpath"])?,
        symtables: flag(file, &["symtables", "symbols"])?,
        fortify_source: flag(file, &["fortify_source", "fortify-source"])?,
        fortified: count(file, &["fortified"])?,
        fortifyable: count(file, &["fortify-able", "fortifyable", "fortifiable"])?,
    })
}

fn finding(option: &str, desired: &str, decision: &str, reason: &str, result: &str) -> KernelHardeningFinding {
    KernelHardeningFinding {
        id: NodeId::new(),
        option: option.to_string(),
        desired: desired.to_string(),
        decision: decision.to_string(),
        reason: reason.to_string(),
        result: result.to_string(),
        passed: result.trim_start().starts_with("OK"),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse kernel-hardening-checker `-m json` output.
///
/// Rows are either arrays (`[option, desired, decision, reason, result]`,
/// with an extra type column after the option in newer releases) or
/// objects keyed by column name.
pub fn parse_kernel_findings(document: &Value) -> Result<Vec<KernelHardeningFinding>, ScannerError> {
    let Value::Array(rows) = document else {
        return Err(ScannerError::malformed(KERNEL_CHECKER, "top-level value is not an array"));
    };

    rows.iter()
        .enumerate()
        .map(|(i, row)| match row {
            Value::Array(cols) => {
                let cols: Vec<String> = cols.iter().map(text).collect();
                match cols.as_slice() {
                    [option, desired, decision, reason, result] => {
                        Ok(finding(option, desired, decision, reason, result))
                    }
                    [option, _kind, desired, decision, reason, result] => {
                        Ok(finding(option, desired, decision, reason, result))
                    }
                    _ => Err(ScannerError::malformed(
                        KERNEL_CHECKER,
                        format!("row {} has {} columns", i, cols.len()),
                    )),
                }
            }
            Value::Object(obj) => {
                let get = |key: &str| obj.get(key).map(text).unwrap_or_default();
                let option = get("option_name");
                if option.is_empty() {
                    return Err(ScannerError::malformed(
                        KERNEL_CHECKER,
                        format!("row {} has no option_name", i),
                    ));
                }
                Ok(finding(
                    &option,
                    &get("desired_val"),
                    &get("decision"),
                    &get("reason"),
                    &get("check_result"),
                ))
            }
            _ => Err(ScannerError::malformed(
                KERNEL_CHECKER,
                format!("row {} is neither an array nor an object", i),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_reference_output() {
        let output = json!({
            "relro": "partial", "canary": "yes", "nx": "no", "pie": "yes",
            "rpath": "no", "runpath": "no", "symtables": "yes",
            "fortify_source": "yes", "fortified": 3, "fortify-able": 5
        });
        let profile = normalize_checksec(&output).unwrap();

        assert!(profile.relro);
        assert!(profile.canary);
        assert!(!profile.nx);
        assert_eq!(profile.pie, PieMode::Yes);
        assert!(!profile.rpath);
        assert!(!profile.runpath);
        assert!(profile.symtables);
        assert!(profile.fortify_source);
        assert_eq!(profile.fortified, 3);
        assert_eq!(profile.fortifyable, 5);
    }

    #[test]
    fn test_normalize_file_wrapper_and_string_counts() {
        let output = json!({"file": {
            "relro": "full", "canary": "Y", "nx": "TRUE", "pie": "dso",
            "rpath": "1", "runpath": "no", "symbols": "no",
            "fortify_source": "no", "fortified": "0", "fortify-able": "12"
        }});
        let profile = normalize_checksec(&output).unwrap();
        assert!(profile.relro && profile.canary && profile.nx && profile.rpath);
        assert!(!profile.symtables);
        assert_eq!(profile.pie, PieMode::Dso);
        assert_eq!(profile.fortifyable, 12);
    }

    #[test]
    fn test_normalize_per_path_object() {
        let output = json!({"/usr/bin/ls": {
            "relro": "no", "canary": "no", "nx": "yes", "pie": "REL",
            "rpath": "no", "runpath": "no", "symtables": "no",
            "fortify_source": "no", "fortified": 0, "fortify-able": 0
        }});
        let profile = normalize_checksec(&output).unwrap();
        assert!(!profile.relro);
        assert_eq!(profile.pie, PieMode::Other("REL".into()));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let output = json!({"file": {"relro": "full"}});
        assert!(matches!(
            normalize_checksec(&output),
            Err(ScannerError::MalformedOutput { .. })
        ));
        assert!(normalize_checksec(&json!("nope")).is_err());
    }

    #[test]
    fn test_truthy_strings() {
        for value in ["yes", "YES", "true", "y", "1", " Yes "] {
            assert!(str_to_bool(value), "{}", value);
        }
        for value in ["no", "false", "0", "", "enabled"] {
            assert!(!str_to_bool(value), "{}", value);
        }
    }

    #[test]
    fn test_parse_kernel_findings() {
        let output = json!([
            ["CONFIG_BUG", "y", "defconfig", "self_protection", "OK"],
            ["CONFIG_SLAB_FREELIST_HARDENED", "kconfig", "y", "kspp", "self_protection", "FAIL: \"is not set\""],
            {"option_name": "CONFIG_DEBUG_WX", "desired_val": "y", "decision": "kspp",
             "reason": "self_protection", "check_result": "OK: CONFIG_X is \"y\""}
        ]);
        let findings = parse_kernel_findings(&output).unwrap();
        assert_eq!(findings.len(), 3);
        assert!(findings[0].passed);
        assert!(!findings[1].passed);
        assert_eq!(findings[1].desired, "y");
        assert_eq!(findings[1].decision, "kspp");
        assert!(findings[2].passed);
    }

    #[test]
    fn test_kernel_findings_reject_short_rows() {
        assert!(parse_kernel_findings(&json!([["CONFIG_BUG", "y"]])).is_err());
        assert!(parse_kernel_findings(&json!({"rows": []})).is_err());
    }
}
