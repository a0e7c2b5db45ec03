// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capture command
//!
//! Wires the manifest into a capture run: graph store, virsh controller,
//! hardening scanners and the optional introspection extractor.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use oswatcher_core::application::{
    create_graph_store, CaptureOutcome, CaptureService, GuardDecision, HardeningCollector,
    IntrospectionCollector,
};
use oswatcher_core::domain::capture_config::CaptureConfigManifest;
use oswatcher_core::domain::collector::Collector;
use oswatcher_core::domain::controller::DomainController;
use oswatcher_core::domain::run_guard::GuardPolicy;
use oswatcher_core::domain::scanner::KernelHardeningScanner;
use oswatcher_core::infrastructure::{
    ChecksecScanner, CommandExtractor, KernelHardeningChecker, VirshDomainController,
};

#[derive(Args, Debug, Default)]
pub struct CaptureArgs {
    /// libvirt domain to capture (default: spec.capture.vm_name)
    #[arg(value_name = "VM")]
    pub vm_name: Option<String>,

    /// Replace an OS that is already stored
    #[arg(long, conflicts_with = "append")]
    pub replace: bool,

    /// Attach new sub-resources to an OS that is already stored
    #[arg(long)]
    pub append: bool,

    /// Delete the entire graph store before capturing
    #[arg(long)]
    pub delete: bool,
}

pub async fn handle_command(args: CaptureArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_override)?;
    let vm_name = resolve_vm_name(&args, &config)?;
    let policy = guard_policy(&args, &config);
    let wipe = args.delete || config.spec.graph.delete;

    let store = create_graph_store(&config.spec.graph)
        .await
        .context("Failed to open graph store")?;
    let controller: Arc<dyn DomainController> = Arc::new(VirshDomainController::from_config(
        vm_name.clone(),
        &config.spec.connection,
    ));
    let collectors = build_collectors(&config, controller.clone())?;

    let service = CaptureService::new(controller, store, config.spec.capture.desktop_ready_delay)
        .with_guard_policy(policy)
        .wipe_store_first(wipe);

    println!("Capturing {}...", vm_name.bold());
    let outcome = service
        .capture(collectors)
        .await
        .with_context(|| format!("Capture of {} failed", vm_name))?;

    match outcome {
        CaptureOutcome::Skipped { os_name } => {
            info!("{} is already stored, skipping", os_name);
            println!(
                "{}",
                format!(
                    "⊘ {} already in the graph store (use --replace or --append)",
                    os_name
                )
                .yellow()
            );
        }
        CaptureOutcome::Captured {
            run_id,
            os_name,
            decision,
            events_published,
            isolated,
            duration,
        } => {
            if let GuardDecision::Replaced { removed } = decision {
                println!("  Replaced previous capture ({} nodes removed)", removed);
            }
            if matches!(decision, GuardDecision::Append { .. }) {
                println!("  Appended to existing capture");
            }
            println!("  Run: {}", run_id);
            println!("  Events: {}", events_published);
            println!("  Duration: {:.1}s", duration.as_secs_f64());
            for failure in &isolated {
                println!(
                    "  {} collector {} isolated on {}: {}",
                    "!".yellow(),
                    failure.collector,
                    failure.event,
                    failure.error
                );
            }
            println!("{}", format!("✓ Captured {}", os_name).green());
        }
    }

    Ok(())
}

fn resolve_vm_name(args: &CaptureArgs, config: &CaptureConfigManifest) -> Result<String> {
    args.vm_name
        .clone()
        .or_else(|| config.spec.capture.vm_name.clone())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| anyhow!("No VM given: pass one or set spec.capture.vm_name"))
}

/// Command-line flags take precedence over the manifest's guard section
pub fn guard_policy(args: &CaptureArgs, config: &CaptureConfigManifest) -> GuardPolicy {
    let mut policy = config.spec.capture.guard;
    if args.replace {
        policy.replace = Some(true);
        policy.append = false;
    }
    if args.append {
        policy.append = true;
        policy.replace = Some(false);
    }
    policy
}

fn build_collectors(
    config: &CaptureConfigManifest,
    controller: Arc<dyn DomainController>,
) -> Result<Vec<Box<dyn Collector>>> {
    let mut collectors: Vec<Box<dyn Collector>> = Vec::new();

    let hardening = &config.spec.collectors.hardening;
    if hardening.enabled {
        let checksec = ChecksecScanner::locate(&hardening.checksec_path, hardening.timeout)
            .context("Hardening collector is enabled but checksec is unavailable")?;
        let kernel: Option<Arc<dyn KernelHardeningScanner>> = match &hardening.kernel_checker_path {
            Some(path) => Some(Arc::new(
                KernelHardeningChecker::locate(path, hardening.timeout)
                    .context("Configured kernel hardening checker is unavailable")?,
            )),
            None => None,
        };
        collectors.push(Box::new(HardeningCollector::from_config(
            hardening,
            Arc::new(checksec),
            kernel,
        )));
    }

    let introspection = &config.spec.collectors.introspection;
    if introspection.enabled {
        let extractor = CommandExtractor::from_config(introspection)
            .context("Invalid introspection command")?;
        collectors.push(Box::new(
            IntrospectionCollector::new(Arc::new(extractor), controller)
                .with_failure_policy(introspection.on_failure),
        ));
    }

    Ok(collectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(replace: Option<bool>, append: bool) -> CaptureConfigManifest {
        let mut config = CaptureConfigManifest::default();
        config.spec.capture.guard = GuardPolicy { replace, append };
        config
    }

    #[test]
    fn test_manifest_guard_used_without_flags() {
        let config = config_with(Some(true), false);
        let policy = guard_policy(&CaptureArgs::default(), &config);
        assert!(policy.replace());
        assert!(!policy.append);
    }

    #[test]
    fn test_append_flag_overrides_manifest_replace() {
        let config = config_with(Some(true), false);
        let args = CaptureArgs {
            append: true,
            ..Default::default()
        };
        let policy = guard_policy(&args, &config);
        assert!(policy.append);
        assert!(!policy.replace());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_replace_flag_overrides_manifest_append() {
        let config = config_with(None, true);
        let args = CaptureArgs {
            replace: true,
            ..Default::default()
        };
        let policy = guard_policy(&args, &config);
        assert!(policy.replace());
        assert!(!policy.append);
    }

    #[test]
    fn test_vm_name_falls_back_to_manifest() {
        let mut config = CaptureConfigManifest::default();
        config.spec.capture.vm_name = Some("ubuntu16.04".to_string());
        let name = resolve_vm_name(&CaptureArgs::default(), &config).unwrap();
        assert_eq!(name, "ubuntu16.04");

        let args = CaptureArgs {
            vm_name: Some("win10".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_vm_name(&args, &config).unwrap(), "win10");
    }

    #[test]
    fn test_missing_vm_name_is_an_error() {
        let config = CaptureConfigManifest::default();
        assert!(resolve_vm_name(&CaptureArgs::default(), &config).is_err());
    }

    #[test]
    fn test_disabled_collectors_build_nothing() {
        let mut config = CaptureConfigManifest::default();
        config.spec.collectors.hardening.enabled = false;
        let controller: Arc<dyn DomainController> = Arc::new(VirshDomainController::from_config(
            "vm",
            &config.spec.connection,
        ));
        let collectors = build_collectors(&config, controller).unwrap();
        assert!(collectors.is_empty());
    }
}
