// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod extractor;
pub mod image_import;
pub mod process;
pub mod scanners;
pub mod virsh;
pub mod virsh_domain;

pub use event_bus::{BusError, EventBus, IsolatedFailure};
pub use extractor::CommandExtractor;
pub use image_import::{ImageImporter, ImportError, ImportOutcome};
pub use scanners::{ChecksecScanner, KernelHardeningChecker};
pub use virsh::VirshClient;
pub use virsh_domain::VirshDomainController;
