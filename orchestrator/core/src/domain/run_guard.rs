// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use oswatcher_graph::NodeId;
use serde::{Deserialize, Serialize};

/// How a capture treats an OS that is already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuardPolicy {
    /// `Some(true)` replaces the stored OS, unset or `false` skips the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<bool>,
    /// Attach new sub-resources to the stored OS node
    #[serde(default)]
    pub append: bool,
}

/// Decision taken before the VM is touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    Create,
    Skip,
    Replace,
    Append(NodeId),
}

impl GuardPolicy {
    pub fn replace(&self) -> bool {
        self.replace.unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.replace() && self.append {
            return Err("replace and append are mutually exclusive".to_string());
        }
        Ok(())
    }

    pub fn decide(&self, existing: Option<NodeId>) -> GuardAction {
        match existing {
            None => GuardAction::Create,
            Some(_) if self.replace() => GuardAction::Replace,
            Some(id) if self.append => GuardAction::Append(id),
            Some(_) => GuardAction::Skip,
        }
    }
}
