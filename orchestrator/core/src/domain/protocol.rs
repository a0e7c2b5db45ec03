// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Phase of the capture protocol. Transitions are strictly linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    #[default]
    Idle,
    PoweredOn,
    SettlingDesktop,
    Introspecting,
    PoweredOff,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal protocol transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: ProtocolState,
    pub to: ProtocolState,
}

impl ProtocolState {
    pub fn next(&self) -> Option<ProtocolState> {
        match self {
            ProtocolState::Idle => Some(ProtocolState::PoweredOn),
            ProtocolState::PoweredOn => Some(ProtocolState::SettlingDesktop),
            ProtocolState::SettlingDesktop => Some(ProtocolState::Introspecting),
            ProtocolState::Introspecting => Some(ProtocolState::PoweredOff),
            ProtocolState::PoweredOff => Some(ProtocolState::Done),
            ProtocolState::Done => None,
        }
    }

    pub fn transition(self, to: ProtocolState) -> Result<ProtocolState, IllegalTransition> {
        if self.next() == Some(to) {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }

    /// Whether the guest may be running in this state
    pub fn is_powered(&self) -> bool {
        matches!(
            self,
            ProtocolState::PoweredOn | ProtocolState::SettlingDesktop | ProtocolState::Introspecting
        )
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Idle => "idle",
            ProtocolState::PoweredOn => "powered_on",
            ProtocolState::SettlingDesktop => "settling_desktop",
            ProtocolState::Introspecting => "introspecting",
            ProtocolState::PoweredOff => "powered_off",
            ProtocolState::Done => "done",
        };
        f.write_str(name)
    }
}
