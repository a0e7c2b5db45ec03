// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capture protocol
//!
//! Drives the domain through boot, settle, introspection and shutdown and
//! publishes the lifecycle events collectors hang off:
//!
//! 1. `protocol_start`, `offline` (guest still off), power on
//! 2. blind wait of `desktop_ready_delay`
//! 3. `desktop_ready`
//! 4. power off
//! 5. `protocol_end`
//!
//! Once power-on succeeded, power-off is attempted on every exit path.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::domain::controller::{DomainController, DomainError};
use crate::domain::events::CaptureEvent;
use crate::domain::protocol::{IllegalTransition, ProtocolState};
use crate::infrastructure::event_bus::{BusError, EventBus};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Domain control failed: {0}")]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),
}

pub struct CaptureProtocol {
    controller: Arc<dyn DomainController>,
    desktop_ready_delay: Duration,
    state: ProtocolState,
}

impl CaptureProtocol {
    pub fn new(controller: Arc<dyn DomainController>, desktop_ready_delay: Duration) -> Self {
        Self {
            controller,
            desktop_ready_delay,
            state: ProtocolState::Idle,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    fn advance(&mut self, to: ProtocolState) -> Result<(), IllegalTransition> {
        self.state = self.state.transition(to)?;
        tracing::debug!("Protocol state: {}", self.state);
        Ok(())
    }

    pub async fn run(&mut self, bus: &mut EventBus) -> Result<(), ProtocolError> {
        if self.state != ProtocolState::Idle {
            return Err(IllegalTransition {
                from: self.state,
                to: ProtocolState::PoweredOn,
            }
            .into());
        }

        bus.publish(CaptureEvent::ProtocolStart).await?;
        bus.publish(CaptureEvent::Offline).await?;

        info!("Powering on {}", self.controller.domain_name());
        self.controller.power_on().await?;
        self.advance(ProtocolState::PoweredOn)?;

        if let Err(e) = self.while_running(bus).await {
            error!("Capture failed while the guest was running: {}", e);
            if let Err(off) = self.controller.power_off().await {
                error!("Power-off after failure also failed: {}", off);
            }
            return Err(e);
        }

        info!("Powering off {}", self.controller.domain_name());
        self.controller.power_off().await?;
        self.advance(ProtocolState::PoweredOff)?;

        bus.publish(CaptureEvent::ProtocolEnd).await?;
        self.advance(ProtocolState::Done)?;
        Ok(())
    }

    async fn while_running(&mut self, bus: &mut EventBus) -> Result<(), ProtocolError> {
        info!(
            "Waiting {} for the desktop to be ready",
            humantime::format_duration(self.desktop_ready_delay)
        );
        self.advance(ProtocolState::SettlingDesktop)?;
        tokio::time::sleep(self.desktop_ready_delay).await;

        bus.publish(CaptureEvent::DesktopReady).await?;
        self.advance(ProtocolState::Introspecting)?;
        Ok(())
    }
}
