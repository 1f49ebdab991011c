use crate::bus::{BusClient, RawTarget};
use crate::error::BusError;
use crate::report::{InputState, XusbReport};
use std::sync::Arc;

/// Lifecycle of one bus target.
///
/// `Unattached` only exists between allocation and a successful add;
/// `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Unattached,
    Attached,
    Removed,
}

impl TargetState {
    /// Checked transition. Illegal moves are rejected with the code the bus
    /// itself would answer for the same misuse.
    pub fn transition(self, to: TargetState) -> Result<TargetState, BusError> {
        use TargetState::*;
        match (self, to) {
            (Unattached, Attached) | (Attached, Removed) => Ok(to),
            (Attached, Attached) => Err(BusError::AlreadyConnected),
            (Unattached | Removed, Removed) => Err(BusError::TargetNotPluggedIn),
            (Removed, Attached) | (_, Unattached) => Err(BusError::InvalidTarget),
        }
    }
}

/// A virtual Xbox 360 controller plugged into the bus.
///
/// Only exists once the target has been added. The report buffer is owned
/// and rewritten in place by every update.
pub struct VirtualController {
    bus: Arc<BusClient>,
    target: RawTarget,
    report: XusbReport,
    state: TargetState,
}

impl VirtualController {
    /// Allocate a target and plug it in. On a failed add the native target is
    /// freed before the error is returned.
    pub fn create(bus: Arc<BusClient>) -> Result<Self, BusError> {
        let target = bus.alloc_target()?;
        let mut controller = Self {
            bus,
            target,
            report: XusbReport::default(),
            state: TargetState::Unattached,
        };
        controller.bus.add_target(target)?;
        controller.state = controller.state.transition(TargetState::Attached)?;
        Ok(controller)
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn target(&self) -> RawTarget {
        self.target
    }

    /// The report most recently pushed to the bus.
    pub fn report(&self) -> &XusbReport {
        &self.report
    }

    pub fn update(&mut self, state: &InputState) -> Result<(), BusError> {
        if self.state != TargetState::Attached {
            return Err(BusError::TargetNotPluggedIn);
        }
        self.report.apply(state);
        log::trace!("target {} <- {:?}", self.target.as_raw(), self.report);
        self.bus.update_target(self.target, &self.report)
    }

    /// Unplug and free the target. The native target is freed even when the
    /// bus reports a removal failure.
    pub fn remove(mut self) -> Result<(), BusError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), BusError> {
        self.state = self.state.transition(TargetState::Removed)?;
        let removed = self.bus.remove_target(self.target);
        self.bus.free_target(self.target);
        removed
    }
}

impl Drop for VirtualController {
    fn drop(&mut self) {
        match self.state {
            TargetState::Unattached => self.bus.free_target(self.target),
            TargetState::Attached => {
                if let Err(e) = self.release() {
                    log::error!(
                        "Failed to remove dropped target {}: {}",
                        self.target.as_raw(),
                        e
                    );
                }
            }
            TargetState::Removed => {}
        }
    }
}
