//! In-memory controller bus.
//!
//! Behaves like ViGEmBus as far as result codes go: a fixed number of slots,
//! targets must be added before they can be updated, removal requires an
//! attached target. Used for dry runs (`--backend simulated`) and tests.
//!
//! A [`SimulatedBusProbe`] shares the bus state so callers can inspect it
//! after the bus itself has been handed to a `BusClient`, and can inject
//! failures into the next primitive call.

use super::{BusDriver, RawTarget};
use crate::error::{BusError, ErrorCode, VIGEM_ERROR_NONE};
use crate::report::{XusbReport, XUSB_REPORT_SIZE};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Slot {
    attached: bool,
    /// Last report as it crossed the ABI boundary.
    wire: Option<[u8; XUSB_REPORT_SIZE]>,
    updates: u64,
}

#[derive(Debug, Default)]
struct Inner {
    connected: bool,
    max_targets: usize,
    next_id: usize,
    targets: HashMap<usize, Slot>,
    invalid_frees: usize,
    fail_connect: Option<ErrorCode>,
    fail_add: Option<ErrorCode>,
    fail_remove: Option<ErrorCode>,
    fail_update: Option<ErrorCode>,
}

impl Inner {
    fn attached(&self) -> usize {
        self.targets.values().filter(|slot| slot.attached).count()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SimulatedBus {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedBus {
    pub fn new(max_targets: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max_targets,
                next_id: 1,
                ..Default::default()
            })),
        }
    }

    pub fn probe(&self) -> SimulatedBusProbe {
        SimulatedBusProbe {
            inner: self.inner.clone(),
        }
    }
}

impl BusDriver for SimulatedBus {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn connect(&mut self) -> ErrorCode {
        let mut inner = lock(&self.inner);
        if let Some(code) = inner.fail_connect.take() {
            return code;
        }
        if inner.connected {
            return BusError::BusAlreadyConnected.code();
        }
        inner.connected = true;
        VIGEM_ERROR_NONE
    }

    fn disconnect(&mut self) {
        let mut inner = lock(&self.inner);
        inner.connected = false;
        for slot in inner.targets.values_mut() {
            slot.attached = false;
        }
    }

    fn target_alloc(&mut self) -> Option<RawTarget> {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.targets.insert(id, Slot::default());
        Some(RawTarget::from_raw(id))
    }

    fn target_free(&mut self, target: RawTarget) {
        let mut inner = lock(&self.inner);
        if inner.targets.remove(&target.as_raw()).is_none() {
            log::warn!("simulated bus: free of unknown target {}", target.as_raw());
            inner.invalid_frees += 1;
        }
    }

    fn target_add(&mut self, target: RawTarget) -> ErrorCode {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return BusError::BusInvalidHandle.code();
        }
        if let Some(code) = inner.fail_add.take() {
            return code;
        }
        let attached = inner.attached();
        let max_targets = inner.max_targets;
        let Some(slot) = inner.targets.get_mut(&target.as_raw()) else {
            return BusError::InvalidTarget.code();
        };
        if slot.attached {
            return BusError::AlreadyConnected.code();
        }
        if attached >= max_targets {
            return BusError::NoFreeSlot.code();
        }
        slot.attached = true;
        log::debug!("simulated bus: target {} attached", target.as_raw());
        VIGEM_ERROR_NONE
    }

    fn target_remove(&mut self, target: RawTarget) -> ErrorCode {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return BusError::BusInvalidHandle.code();
        }
        let injected = inner.fail_remove.take();
        let Some(slot) = inner.targets.get_mut(&target.as_raw()) else {
            return BusError::InvalidTarget.code();
        };
        if !slot.attached {
            return BusError::TargetNotPluggedIn.code();
        }
        // An injected failure still detaches, like a driver that unplugged
        // the device but reported an error afterwards.
        slot.attached = false;
        log::debug!("simulated bus: target {} removed", target.as_raw());
        injected.unwrap_or(VIGEM_ERROR_NONE)
    }

    fn target_update(&mut self, target: RawTarget, report: &XusbReport) -> ErrorCode {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return BusError::BusInvalidHandle.code();
        }
        if let Some(code) = inner.fail_update.take() {
            return code;
        }
        let Some(slot) = inner.targets.get_mut(&target.as_raw()) else {
            return BusError::TargetUninitialized.code();
        };
        if !slot.attached {
            return BusError::TargetNotPluggedIn.code();
        }
        slot.wire = Some(report.to_bytes());
        slot.updates += 1;
        log::trace!("simulated bus: target {} <- {:?}", target.as_raw(), report);
        VIGEM_ERROR_NONE
    }
}

/// Shared view into a [`SimulatedBus`].
#[derive(Clone)]
pub struct SimulatedBusProbe {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedBusProbe {
    pub fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    /// Targets currently plugged into the bus.
    pub fn attached_count(&self) -> usize {
        lock(&self.inner).attached()
    }

    /// Targets allocated and not yet freed, attached or not.
    pub fn allocated_count(&self) -> usize {
        lock(&self.inner).targets.len()
    }

    /// Frees of targets that were never allocated or already freed.
    pub fn invalid_frees(&self) -> usize {
        lock(&self.inner).invalid_frees
    }

    pub fn attached_targets(&self) -> Vec<RawTarget> {
        let inner = lock(&self.inner);
        let mut targets: Vec<RawTarget> = inner
            .targets
            .iter()
            .filter(|(_, slot)| slot.attached)
            .map(|(id, _)| RawTarget::from_raw(*id))
            .collect();
        targets.sort_by_key(|target| target.as_raw());
        targets
    }

    pub fn last_report(&self, target: RawTarget) -> Option<XusbReport> {
        let inner = lock(&self.inner);
        let wire = inner.targets.get(&target.as_raw())?.wire?;
        Some(XusbReport::from_bytes(&wire))
    }

    pub fn update_count(&self, target: RawTarget) -> u64 {
        lock(&self.inner)
            .targets
            .get(&target.as_raw())
            .map_or(0, |slot| slot.updates)
    }

    pub fn fail_connect(&self, code: ErrorCode) {
        lock(&self.inner).fail_connect = Some(code);
    }

    pub fn fail_next_add(&self, code: ErrorCode) {
        lock(&self.inner).fail_add = Some(code);
    }

    pub fn fail_next_remove(&self, code: ErrorCode) {
        lock(&self.inner).fail_remove = Some(code);
    }

    pub fn fail_next_update(&self, code: ErrorCode) {
        lock(&self.inner).fail_update = Some(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_cross_the_wire_intact() {
        let mut bus = SimulatedBus::new(4);
        let probe = bus.probe();
        assert_eq!(bus.connect(), VIGEM_ERROR_NONE);

        let target = bus.target_alloc().unwrap();
        assert_eq!(bus.target_add(target), VIGEM_ERROR_NONE);
        let report = XusbReport {
            buttons: 0x1001,
            left_trigger: 127,
            thumb_ry: -32767,
            ..Default::default()
        };
        assert_eq!(bus.target_update(target, &report), VIGEM_ERROR_NONE);
        assert_eq!(probe.last_report(target), Some(report));
        assert_eq!(probe.update_count(target), 1);
    }

    #[test]
    fn injected_failures_fire_once() {
        let mut bus = SimulatedBus::new(4);
        let probe = bus.probe();
        bus.connect();
        let target = bus.target_alloc().unwrap();

        probe.fail_next_add(BusError::BusVersionMismatch.code());
        assert_eq!(bus.target_add(target), BusError::BusVersionMismatch.code());
        assert_eq!(bus.target_add(target), VIGEM_ERROR_NONE);

        probe.fail_next_remove(BusError::RemovalFailed.code());
        assert_eq!(bus.target_remove(target), BusError::RemovalFailed.code());
        assert_eq!(probe.attached_count(), 0);
    }

    #[test]
    fn double_free_is_counted() {
        let mut bus = SimulatedBus::new(4);
        let probe = bus.probe();
        bus.connect();
        let target = bus.target_alloc().unwrap();
        bus.target_free(target);
        bus.target_free(target);
        assert_eq!(probe.invalid_frees(), 1);
        assert_eq!(probe.allocated_count(), 0);
    }

    #[test]
    fn disconnected_bus_rejects_targets() {
        let mut bus = SimulatedBus::new(4);
        let target = bus.target_alloc().unwrap();
        assert_eq!(bus.target_add(target), BusError::BusInvalidHandle.code());
        assert_eq!(
            bus.target_update(target, &XusbReport::default()),
            BusError::BusInvalidHandle.code()
        );
    }
}
