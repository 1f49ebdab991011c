use crate::config::{BackendKind, BridgeConfig};
use crate::error::{BridgeError, BusError, ErrorCode};
use crate::report::XusbReport;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod simulated;
#[cfg(target_os = "linux")]
pub mod uinput;
pub mod vigem;

/// Opaque handle to one allocated bus target. Only the driver that produced
/// it knows what the value means (a native pointer, a slot key, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawTarget(usize);

impl RawTarget {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// The native virtual-controller bus primitives.
///
/// A driver value stands for an allocated (not yet connected) bus client.
/// Primitives return raw native codes; translation into [`BusError`] is
/// [`BusClient`]'s job. Implementations need not be thread-safe beyond `Send`:
/// the client serializes every call.
pub trait BusDriver: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn connect(&mut self) -> ErrorCode;
    fn disconnect(&mut self);

    fn target_alloc(&mut self) -> Option<RawTarget>;
    fn target_free(&mut self, target: RawTarget);

    fn target_add(&mut self, target: RawTarget) -> ErrorCode;
    fn target_remove(&mut self, target: RawTarget) -> ErrorCode;
    fn target_update(&mut self, target: RawTarget, report: &XusbReport) -> ErrorCode;
}

/// The process-wide bus connection.
///
/// Owns its driver outright, so a driver can be connected at most once.
/// Shared between sessions behind an `Arc`; every primitive runs under the
/// client's lock.
pub struct BusClient {
    driver: Mutex<Box<dyn BusDriver>>,
    name: &'static str,
}

impl BusClient {
    pub fn connect(mut driver: Box<dyn BusDriver>) -> Result<Self, BusError> {
        let name = driver.name();
        BusError::check(driver.connect())?;
        log::info!("Connected to {} bus", name);
        Ok(Self {
            driver: Mutex::new(driver),
            name,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn alloc_target(&self) -> Result<RawTarget, BusError> {
        self.lock_driver()
            .target_alloc()
            .ok_or(BusError::InvalidTarget)
    }

    pub fn add_target(&self, target: RawTarget) -> Result<(), BusError> {
        BusError::check(self.lock_driver().target_add(target))
    }

    pub fn remove_target(&self, target: RawTarget) -> Result<(), BusError> {
        BusError::check(self.lock_driver().target_remove(target))
    }

    pub fn update_target(&self, target: RawTarget, report: &XusbReport) -> Result<(), BusError> {
        BusError::check(self.lock_driver().target_update(target, report))
    }

    pub fn free_target(&self, target: RawTarget) {
        self.lock_driver().target_free(target);
    }

    // A poisoned lock only means another session panicked between primitives;
    // the driver itself is still consistent.
    fn lock_driver(&self) -> MutexGuard<'_, Box<dyn BusDriver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        driver.disconnect();
        log::info!("Disconnected from {} bus", self.name);
    }
}

/// Create the driver for the configured backend.
pub fn create_driver(config: &BridgeConfig) -> crate::error::Result<Box<dyn BusDriver>> {
    match config.backend.resolve() {
        BackendKind::Simulated => Ok(Box::new(simulated::SimulatedBus::new(config.max_targets))),
        #[cfg(target_os = "windows")]
        BackendKind::Vigem => Ok(Box::new(vigem::imp::ViGEmDriver::load(&config.vigem_library)?)),
        #[cfg(target_os = "linux")]
        BackendKind::Uinput => Ok(Box::new(uinput::UinputBus::new(config.max_targets))),
        other => Err(BridgeError::PlatformNotSupported(format!(
            "{:?} backend is not available on {}",
            other,
            std::env::consts::OS
        ))),
    }
}
