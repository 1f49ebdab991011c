use crate::bus::{BusClient, RawTarget};
use crate::controller::VirtualController;
use crate::error::BusError;
use crate::report::{InputState, XusbReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-unique connection number, for logs and diagnostics only.
pub type SessionId = u64;

/// Diagnostics view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
    /// Messages applied to the controller.
    pub updates: u64,
    /// Malformed messages that were dropped.
    pub dropped: u64,
}

/// Hands out one virtual controller per connection and tracks live sessions.
pub struct SessionManager {
    bus: Arc<BusClient>,
    next_id: AtomicU64,
    live: Mutex<HashMap<SessionId, SessionSnapshot>>,
}

impl SessionManager {
    pub fn new(bus: Arc<BusClient>) -> Self {
        Self {
            bus,
            next_id: AtomicU64::new(0),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<BusClient> {
        &self.bus
    }

    /// Start a session for a newly opened connection. Fails, without
    /// retrying, when the bus refuses a new target.
    pub fn open(self: &Arc<Self>, peer: impl Into<String>) -> Result<Session, BusError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let peer = peer.into();

        let controller = VirtualController::create(self.bus.clone()).map_err(|e| {
            log::error!("[{}] Cannot attach a controller for {}: {}", id, peer, e);
            e
        })?;

        log::info!(
            "[{}] Connected ({}, target {})",
            id,
            peer,
            controller.target().as_raw()
        );
        self.lock_live().insert(
            id,
            SessionSnapshot {
                id,
                peer,
                connected_at: Utc::now(),
                updates: 0,
                dropped: 0,
            },
        );

        Ok(Session {
            id,
            controller: Some(controller),
            manager: self.clone(),
        })
    }

    /// Live sessions ordered by id.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self.lock_live().values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub fn active_count(&self) -> usize {
        self.lock_live().len()
    }

    fn record(&self, id: SessionId, f: impl FnOnce(&mut SessionSnapshot)) {
        if let Some(snapshot) = self.lock_live().get_mut(&id) {
            f(snapshot);
        }
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<SessionId, SessionSnapshot>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One connection's controller.
///
/// Messages must be fed in arrival order from a single task. Dropping a
/// session without [`Session::close`] still unplugs its controller.
pub struct Session {
    id: SessionId,
    controller: Option<VirtualController>,
    manager: Arc<SessionManager>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> Option<RawTarget> {
        self.controller.as_ref().map(VirtualController::target)
    }

    /// The report most recently pushed to the bus.
    pub fn report(&self) -> Option<&XusbReport> {
        self.controller.as_ref().map(VirtualController::report)
    }

    /// Decode and apply one client message.
    ///
    /// A malformed message is logged and dropped; only bus failures are
    /// returned, and those end the session.
    pub fn handle_message(&mut self, text: &str) -> Result<(), BusError> {
        match InputState::from_json(text) {
            Ok(state) => self.update(&state),
            Err(e) => {
                self.reject_message(&e.to_string());
                Ok(())
            }
        }
    }

    pub fn update(&mut self, state: &InputState) -> Result<(), BusError> {
        let controller = self
            .controller
            .as_mut()
            .ok_or(BusError::TargetNotPluggedIn)?;
        controller.update(state)?;
        self.manager.record(self.id, |s| s.updates += 1);
        Ok(())
    }

    /// Count a message that could not be decoded.
    pub fn reject_message(&self, reason: &str) {
        log::warn!("[{}] Dropping malformed message: {}", self.id, reason);
        self.manager.record(self.id, |s| s.dropped += 1);
    }

    /// Unplug and free the controller. Call exactly once, when the
    /// connection closes.
    pub fn close(mut self) -> Result<(), BusError> {
        let result = match self.controller.take() {
            Some(controller) => controller.remove(),
            None => Ok(()),
        };
        match &result {
            Ok(()) => log::info!("[{}] Disconnected", self.id),
            Err(e) => log::error!("[{}] Disconnected, controller removal failed: {}", self.id, e),
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.controller.is_some() {
            log::warn!("[{}] Session dropped without close", self.id);
        }
        self.manager.lock_live().remove(&self.id);
    }
}
