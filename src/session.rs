//! Process-wide monitoring session state.
//!
//! Holds the selected tank and the pump state machine. Readers (telemetry,
//! HTTP handlers) take a shared lock; the only writers are the controller's
//! selection and start/stop paths, so the write methods are crate-private.
//!
//! ```text
//!            begin_pump                 begin_stop
//!   Idle ───────────────────► Running ─────────────► Stopping
//!    ▲                          │                       │
//!    │   finish_from_loop       │                       │ finish_stop
//!    └──────────────────────────┴───────────────────────┘
//! ```
//!
//! Every transition carries the generation handed out by `begin_pump`, so a
//! loop that outlived its session can never flip the state of a newer one.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use uuid::Uuid;

use crate::models::TankId;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PumpState {
    Idle,
    Running,
    /// A stop was requested and the in-flight cycle is being drained.
    Stopping,
}

/// Point-in-time copy of the session for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    // ---
    pub session_id: Uuid,
    pub selected_tank: Option<TankId>,
    pub pump: PumpState,
    pub pump_running: bool,
    /// Tank the pump loop is (or was last) filling.
    pub pump_tank: Option<TankId>,
    /// Last failure that stopped the pump, cleared on the next start.
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    // ---
    selected: Option<TankId>,
    pump: PumpState,
    pump_tank: Option<TankId>,
    generation: u64,
    last_error: Option<String>,
}

#[derive(Debug)]
pub struct SessionState {
    id: Uuid,
    inner: RwLock<Inner>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    // ---
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            inner: RwLock::new(Inner {
                selected: None,
                pump: PumpState::Idle,
                pump_tank: None,
                generation: 0,
                last_error: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn current_selection(&self) -> Option<TankId> {
        self.read().selected
    }

    pub fn pump_state(&self) -> PumpState {
        self.read().pump
    }

    pub fn is_pump_running(&self) -> bool {
        self.read().pump == PumpState::Running
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        // ---
        let inner = self.read();
        SessionSnapshot {
            session_id: self.id,
            selected_tank: inner.selected,
            pump: inner.pump,
            pump_running: inner.pump == PumpState::Running,
            pump_tank: inner.pump_tank,
            last_error: inner.last_error.clone(),
        }
    }

    pub(crate) fn set_selection(&self, tank_id: Option<TankId>) {
        self.write().selected = tank_id;
    }

    /// Clear the selection only if it still points at `tank_id`.
    pub(crate) fn clear_selection_if(&self, tank_id: TankId) -> bool {
        // ---
        let mut inner = self.write();
        if inner.selected == Some(tank_id) {
            inner.selected = None;
            true
        } else {
            false
        }
    }

    /// `Idle -> Running`. Returns the generation owning this run.
    pub(crate) fn begin_pump(&self, tank_id: TankId) -> u64 {
        // ---
        let mut inner = self.write();
        inner.generation += 1;
        inner.pump = PumpState::Running;
        inner.pump_tank = Some(tank_id);
        inner.last_error = None;
        inner.generation
    }

    /// `Running -> Stopping` for an explicit stop.
    pub(crate) fn begin_stop(&self, generation: u64) -> bool {
        // ---
        let mut inner = self.write();
        if inner.generation == generation && inner.pump == PumpState::Running {
            inner.pump = PumpState::Stopping;
            true
        } else {
            false
        }
    }

    /// `Stopping -> Idle` once the loop has drained.
    pub(crate) fn finish_stop(&self, generation: u64) -> bool {
        self.settle(generation, PumpState::Stopping)
    }

    /// `Running -> Idle` decided by the loop itself. Loses against a
    /// concurrent explicit stop, which then owns the transition.
    pub(crate) fn finish_from_loop(&self, generation: u64) -> bool {
        self.settle(generation, PumpState::Running)
    }

    pub(crate) fn record_error(&self, message: String) {
        self.write().last_error = Some(message);
    }

    fn settle(&self, generation: u64, from: PumpState) -> bool {
        // ---
        let mut inner = self.write();
        if inner.generation == generation && inner.pump == from {
            inner.pump = PumpState::Idle;
            true
        } else {
            false
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
