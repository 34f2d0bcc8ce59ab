//! Outbound monitor events.
//!
//! The controller publishes these on a `tokio::sync::broadcast` channel after
//! each committed mutation or pump transition. Consumers (the HTTP layer, the
//! event logger in `main.rs`, tests) refresh their views from them instead of
//! polling the store.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Alert, SensorReading, TankId};

// ---

/// Why the pump changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpReason {
    /// Operator pressed start or stop.
    Manual,
    /// Requested by automatic control rather than an operator.
    Automatic,
    /// The selected tank fell below its minimum threshold.
    BelowMinimum,
    /// A cycle found the tank at or above its maximum threshold.
    MaxThresholdReached,
    /// A cycle pushed the tank past its maximum threshold.
    Overfilled,
    TankMissing,
    StoreFailure,
    SelectionChanged,
    SessionEnded,
}

impl PumpReason {
    /// Operator-facing status line for the transition.
    pub fn status_message(&self, tank_id: TankId, running: bool) -> String {
        // ---
        match (self, running) {
            (PumpReason::Manual, true) => "Pump turned ON.".to_string(),
            (PumpReason::Manual, false) => "Pump turned OFF.".to_string(),
            (PumpReason::Automatic, true) => "Pump automatically turned ON.".to_string(),
            (PumpReason::Automatic, false) => {
                "Pump automatically turned OFF (Optimal Level).".to_string()
            }
            (PumpReason::BelowMinimum, _) => {
                "Pump automatically turned ON (Low Level).".to_string()
            }
            (PumpReason::MaxThresholdReached, _) => {
                format!("Pump auto-stopped for Tank {tank_id} (Max Threshold Reached).")
            }
            (PumpReason::Overfilled, _) => format!("Alert: Pump overfilled Tank {tank_id}!"),
            (PumpReason::TankMissing, _) => {
                "Selected tank not found during pump operation.".to_string()
            }
            (PumpReason::StoreFailure, _) => {
                "Could not update tank during pump operation.".to_string()
            }
            (PumpReason::SelectionChanged, _) => {
                "Pump stopped because a different tank was selected.".to_string()
            }
            (PumpReason::SessionEnded, _) => "Pump stopped, monitoring session ended.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A tank's level was committed.
    TankUpdated {
        tank_id: TankId,
        level: f64,
        percentage: f64,
        reading: SensorReading,
    },
    AlertRaised(Alert),
    PumpStateChanged {
        tank_id: TankId,
        running: bool,
        reason: PumpReason,
        message: String,
    },
}

/// Fan-out sender shared by every producer.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: MonitorEvent) {
        // ---
        if self.tx.send(event).is_err() {
            tracing::trace!("no event subscribers");
        }
    }

    pub fn pump_changed(&self, tank_id: TankId, running: bool, reason: PumpReason) {
        // ---
        let message = reason.status_message(tank_id, running);
        tracing::info!(tank_id, running, ?reason, "{}", message);
        self.publish(MonitorEvent::PumpStateChanged {
            tank_id,
            running,
            reason,
            message,
        });
    }
}
