//! Error taxonomy for the tank store and the pump controller.

use std::fmt;

use crate::models::TankId;

// ---

/// Failures reported by a [`TankStore`](crate::store::TankStore).
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The referenced tank does not exist.
    NotFound(TankId),
    /// A transaction could not begin, run, or commit.
    Unavailable(String),
    /// A write would leave `current_level` outside `[0, capacity]`.
    InvariantViolation { tank_id: TankId, level: f64, capacity: f64 },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Tank {} not found", id),
            StoreError::Unavailable(e) => write!(f, "Tank store unavailable: {}", e),
            StoreError::InvariantViolation {
                tank_id,
                level,
                capacity,
            } => write!(
                f,
                "Refused to write level {:.2} to tank {} (capacity {:.2})",
                level, tank_id, capacity
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Failures surfaced by the pump controller and telemetry queries.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlError {
    NotFound(TankId),
    /// The operation needs a selected tank and none is selected.
    NoSelection,
    StoreUnavailable(String),
    InvariantViolation(String),
    /// Rejected input from an outer collaborator.
    Validation(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::NotFound(id) => write!(f, "Tank {} not found", id),
            ControlError::NoSelection => write!(f, "No tank selected"),
            ControlError::StoreUnavailable(e) => write!(f, "Tank store unavailable: {}", e),
            ControlError::InvariantViolation(e) => write!(f, "Invariant violation: {}", e),
            ControlError::Validation(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<StoreError> for ControlError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ControlError::NotFound(id),
            StoreError::Unavailable(msg) => ControlError::StoreUnavailable(msg),
            e @ StoreError::InvariantViolation { .. } => {
                ControlError::InvariantViolation(e.to_string())
            }
        }
    }
}
