//! Tank store gateway.
//!
//! Defines the transactional contract the controller relies on and exports
//! the two backends: Postgres via `sqlx` and an in-process store used for
//! dev mode and tests. Nothing outside this module touches a backend type
//! beyond constructing it.
//!
//! Every mutation of `current_level` goes through [`TankStore::lock_and_get`],
//! which returns the fresh row together with a [`TankTransaction`] that holds
//! the row lock until `commit`, `rollback`, or drop.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Alert, AlertType, SensorReading, Tank, TankId};

mod memory;
mod postgres;

pub use memory::MemoryTankStore;
pub use postgres::PgTankStore;

// ---

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access and transaction entry point.
#[async_trait]
pub trait TankStore: Send + Sync {
    /// Last committed state of a tank. Never waits on a row lock.
    async fn get(&self, tank_id: TankId) -> StoreResult<Tank>;

    /// Begin a transaction and take the exclusive row lock on `tank_id`.
    ///
    /// The returned tank is read after the lock is held.
    async fn lock_and_get(
        &self,
        tank_id: TankId,
    ) -> StoreResult<(Box<dyn TankTransaction>, Tank)>;

    /// All tanks ordered by `(location, tank_id)`.
    async fn list_all(&self) -> StoreResult<Vec<Tank>>;

    /// Newest readings first.
    async fn recent_readings(&self, tank_id: TankId, limit: u32)
        -> StoreResult<Vec<SensorReading>>;

    /// Newest alerts first.
    async fn recent_alerts(&self, tank_id: TankId, limit: u32) -> StoreResult<Vec<Alert>>;
}

/// An open transaction holding one tank's row lock.
///
/// Dropping without `commit` discards every write and releases the lock.
#[async_trait]
pub trait TankTransaction: Send {
    /// Persist the tank's attributes. Rejects out-of-range levels.
    async fn save(&mut self, tank: &Tank) -> StoreResult<()>;

    async fn append_reading(&mut self, tank_id: TankId, level: f64)
        -> StoreResult<SensorReading>;

    async fn append_alert(
        &mut self,
        tank_id: TankId,
        alert_type: AlertType,
        message: &str,
    ) -> StoreResult<Alert>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Refuse writes that would break `0 <= current_level <= capacity`.
pub(crate) fn check_level(tank: &Tank) -> StoreResult<()> {
    // ---
    if tank.accepts_level(tank.current_level) {
        Ok(())
    } else {
        Err(StoreError::InvariantViolation {
            tank_id: tank.tank_id,
            level: tank.current_level,
            capacity: tank.capacity,
        })
    }
}
