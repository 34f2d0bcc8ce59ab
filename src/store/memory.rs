//! In-process tank store.
//!
//! Mirrors the Postgres semantics the controller depends on: readers see the
//! last committed row and never wait, writers serialize on a per-row async
//! mutex, and uncommitted writes disappear when a transaction is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use super::{check_level, StoreResult, TankStore, TankTransaction};
use crate::error::StoreError;
use crate::models::{Alert, AlertType, SensorReading, Tank, TankId};

// ---

#[derive(Default)]
struct Tables {
    // ---
    tanks: BTreeMap<TankId, Tank>,
    readings: Vec<SensorReading>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
struct Inner {
    // ---
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<TankId, Arc<tokio::sync::Mutex<()>>>>,
    next_tank_id: AtomicI64,
    next_reading_id: AtomicI64,
    next_alert_id: AtomicI64,
    unavailable: AtomicBool,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_locks(&self) -> MutexGuard<'_, HashMap<TankId, Arc<tokio::sync::Mutex<()>>>> {
        self.row_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Cloneable handle to a shared in-memory store.
#[derive(Clone, Default)]
pub struct MemoryTankStore {
    inner: Arc<Inner>,
}

impl MemoryTankStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a handful of tanks across two locations.
    pub fn demo() -> Self {
        // ---
        let store = Self::new();
        store.insert_tank("North Field", 10000.0, 1000.0, 20.0, 90.0);
        store.insert_tank("North Field", 5000.0, 3500.0, 25.0, 85.0);
        store.insert_tank("Pump House", 8000.0, 6000.0, 30.0, 95.0);
        store.insert_tank("South Paddock", 12000.0, 2000.0, 20.0, 90.0);
        store
    }

    /// Insert a new tank with the next free id.
    pub fn insert_tank(
        &self,
        location: &str,
        capacity: f64,
        current_level: f64,
        min_threshold: f64,
        max_threshold: f64,
    ) -> Tank {
        // ---
        let tank_id = (self.inner.next_tank_id.fetch_add(1, Ordering::SeqCst) + 1) as TankId;
        let tank = Tank {
            tank_id,
            location: location.to_string(),
            capacity,
            current_level,
            min_threshold,
            max_threshold,
        };
        self.inner.tables().tanks.insert(tank_id, tank.clone());
        tank
    }

    /// Overwrite a tank row outside of any transaction, the way an operator
    /// edit through an admin screen would.
    pub fn put_tank(&self, tank: Tank) {
        self.inner.tables().tanks.insert(tank.tank_id, tank);
    }

    /// Delete a tank. Open transactions on it fail to commit.
    pub fn remove_tank(&self, tank_id: TankId) -> Option<Tank> {
        // ---
        let removed = self.inner.tables().tanks.remove(&tank_id);
        self.inner.row_locks().remove(&tank_id);
        removed
    }

    /// Simulate losing the backing database.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Committed readings for a tank, oldest first.
    pub fn readings(&self, tank_id: TankId) -> Vec<SensorReading> {
        // ---
        self.inner
            .tables()
            .readings
            .iter()
            .filter(|r| r.tank_id == tank_id)
            .cloned()
            .collect()
    }

    /// Committed alerts for a tank, oldest first.
    pub fn alerts(&self, tank_id: TankId) -> Vec<Alert> {
        // ---
        self.inner
            .tables()
            .alerts
            .iter()
            .filter(|a| a.tank_id == tank_id)
            .cloned()
            .collect()
    }

    /// Row lock for an existing tank. Missing tanks get no entry.
    fn row_lock(&self, tank_id: TankId) -> StoreResult<Arc<tokio::sync::Mutex<()>>> {
        // ---
        if !self.inner.tables().tanks.contains_key(&tank_id) {
            return Err(StoreError::NotFound(tank_id));
        }
        Ok(self.inner.row_locks().entry(tank_id).or_default().clone())
    }
}

#[async_trait]
impl TankStore for MemoryTankStore {
    // ---
    async fn get(&self, tank_id: TankId) -> StoreResult<Tank> {
        // ---
        self.inner.ensure_available()?;
        self.inner
            .tables()
            .tanks
            .get(&tank_id)
            .cloned()
            .ok_or(StoreError::NotFound(tank_id))
    }

    async fn lock_and_get(
        &self,
        tank_id: TankId,
    ) -> StoreResult<(Box<dyn TankTransaction>, Tank)> {
        // ---
        self.inner.ensure_available()?;

        let guard = self.row_lock(tank_id)?.lock_owned().await;

        // Read only once the lock is held so the caller sees the latest commit.
        let tank = self
            .inner
            .tables()
            .tanks
            .get(&tank_id)
            .cloned()
            .ok_or(StoreError::NotFound(tank_id))?;

        let tx = MemoryTransaction {
            inner: self.inner.clone(),
            tank_id,
            pending_tank: None,
            readings: Vec::new(),
            alerts: Vec::new(),
            _row_lock: guard,
        };
        Ok((Box::new(tx), tank))
    }

    async fn list_all(&self) -> StoreResult<Vec<Tank>> {
        // ---
        self.inner.ensure_available()?;
        let mut tanks: Vec<Tank> = self.inner.tables().tanks.values().cloned().collect();
        tanks.sort_by(|a, b| {
            a.location
                .cmp(&b.location)
                .then_with(|| a.tank_id.cmp(&b.tank_id))
        });
        Ok(tanks)
    }

    async fn recent_readings(
        &self,
        tank_id: TankId,
        limit: u32,
    ) -> StoreResult<Vec<SensorReading>> {
        // ---
        self.inner.ensure_available()?;
        Ok(self
            .inner
            .tables()
            .readings
            .iter()
            .rev()
            .filter(|r| r.tank_id == tank_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn recent_alerts(&self, tank_id: TankId, limit: u32) -> StoreResult<Vec<Alert>> {
        // ---
        self.inner.ensure_available()?;
        Ok(self
            .inner
            .tables()
            .alerts
            .iter()
            .rev()
            .filter(|a| a.tank_id == tank_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

struct MemoryTransaction {
    // ---
    inner: Arc<Inner>,
    tank_id: TankId,
    pending_tank: Option<Tank>,
    readings: Vec<SensorReading>,
    alerts: Vec<Alert>,
    _row_lock: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    fn ensure_locked(&self, tank_id: TankId) -> StoreResult<()> {
        if tank_id == self.tank_id {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "transaction holds the lock for tank {}, not tank {}",
                self.tank_id, tank_id
            )))
        }
    }
}

#[async_trait]
impl TankTransaction for MemoryTransaction {
    // ---
    async fn save(&mut self, tank: &Tank) -> StoreResult<()> {
        // ---
        self.ensure_locked(tank.tank_id)?;
        check_level(tank)?;
        self.pending_tank = Some(tank.clone());
        Ok(())
    }

    async fn append_reading(&mut self, tank_id: TankId, level: f64) -> StoreResult<SensorReading> {
        // ---
        self.ensure_locked(tank_id)?;
        let reading = SensorReading {
            id: self.inner.next_reading_id.fetch_add(1, Ordering::SeqCst) + 1,
            tank_id,
            water_level: level,
            timestamp: Utc::now(),
        };
        self.readings.push(reading.clone());
        Ok(reading)
    }

    async fn append_alert(
        &mut self,
        tank_id: TankId,
        alert_type: AlertType,
        message: &str,
    ) -> StoreResult<Alert> {
        // ---
        self.ensure_locked(tank_id)?;
        let alert = Alert {
            id: self.inner.next_alert_id.fetch_add(1, Ordering::SeqCst) + 1,
            tank_id,
            alert_type,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        self.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        // ---
        self.inner.ensure_available()?;

        let this = *self;
        let mut tables = this.inner.tables();
        if !tables.tanks.contains_key(&this.tank_id) {
            return Err(StoreError::NotFound(this.tank_id));
        }
        if let Some(tank) = this.pending_tank {
            tables.tanks.insert(tank.tank_id, tank);
        }
        tables.readings.extend(this.readings);
        tables.alerts.extend(this.alerts);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        // ---
        let store = MemoryTankStore::new();
        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);

        let (mut tx, mut locked) = store.lock_and_get(tank.tank_id).await.unwrap();
        locked.current_level = 60.0;
        tx.save(&locked).await.unwrap();
        tx.append_reading(tank.tank_id, 60.0).await.unwrap();

        // Readers see the committed row while the lock is held
        assert_eq!(store.get(tank.tank_id).await.unwrap().current_level, 10.0);

        drop(tx);
        assert_eq!(store.get(tank.tank_id).await.unwrap().current_level, 10.0);
        assert!(store.readings(tank.tank_id).is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_all_writes() {
        // ---
        let store = MemoryTankStore::new();
        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);

        let (mut tx, mut locked) = store.lock_and_get(tank.tank_id).await.unwrap();
        locked.current_level = 15.0;
        tx.save(&locked).await.unwrap();
        tx.append_reading(tank.tank_id, 15.0).await.unwrap();
        tx.append_alert(tank.tank_id, AlertType::LowWater, "low")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get(tank.tank_id).await.unwrap().current_level, 15.0);
        assert_eq!(store.readings(tank.tank_id).len(), 1);
        assert_eq!(store.alerts(tank.tank_id)[0].alert_type, AlertType::LowWater);
    }

    #[tokio::test]
    async fn test_save_rejects_out_of_range_level() {
        // ---
        let store = MemoryTankStore::new();
        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);

        let (mut tx, mut locked) = store.lock_and_get(tank.tank_id).await.unwrap();
        locked.current_level = 100.5;
        let err = tx.save(&locked).await.unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_row_lock_serializes_writers() {
        // ---
        let store = MemoryTankStore::new();
        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);

        let (tx, _) = store.lock_and_get(tank.tank_id).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move { store.lock_and_get(tank.tank_id).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        tx.rollback().await.unwrap();
        tokio_test::assert_ok!(contender.await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_and_removed_tanks() {
        // ---
        let store = MemoryTankStore::new();
        assert_eq!(
            store.lock_and_get(42).await.map(|_| ()).unwrap_err(),
            StoreError::NotFound(42)
        );

        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);
        let (tx, _) = store.lock_and_get(tank.tank_id).await.unwrap();
        store.remove_tank(tank.tank_id);
        assert_eq!(
            tx.commit().await.unwrap_err(),
            StoreError::NotFound(tank.tank_id)
        );
    }

    #[tokio::test]
    async fn test_row_locks_only_exist_for_present_tanks() {
        // ---
        let store = MemoryTankStore::new();
        assert!(store.lock_and_get(7).await.is_err());
        assert!(store.inner.row_locks().is_empty());

        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);
        let (tx, _) = store.lock_and_get(tank.tank_id).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.inner.row_locks().len(), 1);

        store.remove_tank(tank.tank_id);
        assert!(store.inner.row_locks().is_empty());
        assert_eq!(
            store.lock_and_get(tank.tank_id).await.map(|_| ()).unwrap_err(),
            StoreError::NotFound(tank.tank_id)
        );
        assert!(store.inner.row_locks().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        // ---
        let store = MemoryTankStore::new();
        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);
        store.set_unavailable(true);

        assert!(matches!(
            store.get(tank.tank_id).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.list_all().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_list_all_orders_by_location_then_id() {
        // ---
        let store = MemoryTankStore::new();
        store.insert_tank("b-yard", 100.0, 10.0, 20.0, 90.0);
        store.insert_tank("a-yard", 100.0, 10.0, 20.0, 90.0);
        store.insert_tank("b-yard", 100.0, 10.0, 20.0, 90.0);

        let ids: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|t| (t.location.clone(), t.tank_id))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("a-yard".to_string(), 2),
                ("b-yard".to_string(), 1),
                ("b-yard".to_string(), 3)
            ]
        );
    }

    #[tokio::test]
    async fn test_recent_history_is_newest_first() {
        // ---
        let store = MemoryTankStore::new();
        let tank = store.insert_tank("Shed", 100.0, 10.0, 20.0, 90.0);

        for level in [11.0, 12.0, 13.0] {
            let (mut tx, _) = store.lock_and_get(tank.tank_id).await.unwrap();
            tx.append_reading(tank.tank_id, level).await.unwrap();
            tx.commit().await.unwrap();
        }

        let recent = store.recent_readings(tank.tank_id, 2).await.unwrap();
        let levels: Vec<_> = recent.iter().map(|r| r.water_level).collect();
        assert_eq!(levels, vec![13.0, 12.0]);
    }
}
