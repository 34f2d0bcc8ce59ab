//! Postgres tank store on `sqlx`.
//!
//! Row locks are `SELECT ... FOR UPDATE` inside a `sqlx::Transaction`; a
//! transaction that is dropped without commit is rolled back by `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{check_level, StoreResult, TankStore, TankTransaction};
use crate::error::StoreError;
use crate::models::{Alert, AlertType, SensorReading, Tank, TankId};

// ---

const TANK_COLUMNS: &str =
    "tank_id, location, capacity, current_level, min_threshold, max_threshold";

/// Upper bound on how long a cycle waits for a competing row lock.
const LOCK_TIMEOUT_MS: u32 = 5000;

#[derive(Debug, Clone)]
pub struct PgTankStore {
    pool: PgPool,
}

impl PgTankStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    // ---
    id: i64,
    tank_id: TankId,
    alert_type: String,
    message: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        // ---
        let alert_type = AlertType::parse(&row.alert_type).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown alert_type '{}'", row.alert_type))
        })?;
        Ok(Alert {
            id: row.id,
            tank_id: row.tank_id,
            alert_type,
            message: row.message,
            timestamp: row.timestamp,
        })
    }
}

#[async_trait]
impl TankStore for PgTankStore {
    // ---
    async fn get(&self, tank_id: TankId) -> StoreResult<Tank> {
        // ---
        let sql = format!("SELECT {TANK_COLUMNS} FROM tanks WHERE tank_id = $1");
        sqlx::query_as::<_, Tank>(&sql)
            .bind(tank_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(tank_id))
    }

    async fn lock_and_get(
        &self,
        tank_id: TankId,
    ) -> StoreResult<(Box<dyn TankTransaction>, Tank)> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("SET LOCAL lock_timeout = '{LOCK_TIMEOUT_MS}ms'"))
            .execute(&mut *tx)
            .await?;

        let sql = format!("SELECT {TANK_COLUMNS} FROM tanks WHERE tank_id = $1 FOR UPDATE");
        let tank = sqlx::query_as::<_, Tank>(&sql)
            .bind(tank_id)
            .fetch_optional(&mut *tx)
            .await?;

        match tank {
            Some(tank) => Ok((Box::new(PgTransaction { tx }), tank)),
            None => {
                tx.rollback().await?;
                Err(StoreError::NotFound(tank_id))
            }
        }
    }

    async fn list_all(&self) -> StoreResult<Vec<Tank>> {
        // ---
        let sql = format!("SELECT {TANK_COLUMNS} FROM tanks ORDER BY location, tank_id");
        Ok(sqlx::query_as::<_, Tank>(&sql).fetch_all(&self.pool).await?)
    }

    async fn recent_readings(
        &self,
        tank_id: TankId,
        limit: u32,
    ) -> StoreResult<Vec<SensorReading>> {
        // ---
        Ok(sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT id, tank_id, water_level, timestamp
            FROM sensor_readings
            WHERE tank_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(tank_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn recent_alerts(&self, tank_id: TankId, limit: u32) -> StoreResult<Vec<Alert>> {
        // ---
        sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, tank_id, alert_type, message, timestamp
            FROM alerts
            WHERE tank_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(tank_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Alert::try_from)
        .collect()
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TankTransaction for PgTransaction {
    // ---
    async fn save(&mut self, tank: &Tank) -> StoreResult<()> {
        // ---
        check_level(tank)?;

        let result = sqlx::query(
            r#"
            UPDATE tanks
            SET location = $2, capacity = $3, current_level = $4,
                min_threshold = $5, max_threshold = $6
            WHERE tank_id = $1
            "#,
        )
        .bind(tank.tank_id)
        .bind(&tank.location)
        .bind(tank.capacity)
        .bind(tank.current_level)
        .bind(tank.min_threshold)
        .bind(tank.max_threshold)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(tank.tank_id));
        }
        Ok(())
    }

    async fn append_reading(&mut self, tank_id: TankId, level: f64) -> StoreResult<SensorReading> {
        // ---
        Ok(sqlx::query_as::<_, SensorReading>(
            r#"
            INSERT INTO sensor_readings (tank_id, water_level)
            VALUES ($1, $2)
            RETURNING id, tank_id, water_level, timestamp
            "#,
        )
        .bind(tank_id)
        .bind(level)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn append_alert(
        &mut self,
        tank_id: TankId,
        alert_type: AlertType,
        message: &str,
    ) -> StoreResult<Alert> {
        // ---
        sqlx::query_as::<_, AlertRow>(
            r#"
            INSERT INTO alerts (tank_id, alert_type, message)
            VALUES ($1, $2, $3)
            RETURNING id, tank_id, alert_type, message, timestamp
            "#,
        )
        .bind(tank_id)
        .bind(alert_type.as_str())
        .bind(message)
        .fetch_one(&mut *self.tx)
        .await?
        .try_into()
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.rollback().await?)
    }
}
