//! Database schema management for `diptank-monitor`.
//!
//! Ensures required tables and indexes exist before the controller starts.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `tanks`, the append-only `sensor_readings` history, and the
/// append-only `alerts` log. Safe to call on every startup; no-op if objects
/// already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tanks (
            tank_id        SERIAL PRIMARY KEY,
            location       TEXT             NOT NULL,
            capacity       DOUBLE PRECISION NOT NULL CHECK (capacity > 0),
            current_level  DOUBLE PRECISION NOT NULL DEFAULT 0,
            min_threshold  DOUBLE PRECISION NOT NULL,
            max_threshold  DOUBLE PRECISION NOT NULL,
            CHECK (current_level >= 0 AND current_level <= capacity),
            CHECK (min_threshold >= 0 AND max_threshold <= 100 AND min_threshold < max_threshold)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id           BIGSERIAL PRIMARY KEY,
            tank_id      INTEGER          NOT NULL REFERENCES tanks (tank_id) ON DELETE CASCADE,
            water_level  DOUBLE PRECISION NOT NULL,
            timestamp    TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id          BIGSERIAL PRIMARY KEY,
            tank_id     INTEGER     NOT NULL REFERENCES tanks (tank_id) ON DELETE CASCADE,
            alert_type  TEXT        NOT NULL CHECK (alert_type IN ('low_water', 'high_water')),
            message     TEXT        NOT NULL,
            timestamp   TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // History is always read per tank, newest first
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_tank_id
            ON sensor_readings (tank_id, id DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alerts_tank_id
            ON alerts (tank_id, id DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
