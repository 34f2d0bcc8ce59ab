//! End-to-end tests over the HTTP surface.
//!
//! Each test serves the router on an ephemeral port backed by the in-memory
//! store. The Postgres test at the bottom only runs when `DATABASE_URL` is set.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use diptank_monitor::routes::{self, AppState};
use diptank_monitor::store::{MemoryTankStore, PgTankStore, TankStore};
use diptank_monitor::{ControlConfig, EventBus, PumpController, StoreError, Telemetry};

struct TestApp {
    base: String,
    client: Client,
    controller: PumpController,
}

impl TestApp {
    // ---
    async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        let resp = self.client.get(format!("{}{}", self.base, path)).send().await?;
        Ok((resp.status(), resp.json().await?))
    }

    async fn post(&self, path: &str, body: Value) -> Result<(StatusCode, Value)> {
        // ---
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await?;
        Ok((resp.status(), resp.json().await?))
    }
}

/// Two tanks in one yard: tank 1 at 50%, tank 2 at 10%.
async fn spawn_app() -> Result<TestApp> {
    spawn_app_with_cycle(Duration::from_millis(10)).await
}

async fn spawn_app_with_cycle(cycle_interval: Duration) -> Result<TestApp> {
    // ---
    let store = MemoryTankStore::new();
    store.insert_tank("Yard", 1000.0, 500.0, 20.0, 90.0);
    store.insert_tank("Yard", 1000.0, 100.0, 20.0, 90.0);
    let store: Arc<dyn TankStore> = Arc::new(store);

    let config = ControlConfig {
        cycle_interval,
        flow_increment: 50.0,
    };
    let controller = PumpController::new(store.clone(), config, EventBus::new(64));
    let app = routes::router(AppState {
        controller: controller.clone(),
        telemetry: Telemetry::new(store),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Ok(TestApp {
        base: format!("http://{}", addr),
        client: Client::new(),
        controller,
    })
}

/// Poll `/session` until the pump reports idle.
async fn wait_for_idle(app: &TestApp) -> Result<()> {
    // ---
    for _ in 0..500 {
        let (_, session) = app.get("/session").await?;
        if session["pump_running"] == false {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("pump never stopped")
}

#[tokio::test]
async fn health_reports_session() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let (status, body) = app.get("/health").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pump_running"], false);
    assert_eq!(
        body["session_id"],
        app.controller.session().id().to_string()
    );
    Ok(())
}

#[tokio::test]
async fn tanks_are_listed_with_status() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let (status, body) = app.get("/tanks").await?;

    assert_eq!(status, StatusCode::OK);
    let tanks = body.as_array().expect("array of tanks");
    assert_eq!(tanks.len(), 2);
    assert_eq!(tanks[0]["tank_id"], 1);
    assert_eq!(tanks[0]["display_name"], "Tank 1 - Yard");
    assert_eq!(tanks[0]["status"], "Optimal");
    assert_eq!(tanks[1]["status"], "Low");

    let (status, body) = app.get("/tanks/2").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["percentage"], 10.0);
    Ok(())
}

#[tokio::test]
async fn unknown_tank_is_not_found() -> Result<()> {
    // ---
    let app = spawn_app().await?;

    let (status, body) = app.get("/tanks/99").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap_or_default().contains("99"));

    let (status, _) = app.post("/session/select", json!({ "tank_id": 99 })).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.controller.selection(), None);

    let (status, _) = app.get("/tanks/99/readings").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn selecting_nonexistent_id_stops_running_pump() -> Result<()> {
    // ---
    let app = spawn_app_with_cycle(Duration::from_secs(1)).await?;

    let (_, body) = app.post("/session/select", json!({ "tank_id": 2 })).await?;
    assert_eq!(body["pump"], "started");
    assert!(app.controller.is_pump_running());

    let (status, body) = app.post("/session/select", json!({ "tank_id": 0 })).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap_or_default().contains('0'));
    assert_eq!(app.controller.selection(), None);
    assert!(!app.controller.is_pump_running());

    let (_, session) = app.get("/session").await?;
    assert_eq!(session["selected_tank"], Value::Null);
    assert_eq!(session["pump"], "Idle");

    let (status, _) = app.post("/session/select", json!({ "tank_id": -3 })).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_rejected() -> Result<()> {
    // ---
    let app = spawn_app().await?;

    let (status, _) = app.get("/tanks/1/readings?limit=0").await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Simulation needs a selected tank
    let (status, _) = app.post("/simulate", json!({})).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.post("/pump/start", json!({})).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "no_selection");
    assert_eq!(body["pump_running"], false);
    Ok(())
}

#[tokio::test]
async fn manual_start_and_stop_are_idempotent() -> Result<()> {
    // ---
    // Slow cycles so the loop cannot reach max between requests
    let app = spawn_app_with_cycle(Duration::from_secs(1)).await?;

    let (status, body) = app.post("/session/select", json!({ "tank_id": 1 })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pump"], "unchanged");
    assert_eq!(body["tank"]["current_level"], 500.0);

    let (_, body) = app.post("/pump/start", json!({})).await?;
    assert_eq!(body["outcome"], "started");
    assert_eq!(body["pump_running"], true);

    let (_, body) = app.post("/pump/start", json!({})).await?;
    assert_eq!(body["outcome"], "already_running");

    let (_, body) = app.post("/pump/stop", json!({})).await?;
    assert_eq!(body["outcome"], "stopped");
    assert_eq!(body["pump_running"], false);

    let (_, body) = app.post("/pump/stop", json!({})).await?;
    assert_eq!(body["outcome"], "already_idle");

    let (_, tank) = app.get("/tanks/1").await?;
    let level = tank["current_level"].as_f64().unwrap_or_default();
    assert!((500.0..=600.0).contains(&level), "level {level}");
    Ok(())
}

#[tokio::test]
async fn low_tank_fills_to_max_and_stops() -> Result<()> {
    // ---
    let app = spawn_app().await?;

    let (_, body) = app.post("/session/select", json!({ "tank_id": 2 })).await?;
    assert_eq!(body["pump"], "started");

    wait_for_idle(&app).await?;

    let (_, tank) = app.get("/tanks/2").await?;
    assert_eq!(tank["current_level"], 900.0);
    assert_eq!(tank["percentage"], 90.0);

    // 100 -> 900 in steps of 50
    let (status, readings) = app.get("/tanks/2/readings?limit=500").await?;
    assert_eq!(status, StatusCode::OK);
    let readings = readings.as_array().expect("array of readings");
    assert_eq!(readings.len(), 16);
    assert_eq!(readings[0]["water_level"], 900.0);
    assert_eq!(readings[15]["water_level"], 150.0);

    let (_, limited) = app.get("/tanks/2/readings?limit=5").await?;
    assert_eq!(limited.as_array().map(Vec::len), Some(5));

    let (_, session) = app.get("/session").await?;
    assert_eq!(session["selected_tank"], 2);
    assert_eq!(session["pump"], "Idle");
    assert_eq!(session["last_error"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn simulation_updates_selected_tank() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    app.post("/session/select", json!({ "tank_id": 1 })).await?;

    let (status, body) = app.post("/simulate", json!({})).await?;
    assert_eq!(status, StatusCode::OK);

    // A 5% swing at most from 500 on a 1000 L tank
    let level = body["tank"]["current_level"].as_f64().unwrap_or_default();
    assert!((450.0..=550.0).contains(&level), "level {level}");
    assert_eq!(body["reading"]["water_level"], level);
    assert_eq!(body["status"], "Optimal");
    assert_eq!(body["alert"], Value::Null);

    let (_, readings) = app.get("/tanks/1/readings").await?;
    assert_eq!(readings[0]["water_level"], level);

    let (_, alerts) = app.get("/tanks/1/alerts").await?;
    assert_eq!(alerts.as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn rollups_and_dashboard() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    app.post("/session/select", json!({ "tank_id": 1 })).await?;

    let (status, global) = app.get("/rollup/global").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(global["tank_count"], 2);
    assert_eq!(global["total_capacity"], 2000.0);
    assert_eq!(global["status"], "Low");

    let (_, locations) = app.get("/rollup/locations").await?;
    assert_eq!(locations.as_array().map(Vec::len), Some(1));
    assert_eq!(locations[0]["location"], "Yard");
    assert_eq!(locations[0]["tank_count"], 2);

    let (_, dashboard) = app.get("/dashboard").await?;
    assert_eq!(dashboard["session"]["selected_tank"], 1);
    assert_eq!(dashboard["selected"]["tank_id"], 1);
    assert_eq!(dashboard["tanks"].as_array().map(Vec::len), Some(2));
    Ok(())
}

/// Exercises the Postgres backend against a real database.
///
/// Skipped unless `DATABASE_URL` points at a disposable database.
#[tokio::test]
async fn postgres_store_transactions() -> Result<()> {
    // ---
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return Ok(());
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&db_url)
        .await?;
    diptank_monitor::schema::create_schema(&pool).await?;

    let tank_id: i32 = sqlx::query_scalar(
        "INSERT INTO tanks (location, capacity, current_level, min_threshold, max_threshold) \
         VALUES ('Integration', 1000, 100, 20, 90) RETURNING tank_id",
    )
    .fetch_one(&pool)
    .await?;

    let store = PgTankStore::new(pool.clone());

    // Committed writes are visible
    let (mut tx, mut tank) = store.lock_and_get(tank_id).await?;
    tank.current_level = 150.0;
    tx.save(&tank).await?;
    tx.append_reading(tank_id, 150.0).await?;
    tx.commit().await?;
    assert_eq!(store.get(tank_id).await?.current_level, 150.0);
    assert_eq!(store.recent_readings(tank_id, 10).await?.len(), 1);

    // Rolled back writes are not
    let (mut tx, mut tank) = store.lock_and_get(tank_id).await?;
    tank.current_level = 600.0;
    tx.save(&tank).await?;
    tx.rollback().await?;
    assert_eq!(store.get(tank_id).await?.current_level, 150.0);

    // Out-of-range levels never reach the table
    let (mut tx, mut tank) = store.lock_and_get(tank_id).await?;
    tank.current_level = 1500.0;
    assert!(matches!(
        tx.save(&tank).await,
        Err(StoreError::InvariantViolation { .. })
    ));
    tx.rollback().await?;

    assert!(matches!(
        store.get(-1).await,
        Err(StoreError::NotFound(-1))
    ));

    sqlx::query("DELETE FROM tanks WHERE tank_id = $1")
        .bind(tank_id)
        .execute(&pool)
        .await?;
    Ok(())
}
