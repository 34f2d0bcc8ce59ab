//! Application entry point for the `diptank-monitor` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Connecting to PostgreSQL and creating the schema, or falling back to the
//!   in-memory demo store when `DATABASE_URL` is unset
//! - Starting the pump controller, the periodic threshold check, and the
//!   event logger
//! - Selecting the first tank, as the desktop monitor did on launch
//! - Serving the HTTP surface until Ctrl-C, then ending the session
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `DIPTANK_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `DIPTANK_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the controller tuning variables.
use std::{env, sync::Arc};

use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use diptank_monitor::control::spawn_auto_check;
use diptank_monitor::routes::{self, AppState};
use diptank_monitor::store::{MemoryTankStore, PgTankStore, TankStore};
use diptank_monitor::{config, schema, EventBus, MonitorEvent, PumpController, Telemetry};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    // Load .env first so the logging variables in it take effect
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store: Arc<dyn TankStore> = match &cfg.db_url {
        Some(db_url) => {
            tracing::info!("Attempting to connect to database");

            let pool = PgPoolOptions::new()
                .max_connections(cfg.db_pool_max)
                .connect(db_url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

            tracing::info!("Successfully connected to database");
            schema::create_schema(&pool).await?;
            Arc::new(PgTankStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory demo store");
            Arc::new(MemoryTankStore::demo())
        }
    };

    let events = EventBus::new(cfg.event_capacity);
    let controller = PumpController::new(store.clone(), cfg.control, events.clone());
    let telemetry = Telemetry::new(store.clone());

    tokio::spawn(log_events(events.clone(), telemetry.clone()));
    let auto_check = cfg
        .auto_check_interval
        .map(|period| spawn_auto_check(controller.clone(), period));

    select_first_tank(&controller, store.as_ref()).await;

    let app = routes::router(AppState {
        controller: controller.clone(),
        telemetry,
    });

    tracing::info!("Listening on {}", cfg.listen_addr);
    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = auto_check {
        handle.abort();
    }
    controller.shutdown().await;

    Ok(())
}

// ---

/// Select the first tank in `(location, tank_id)` order, if any.
async fn select_first_tank(controller: &PumpController, store: &dyn TankStore) {
    // ---
    match store.list_all().await {
        Ok(tanks) => match tanks.first() {
            Some(first) => {
                if let Err(e) = controller.select_tank(first.tank_id).await {
                    tracing::warn!("Initial tank selection failed: {}", e);
                }
            }
            None => tracing::info!("No tanks found in the store"),
        },
        Err(e) => tracing::error!("Database error loading tanks: {}", e),
    }
}

/// Consume monitor events and refresh the rollups after each one.
async fn log_events(events: EventBus, telemetry: Telemetry) {
    // ---
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(MonitorEvent::TankUpdated {
                tank_id,
                level,
                percentage,
                ..
            }) => {
                let global = telemetry.global_rollup().await;
                tracing::info!(
                    "Tank {} level {:.2}L ({:.0}%), overall {:.0}% {:?}",
                    tank_id,
                    level,
                    percentage,
                    global.overall_percentage,
                    global.status
                );
            }
            Ok(MonitorEvent::AlertRaised(alert)) => {
                tracing::warn!("[{}] {}", alert.alert_type, alert.message);
            }
            Ok(MonitorEvent::PumpStateChanged {
                tank_id, running, ..
            }) => {
                tracing::info!(
                    "Pump {} (Tank {})",
                    if running { "ON" } else { "OFF" },
                    tank_id
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event logger lagged, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `DIPTANK_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `DIPTANK_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("DIPTANK_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to DIPTANK_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("DIPTANK_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
