//! Configuration loader for the `diptank-monitor` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

/// Parse an optional typed variable with a default value.
macro_rules! parse_var {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Pump controller tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlConfig {
    // ---
    /// Pause between two control cycles.
    pub cycle_interval: Duration,

    /// Liters added to the tank by one control cycle.
    pub flow_increment: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(1000),
            flow_increment: 50.0,
        }
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string. `None` runs on the in-memory demo store.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP surface binds to.
    pub listen_addr: SocketAddr,

    pub control: ControlConfig,

    /// Period of the background threshold re-check, `None` when disabled.
    pub auto_check_interval: Option<Duration>,

    /// Buffered events per subscriber before slow consumers start lagging.
    pub event_capacity: usize,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `DATABASE_URL` – PostgreSQL connection string (unset: in-memory dev mode)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_ADDR` – HTTP bind address (default: 0.0.0.0:8080)
/// - `PUMP_CYCLE_INTERVAL_MS` – control cycle period (default: 1000)
/// - `PUMP_FLOW_INCREMENT` – liters per cycle (default: 50)
/// - `AUTO_CHECK_INTERVAL_MS` – threshold re-check period, 0 disables (default: 5000)
/// - `EVENT_CHANNEL_CAPACITY` – event buffer per subscriber (default: 64)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    load_with(|name| env::var(name).ok())
}

/// Same as [`load_from_env`] with an arbitrary variable source.
pub fn load_with<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let db_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
    let db_pool_max = parse_var!(lookup, "DB_POOL_MAX", u32, 5);
    let listen_addr = parse_var!(
        lookup,
        "LISTEN_ADDR",
        SocketAddr,
        SocketAddr::from(([0, 0, 0, 0], 8080))
    );
    let cycle_ms = parse_var!(lookup, "PUMP_CYCLE_INTERVAL_MS", u64, 1000);
    let flow_increment = parse_var!(lookup, "PUMP_FLOW_INCREMENT", f64, 50.0);
    let auto_check_ms = parse_var!(lookup, "AUTO_CHECK_INTERVAL_MS", u64, 5000);
    let event_capacity = parse_var!(lookup, "EVENT_CHANNEL_CAPACITY", usize, 64);

    if cycle_ms == 0 {
        bail!("PUMP_CYCLE_INTERVAL_MS must be greater than zero");
    }
    if !(flow_increment.is_finite() && flow_increment > 0.0) {
        bail!("PUMP_FLOW_INCREMENT must be a positive number, got {flow_increment}");
    }
    if event_capacity == 0 {
        bail!("EVENT_CHANNEL_CAPACITY must be greater than zero");
    }

    Ok(Config {
        db_url,
        db_pool_max,
        listen_addr,
        control: ControlConfig {
            cycle_interval: Duration::from_millis(cycle_ms),
            flow_increment,
        },
        auto_check_interval: (auto_check_ms > 0).then(|| Duration::from_millis(auto_check_ms)),
        event_capacity,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_db_url = match &self.db_url {
            Some(url) => mask_password(url),
            None => "<unset, in-memory dev mode>".to_string(),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL           : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX            : {}", self.db_pool_max);
        tracing::info!("  LISTEN_ADDR            : {}", self.listen_addr);
        tracing::info!(
            "  PUMP_CYCLE_INTERVAL_MS : {}",
            self.control.cycle_interval.as_millis()
        );
        tracing::info!("  PUMP_FLOW_INCREMENT    : {}", self.control.flow_increment);
        tracing::info!(
            "  AUTO_CHECK_INTERVAL_MS : {}",
            self.auto_check_interval.map_or(0, |d| d.as_millis())
        );
        tracing::info!("  EVENT_CHANNEL_CAPACITY : {}", self.event_capacity);
    }
}

/// Replace the password in `user:password@host` style URLs.
fn mask_password(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // A colon right after "scheme:/" is not a password separator
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}
