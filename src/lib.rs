//! Diptank monitor: threshold-driven pump control and tank telemetry.
//!
//! Module map (EMBP: each module is a boundary, `main.rs` wires them):
//! - `threshold` – pure level classification and pump decision
//! - `store` – transactional tank store contract plus Postgres and in-memory backends
//! - `session` – selected tank and pump state machine
//! - `control` – the pump loop, manual simulation, and selection handling
//! - `telemetry` – per-tank, global, and per-location rollups
//! - `events` – broadcast of committed changes
//! - `routes` – thin HTTP surface over the above
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod models;
pub mod routes;
pub mod schema;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod threshold;

pub use config::{Config, ControlConfig};
pub use control::{PumpController, PumpOutcome};
pub use error::{ControlError, StoreError};
pub use events::{EventBus, MonitorEvent, PumpReason};
pub use models::{Alert, AlertType, SensorReading, Tank, TankId};
pub use telemetry::Telemetry;
