//! HTTP gateway for the diptank monitor.
//!
//! Each sibling module exports a subrouter over [`AppState`]; this gateway
//! merges them so `main.rs` only sees [`router`]. Handlers are thin: they
//! translate JSON to controller and telemetry calls and map
//! [`ControlError`] to status codes here, in one place.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde::Serialize;

use crate::control::PumpController;
use crate::error::ControlError;
use crate::telemetry::Telemetry;

mod health;
mod pump;
mod rollups;
mod tanks;

// ---

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub controller: PumpController,
    pub telemetry: Telemetry,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(tanks::router())
        .merge(pump::router())
        .merge(rollups::router())
        .merge(health::router())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        // ---
        let status = match &self {
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::NoSelection => StatusCode::CONFLICT,
            ControlError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ControlError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
