// src/routes/health.rs
//! API health check endpoint for the diptank monitor.
//!
//! This module defines the `/health` route used by container orchestrators
//! and CI pipelines to verify that the service is running. It is a sibling
//! module in the `routes` directory and follows the Explicit Module Boundary
//! Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use uuid::Uuid;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    session_id: Uuid,
    pump_running: bool,
}

/// Handle `GET /health`.
///
/// Reports liveness plus the in-memory pump flag. Does not touch the tank
/// store, so it stays green while the database is down.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // ---
    let session = state.controller.session();
    Json(HealthResponse {
        status: "ok",
        session_id: session.id(),
        pump_running: session.is_pump_running(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
