use axum::{extract::State, routing::get, Json, Router};

use super::AppState;
use crate::telemetry::{Dashboard, LocationRollup, Rollup};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/rollup/global", get(global))
        .route("/rollup/locations", get(locations))
        .route("/dashboard", get(dashboard))
}

async fn global(State(state): State<AppState>) -> Json<Rollup> {
    Json(state.telemetry.global_rollup().await)
}

async fn locations(State(state): State<AppState>) -> Json<Vec<LocationRollup>> {
    Json(state.telemetry.location_rollups().await)
}

async fn dashboard(State(state): State<AppState>) -> Json<Dashboard> {
    // ---
    let session = state.controller.session();
    Json(state.telemetry.dashboard(session).await)
}
