use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::control::{PumpOutcome, Selection, SimulatedReading};
use crate::error::ControlError;
use crate::models::TankId;
use crate::session::SessionSnapshot;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/session", get(get_session))
        .route("/session/select", post(select_tank))
        .route("/pump/start", post(start_pump))
        .route("/pump/stop", post(stop_pump))
        .route("/simulate", post(simulate))
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    tank_id: TankId,
}

/// Response for pump start/stop requests
#[derive(Debug, Serialize)]
pub struct PumpResponse {
    outcome: PumpOutcome,
    pump_running: bool,
}

async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.controller.session().snapshot())
}

async fn select_tank(
    State(state): State<AppState>,
    Json(request): Json<SelectRequest>,
) -> Result<Json<Selection>, ControlError> {
    // ---
    // Unknown ids, zero and negatives included, go through the controller
    // so the selection is cleared and the pump stopped
    info!("POST /session/select - tank {}", request.tank_id);
    Ok(Json(state.controller.select_tank(request.tank_id).await?))
}

async fn start_pump(State(state): State<AppState>) -> Result<Json<PumpResponse>, ControlError> {
    // ---
    info!("POST /pump/start");
    let outcome = state.controller.start_pump(true).await?;
    Ok(Json(PumpResponse {
        outcome,
        pump_running: state.controller.is_pump_running(),
    }))
}

async fn stop_pump(State(state): State<AppState>) -> Result<Json<PumpResponse>, ControlError> {
    // ---
    info!("POST /pump/stop");
    let outcome = state.controller.stop_pump(true).await?;
    Ok(Json(PumpResponse {
        outcome,
        pump_running: state.controller.is_pump_running(),
    }))
}

async fn simulate(State(state): State<AppState>) -> Result<Json<SimulatedReading>, ControlError> {
    // ---
    info!("POST /simulate");
    Ok(Json(state.controller.simulate_reading().await?))
}
