use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::AppState;
use crate::error::ControlError;
use crate::models::{Alert, SensorReading, TankId};
use crate::telemetry::TankView;

// ---

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 500;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/tanks", get(list_tanks))
        .route("/tanks/{id}", get(get_tank))
        .route("/tanks/{id}/readings", get(get_readings))
        .route("/tanks/{id}/alerts", get(get_alerts))
}

/// Query parameters for history endpoints
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<u32>,
}

impl HistoryQuery {
    fn limit(&self) -> Result<u32, ControlError> {
        // ---
        match self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT) {
            n @ 1..=MAX_HISTORY_LIMIT => Ok(n),
            n => Err(ControlError::Validation(format!(
                "limit must be between 1 and {MAX_HISTORY_LIMIT}, got {n}"
            ))),
        }
    }
}

async fn list_tanks(State(state): State<AppState>) -> Json<Vec<TankView>> {
    // ---
    let views = state.telemetry.tank_views().await;
    debug!("GET /tanks - {} tanks", views.len());
    Json(views)
}

async fn get_tank(
    Path(tank_id): Path<TankId>,
    State(state): State<AppState>,
) -> Result<Json<TankView>, ControlError> {
    // ---
    Ok(Json(state.telemetry.tank_view(tank_id).await?))
}

async fn get_readings(
    Path(tank_id): Path<TankId>,
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<SensorReading>>, ControlError> {
    // ---
    let limit = params.limit()?;
    state.telemetry.tank_view(tank_id).await?;

    let readings = state
        .controller
        .store()
        .recent_readings(tank_id, limit)
        .await?;
    info!("GET /tanks/{}/readings - returning {}", tank_id, readings.len());
    Ok(Json(readings))
}

async fn get_alerts(
    Path(tank_id): Path<TankId>,
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Alert>>, ControlError> {
    // ---
    let limit = params.limit()?;
    state.telemetry.tank_view(tank_id).await?;

    let alerts = state
        .controller
        .store()
        .recent_alerts(tank_id, limit)
        .await?;
    info!("GET /tanks/{}/alerts - returning {}", tank_id, alerts.len());
    Ok(Json(alerts))
}
