//! Read-only telemetry views over the tank store.
//!
//! Nothing here is cached: every call takes a fresh snapshot from the store.
//! Rollup failures are logged and degrade to empty results so that reporting
//! can never take the controller down with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::ControlError;
use crate::models::{Tank, TankId};
use crate::session::{SessionSnapshot, SessionState};
use crate::store::TankStore;
use crate::threshold::{evaluate_tank, TankStatus};

// ---

/// Rollups below this percentage are critical.
const CRITICAL_BELOW: f64 = 20.0;

/// Rollups below this percentage are low.
const LOW_BELOW: f64 = 50.0;

/// One tank with its computed fill state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TankView {
    // ---
    pub tank_id: TankId,
    pub display_name: String,
    pub location: String,
    pub capacity: f64,
    pub current_level: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub percentage: f64,
    pub status: TankStatus,
}

impl From<&Tank> for TankView {
    fn from(tank: &Tank) -> Self {
        // ---
        let eval = evaluate_tank(tank);
        TankView {
            tank_id: tank.tank_id,
            display_name: tank.display_name(),
            location: tank.location.clone(),
            capacity: tank.capacity,
            current_level: tank.current_level,
            min_threshold: tank.min_threshold,
            max_threshold: tank.max_threshold,
            percentage: eval.percentage,
            status: eval.status,
        }
    }
}

/// Coarse classification for aggregated volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RollupStatus {
    Critical,
    Low,
    Optimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollup {
    // ---
    pub tank_count: usize,
    pub total_current: f64,
    pub total_capacity: f64,
    pub overall_percentage: f64,
    pub status: RollupStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRollup {
    pub location: String,
    #[serde(flatten)]
    pub rollup: Rollup,
}

/// Everything a dashboard needs, from a single store snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    // ---
    pub session: SessionSnapshot,
    pub selected: Option<TankView>,
    pub tanks: Vec<TankView>,
    pub global: Rollup,
    pub locations: Vec<LocationRollup>,
}

/// Aggregate any set of tanks.
pub fn rollup<'a>(tanks: impl IntoIterator<Item = &'a Tank>) -> Rollup {
    // ---
    let (tank_count, total_current, total_capacity) = tanks
        .into_iter()
        .fold((0, 0.0, 0.0), |(n, current, capacity), t| {
            (n + 1, current + t.current_level, capacity + t.capacity)
        });

    let overall_percentage = if total_capacity > 0.0 {
        total_current / total_capacity * 100.0
    } else {
        0.0
    };

    let status = if overall_percentage < CRITICAL_BELOW {
        RollupStatus::Critical
    } else if overall_percentage < LOW_BELOW {
        RollupStatus::Low
    } else {
        RollupStatus::Optimal
    };

    Rollup {
        tank_count,
        total_current,
        total_capacity,
        overall_percentage,
        status,
    }
}

/// Rollups per exact location string, sorted by location.
pub fn location_rollups(tanks: &[Tank]) -> Vec<LocationRollup> {
    // ---
    let mut by_location: BTreeMap<&str, Vec<&Tank>> = BTreeMap::new();
    for tank in tanks {
        by_location.entry(tank.location.as_str()).or_default().push(tank);
    }

    by_location
        .into_iter()
        .map(|(location, tanks)| LocationRollup {
            location: location.to_string(),
            rollup: rollup(tanks),
        })
        .collect()
}

/// Stateless query facade over a store.
#[derive(Clone)]
pub struct Telemetry {
    store: Arc<dyn TankStore>,
}

impl Telemetry {
    // ---
    pub fn new(store: Arc<dyn TankStore>) -> Self {
        Self { store }
    }

    /// View of one tank. A missing tank is reported, not degraded.
    pub async fn tank_view(&self, tank_id: TankId) -> Result<TankView, ControlError> {
        // ---
        let tank = self.store.get(tank_id).await?;
        Ok(TankView::from(&tank))
    }

    pub async fn tank_views(&self) -> Vec<TankView> {
        self.snapshot().await.iter().map(TankView::from).collect()
    }

    pub async fn global_rollup(&self) -> Rollup {
        rollup(&self.snapshot().await)
    }

    pub async fn location_rollups(&self) -> Vec<LocationRollup> {
        location_rollups(&self.snapshot().await)
    }

    pub async fn dashboard(&self, session: &SessionState) -> Dashboard {
        // ---
        let session = session.snapshot();
        let tanks = self.snapshot().await;

        let selected = session
            .selected_tank
            .and_then(|id| tanks.iter().find(|t| t.tank_id == id))
            .map(TankView::from);

        Dashboard {
            session,
            selected,
            tanks: tanks.iter().map(TankView::from).collect(),
            global: rollup(&tanks),
            locations: location_rollups(&tanks),
        }
    }

    async fn snapshot(&self) -> Vec<Tank> {
        // ---
        match self.store.list_all().await {
            Ok(tanks) => tanks,
            Err(e) => {
                tracing::warn!(error = %e, "telemetry snapshot failed, reporting empty rollups");
                Vec::new()
            }
        }
    }
}
