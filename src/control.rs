//! Pump controller.
//!
//! Owns the monitoring session and the single background pump loop. Every
//! change to a tank's level (a pump cycle or a simulated sensor reading) runs
//! as one store transaction that takes the tank's row lock *before* reading
//! `current_level`, so pump decisions are always made on the value that is
//! about to be written and concurrent writers cannot lose each other's
//! updates.
//!
//! Start, stop, and selection changes are serialized by the `task` mutex.
//! The pump loop never takes that mutex: it ends itself through
//! [`SessionState::finish_from_loop`], which is what lets an explicit stop
//! wait for the loop's in-flight cycle without deadlocking.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::ControlConfig;
use crate::error::{ControlError, StoreError};
use crate::events::{EventBus, MonitorEvent, PumpReason};
use crate::models::{Alert, AlertType, SensorReading, Tank, TankId};
use crate::session::SessionState;
use crate::store::{StoreResult, TankStore, TankTransaction};
use crate::threshold::{evaluate_tank, Evaluation, PumpAction, TankStatus};

// ---

/// Largest simulated sensor swing, as a fraction of capacity.
const SIMULATION_SWING: f64 = 0.05;

/// Result of a start, stop, or threshold check request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpOutcome {
    Started,
    Stopped,
    AlreadyRunning,
    AlreadyIdle,
    /// Nothing to control because no tank is selected.
    NoSelection,
    /// Thresholds did not call for a change.
    Unchanged,
}

/// Result of selecting a tank.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub tank: Tank,
    pub pump: PumpOutcome,
}

/// Result of one manual sensor reading.
#[derive(Debug, Clone, Serialize)]
pub struct SimulatedReading {
    // ---
    pub tank: Tank,
    pub reading: SensorReading,
    pub percentage: f64,
    pub status: TankStatus,
    pub alert: Option<Alert>,
}

/// How a pump cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Continue,
    Stop(PumpReason),
}

struct PumpTask {
    // ---
    generation: u64,
    tank_id: TankId,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    // ---
    store: Arc<dyn TankStore>,
    config: ControlConfig,
    session: SessionState,
    events: EventBus,
    task: Mutex<Option<PumpTask>>,
}

/// Cloneable handle to the controller.
#[derive(Clone)]
pub struct PumpController {
    shared: Arc<Shared>,
}

impl PumpController {
    // ---
    pub fn new(store: Arc<dyn TankStore>, config: ControlConfig, events: EventBus) -> Self {
        // ---
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                session: SessionState::new(),
                events,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.shared.session
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn store(&self) -> Arc<dyn TankStore> {
        self.shared.store.clone()
    }

    pub fn selection(&self) -> Option<TankId> {
        self.shared.session.current_selection()
    }

    pub fn is_pump_running(&self) -> bool {
        self.shared.session.is_pump_running()
    }

    /// Select a tank and immediately re-check its thresholds.
    ///
    /// Switching to a different tank stops any running pump first. An unknown
    /// tank clears the selection and fails with `NotFound`.
    pub async fn select_tank(&self, tank_id: TankId) -> Result<Selection, ControlError> {
        // ---
        let mut slot = self.shared.task.lock().await;
        let session = &self.shared.session;

        if session.current_selection() != Some(tank_id) {
            self.shared.halt(&mut slot, PumpReason::SelectionChanged).await;
        }

        let tank = match self.shared.store.get(tank_id).await {
            Ok(tank) => tank,
            Err(e) => {
                warn!(tank_id, error = %e, "tank selection rejected");
                session.set_selection(None);
                self.shared.halt(&mut slot, reason_for(&e)).await;
                return Err(e.into());
            }
        };

        session.set_selection(Some(tank_id));
        info!(tank_id, tank = %tank.display_name(), "tank selected");

        let pump = self.shared.check_thresholds(&mut slot).await?;
        Ok(Selection { tank, pump })
    }

    /// Start the pump for the selected tank. Idempotent.
    pub async fn start_pump(&self, manual: bool) -> Result<PumpOutcome, ControlError> {
        // ---
        let mut slot = self.shared.task.lock().await;

        let Some(tank_id) = self.shared.session.current_selection() else {
            warn!("pump start requested with no tank selected");
            return Ok(PumpOutcome::NoSelection);
        };
        if self.shared.session.is_pump_running() {
            debug!(tank_id, "pump already running");
            return Ok(PumpOutcome::AlreadyRunning);
        }

        let reason = if manual {
            PumpReason::Manual
        } else {
            PumpReason::Automatic
        };
        self.shared.spawn(&mut slot, tank_id, reason).await;
        Ok(PumpOutcome::Started)
    }

    /// Stop the pump. Returns once the loop has finished its in-flight
    /// cycle. Idempotent.
    pub async fn stop_pump(&self, manual: bool) -> Result<PumpOutcome, ControlError> {
        // ---
        let mut slot = self.shared.task.lock().await;

        if !self.shared.session.is_pump_running() {
            // Reap a loop that already ended on its own
            self.shared.halt(&mut slot, PumpReason::Manual).await;
            return Ok(PumpOutcome::AlreadyIdle);
        }

        let reason = if manual {
            PumpReason::Manual
        } else {
            PumpReason::Automatic
        };
        if self.shared.halt(&mut slot, reason).await {
            Ok(PumpOutcome::Stopped)
        } else {
            Ok(PumpOutcome::AlreadyIdle)
        }
    }

    /// Re-evaluate the selected tank against freshly stored state and start
    /// or stop the pump accordingly.
    pub async fn auto_check(&self) -> Result<PumpOutcome, ControlError> {
        // ---
        let mut slot = self.shared.task.lock().await;
        self.shared.check_thresholds(&mut slot).await
    }

    /// Apply one random sensor fluctuation to the selected tank.
    pub async fn simulate_reading(&self) -> Result<SimulatedReading, ControlError> {
        // ---
        let tank_id = self.selection().ok_or(ControlError::NoSelection)?;
        self.record_reading(tank_id, perturbation_factor()).await
    }

    /// End the monitoring session: stop the pump and clear the selection.
    pub async fn shutdown(&self) {
        // ---
        let mut slot = self.shared.task.lock().await;
        self.shared.halt(&mut slot, PumpReason::SessionEnded).await;
        self.shared.session.set_selection(None);
        info!(session_id = %self.shared.session.id(), "monitoring session ended");
    }

    async fn record_reading(
        &self,
        tank_id: TankId,
        factor: f64,
    ) -> Result<SimulatedReading, ControlError> {
        // ---
        let simulated = match self.shared.simulate_in_tx(tank_id, factor).await {
            Ok(simulated) => simulated,
            Err(e) => {
                error!(tank_id, error = %e, "sensor reading simulation failed");
                self.force_idle(tank_id, &e).await;
                return Err(e.into());
            }
        };

        info!(
            tank_id,
            level = simulated.tank.current_level,
            "Sensor reading simulated for Tank {}. Level: {:.2}L",
            tank_id,
            simulated.tank.current_level
        );
        self.shared
            .announce(&simulated.tank, &simulated.reading, simulated.alert.as_ref());

        if let Err(e) = self.auto_check().await {
            warn!(tank_id, error = %e, "threshold check after simulation failed");
        }
        Ok(simulated)
    }

    /// Stop the pump after a store failure outside the loop. A pump that
    /// is by now filling another tank is left alone.
    async fn force_idle(&self, tank_id: TankId, e: &StoreError) {
        // ---
        let mut slot = self.shared.task.lock().await;
        if matches!(e, StoreError::NotFound(_)) {
            self.shared.session.clear_selection_if(tank_id);
        }
        if let Some(task) = slot.as_ref().filter(|task| task.tank_id != tank_id) {
            debug!(
                tank_id,
                pump_tank = task.tank_id,
                "pump serves another tank, not stopping"
            );
            return;
        }
        self.shared.session.record_error(e.to_string());
        self.shared.halt(&mut slot, reason_for(e)).await;
    }
}

/// Spawn the periodic threshold re-check. It starts the pump when the
/// selected tank drops below its minimum while idle, e.g. after an edit
/// made outside this process.
pub fn spawn_auto_check(controller: PumpController, period: Duration) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match controller.auto_check().await {
                Ok(PumpOutcome::Started) | Ok(PumpOutcome::Stopped) => {
                    debug!("periodic threshold check changed pump state")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "periodic threshold check failed"),
            }
        }
    })
}

impl Shared {
    // ---
    async fn check_thresholds(
        self: &Arc<Self>,
        slot: &mut Option<PumpTask>,
    ) -> Result<PumpOutcome, ControlError> {
        // ---
        let Some(tank_id) = self.session.current_selection() else {
            return Ok(PumpOutcome::NoSelection);
        };

        let tank = match self.store.get(tank_id).await {
            Ok(tank) => tank,
            Err(e) => {
                warn!(tank_id, error = %e, "threshold check could not read tank");
                if matches!(e, StoreError::NotFound(_)) {
                    self.session.clear_selection_if(tank_id);
                }
                self.session.record_error(e.to_string());
                self.halt(slot, reason_for(&e)).await;
                return Err(e.into());
            }
        };

        let eval = evaluate_tank(&tank);
        let running = self.session.is_pump_running();
        debug!(
            tank_id,
            percentage = eval.percentage,
            action = ?eval.action,
            running,
            "threshold check"
        );

        match eval.action {
            PumpAction::StartPump if !running => {
                self.spawn(slot, tank_id, PumpReason::BelowMinimum).await;
                Ok(PumpOutcome::Started)
            }
            PumpAction::StopPump if running => {
                self.halt(slot, PumpReason::MaxThresholdReached).await;
                Ok(PumpOutcome::Stopped)
            }
            _ => Ok(PumpOutcome::Unchanged),
        }
    }

    /// `Idle -> Running`: launch a fresh loop for `tank_id`.
    async fn spawn(
        self: &Arc<Self>,
        slot: &mut Option<PumpTask>,
        tank_id: TankId,
        reason: PumpReason,
    ) {
        // ---
        // Never leave a previous loop behind
        self.halt(slot, reason).await;

        let generation = self.session.begin_pump(tank_id);
        // Announce before the loop can report its own stop
        self.events.pump_changed(tank_id, true, reason);

        let (cancel, cancel_rx) = watch::channel(false);
        let span = tracing::info_span!(
            "pump",
            session_id = %self.session.id(),
            tank_id,
            generation
        );
        let handle = tokio::spawn(
            self.clone()
                .run_pump(tank_id, generation, cancel_rx)
                .instrument(span),
        );

        *slot = Some(PumpTask {
            generation,
            tank_id,
            cancel,
            handle,
        });
    }

    /// Cancel the current loop, wait for its in-flight cycle, and move to
    /// `Idle`. Returns true when this call performed the transition.
    async fn halt(&self, slot: &mut Option<PumpTask>, reason: PumpReason) -> bool {
        // ---
        let Some(task) = slot.take() else {
            return false;
        };

        let stopping = self.session.begin_stop(task.generation);
        // The loop may already be gone, in which case nobody is listening
        let _ = task.cancel.send(true);
        if let Err(e) = task.handle.await {
            error!(tank_id = task.tank_id, error = %e, "pump loop ended abnormally");
        }

        if stopping && self.session.finish_stop(task.generation) {
            self.events.pump_changed(task.tank_id, false, reason);
            true
        } else {
            false
        }
    }

    async fn run_pump(
        self: Arc<Self>,
        tank_id: TankId,
        generation: u64,
        mut cancel: watch::Receiver<bool>,
    ) {
        // ---
        info!("Pump active for Tank {}", tank_id);

        loop {
            if *cancel.borrow() {
                debug!("stop requested before cycle");
                return;
            }

            match self.run_cycle(tank_id).await {
                Ok(CycleOutcome::Continue) => {}
                Ok(CycleOutcome::Stop(reason)) => {
                    if self.session.finish_from_loop(generation) {
                        self.events.pump_changed(tank_id, false, reason);
                    }
                    return;
                }
                Err(e) => {
                    // One failure ends this loop; a new start is needed
                    error!(error = %e, "control cycle failed, stopping pump");
                    if matches!(e, StoreError::NotFound(_)) {
                        self.session.clear_selection_if(tank_id);
                    }
                    self.session.record_error(e.to_string());
                    if self.session.finish_from_loop(generation) {
                        self.events.pump_changed(tank_id, false, reason_for(&e));
                    }
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
                _ = cancel.changed() => {
                    debug!("stop requested during pause");
                    return;
                }
            }
        }
    }

    /// One atomic control cycle against the locked tank row.
    async fn run_cycle(&self, tank_id: TankId) -> StoreResult<CycleOutcome> {
        // ---
        let (mut tx, mut tank) = self.store.lock_and_get(tank_id).await?;

        // Decide on the locked row, never on an earlier snapshot
        let before = evaluate_tank(&tank);
        if before.percentage >= tank.max_threshold {
            finish_tx(tx, Ok(())).await?;
            return Ok(CycleOutcome::Stop(PumpReason::MaxThresholdReached));
        }

        let written = self.pump_step(&mut tx, &mut tank).await;
        let (reading, alert, after) = finish_tx(tx, written).await?;

        debug!(
            level = tank.current_level,
            percentage = after.percentage,
            "pump cycle committed"
        );
        self.announce(&tank, &reading, alert.as_ref());

        if alert.is_some() {
            Ok(CycleOutcome::Stop(PumpReason::Overfilled))
        } else if after.action == PumpAction::StopPump {
            Ok(CycleOutcome::Stop(PumpReason::MaxThresholdReached))
        } else {
            Ok(CycleOutcome::Continue)
        }
    }

    async fn pump_step(
        &self,
        tx: &mut Box<dyn TankTransaction>,
        tank: &mut Tank,
    ) -> StoreResult<(SensorReading, Option<Alert>, Evaluation)> {
        // ---
        tank.current_level = tank.clamp_level(tank.current_level + self.config.flow_increment);
        tx.save(tank).await?;
        let reading = tx.append_reading(tank.tank_id, tank.current_level).await?;

        // Only reachable when one increment jumps over the maximum
        let after = evaluate_tank(tank);
        let alert = if after.percentage > tank.max_threshold {
            let message = format!("{} due to pump.", tank.high_water_message(after.percentage));
            warn!(tank_id = tank.tank_id, "{}", message);
            Some(
                tx.append_alert(tank.tank_id, AlertType::HighWater, &message)
                    .await?,
            )
        } else {
            None
        };

        Ok((reading, alert, after))
    }

    async fn simulate_in_tx(&self, tank_id: TankId, factor: f64) -> StoreResult<SimulatedReading> {
        // ---
        let (mut tx, mut tank) = self.store.lock_and_get(tank_id).await?;
        let written = simulation_step(&mut tx, &mut tank, factor).await;
        let (reading, alert, eval) = finish_tx(tx, written).await?;

        Ok(SimulatedReading {
            tank,
            reading,
            percentage: eval.percentage,
            status: eval.status,
            alert,
        })
    }

    /// Publish the effects of a committed transaction.
    fn announce(&self, tank: &Tank, reading: &SensorReading, alert: Option<&Alert>) {
        // ---
        self.events.publish(MonitorEvent::TankUpdated {
            tank_id: tank.tank_id,
            level: tank.current_level,
            percentage: evaluate_tank(tank).percentage,
            reading: reading.clone(),
        });
        if let Some(alert) = alert {
            self.events.publish(MonitorEvent::AlertRaised(alert.clone()));
        }
    }
}

async fn simulation_step(
    tx: &mut Box<dyn TankTransaction>,
    tank: &mut Tank,
    factor: f64,
) -> StoreResult<(SensorReading, Option<Alert>, Evaluation)> {
    // ---
    let fluctuation = factor.clamp(-SIMULATION_SWING, SIMULATION_SWING) * tank.capacity;
    tank.current_level = tank.clamp_level(tank.current_level + fluctuation);
    tx.save(tank).await?;
    let reading = tx.append_reading(tank.tank_id, tank.current_level).await?;

    let eval = evaluate_tank(tank);
    let alert = match eval.status {
        TankStatus::Low => Some((AlertType::LowWater, tank.low_water_message(eval.percentage))),
        TankStatus::High => Some((AlertType::HighWater, tank.high_water_message(eval.percentage))),
        TankStatus::Optimal => None,
    };
    let alert = match alert {
        Some((alert_type, message)) => {
            Some(tx.append_alert(tank.tank_id, alert_type, &message).await?)
        }
        None => None,
    };

    Ok((reading, alert, eval))
}

/// Commit on success, roll back on failure. The row lock is released on
/// both paths.
async fn finish_tx<T>(tx: Box<dyn TankTransaction>, written: StoreResult<T>) -> StoreResult<T> {
    // ---
    match written {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

fn reason_for(e: &StoreError) -> PumpReason {
    match e {
        StoreError::NotFound(_) => PumpReason::TankMissing,
        _ => PumpReason::StoreFailure,
    }
}

fn perturbation_factor() -> f64 {
    rand::thread_rng().gen_range(-SIMULATION_SWING..=SIMULATION_SWING)
}
