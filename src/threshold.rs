//! Threshold evaluation for a single tank.
//!
//! Pure functions only: the controller and the telemetry views both call in
//! here so that pump decisions and displayed status never disagree.

use serde::Serialize;

use crate::models::Tank;

// ---

/// Level classification against a tank's own min/max thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TankStatus {
    Low,
    Optimal,
    High,
}

/// What automatic control wants the pump to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpAction {
    StartPump,
    StopPump,
    /// Keep whatever state the pump is in.
    NoChange,
}

/// Result of evaluating one tank snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub percentage: f64,
    pub status: TankStatus,
    pub action: PumpAction,
}

/// Fill percentage, `0` when capacity is not positive.
pub fn percentage(current_level: f64, capacity: f64) -> f64 {
    // ---
    if capacity > 0.0 {
        current_level / capacity * 100.0
    } else {
        0.0
    }
}

pub fn evaluate(
    current_level: f64,
    capacity: f64,
    min_threshold: f64,
    max_threshold: f64,
) -> Evaluation {
    // ---
    let percentage = percentage(current_level, capacity);

    let status = if percentage < min_threshold {
        TankStatus::Low
    } else if percentage > max_threshold {
        TankStatus::High
    } else {
        TankStatus::Optimal
    };

    // StopPump uses >= so a tank sitting exactly on max is not topped up.
    let action = if percentage < min_threshold {
        PumpAction::StartPump
    } else if percentage >= max_threshold {
        PumpAction::StopPump
    } else {
        PumpAction::NoChange
    };

    Evaluation {
        percentage,
        status,
        action,
    }
}

/// Evaluate a tank at its current level.
pub fn evaluate_tank(tank: &Tank) -> Evaluation {
    evaluate_level(tank, tank.current_level)
}

/// Evaluate a tank as if it held `level`.
pub fn evaluate_level(tank: &Tank, level: f64) -> Evaluation {
    evaluate(level, tank.capacity, tank.min_threshold, tank.max_threshold)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_low_tank_requests_pump() {
        // ---
        let eval = evaluate(1000.0, 10000.0, 20.0, 90.0);
        assert_eq!(eval.percentage, 10.0);
        assert_eq!(eval.status, TankStatus::Low);
        assert_eq!(eval.action, PumpAction::StartPump);
    }

    #[test]
    fn test_optimal_tank_holds_pump() {
        // ---
        let eval = evaluate(5000.0, 10000.0, 20.0, 90.0);
        assert_eq!(eval.status, TankStatus::Optimal);
        assert_eq!(eval.action, PumpAction::NoChange);
    }

    #[test]
    fn test_boundaries() {
        // ---
        // Exactly on min: not low, no start
        let at_min = evaluate(2000.0, 10000.0, 20.0, 90.0);
        assert_eq!(at_min.status, TankStatus::Optimal);
        assert_eq!(at_min.action, PumpAction::NoChange);

        // Exactly on max: still optimal, but the pump must stop
        let at_max = evaluate(9000.0, 10000.0, 20.0, 90.0);
        assert_eq!(at_max.status, TankStatus::Optimal);
        assert_eq!(at_max.action, PumpAction::StopPump);

        let above = evaluate(9500.0, 10000.0, 20.0, 90.0);
        assert_eq!(above.status, TankStatus::High);
        assert_eq!(above.action, PumpAction::StopPump);
    }

    #[test]
    fn test_zero_capacity_degrades_to_zero_percent() {
        // ---
        let eval = evaluate(50.0, 0.0, 20.0, 90.0);
        assert_eq!(eval.percentage, 0.0);
        assert_eq!(eval.status, TankStatus::Low);

        assert_eq!(percentage(10.0, -5.0), 0.0);
    }

    #[test]
    fn test_status_is_exclusive_over_grid() {
        // ---
        let capacity = 2000.0;
        for (min, max) in [(0.0, 100.0), (20.0, 90.0), (49.0, 51.0), (10.0, 10.5)] {
            let mut level = 0.0;
            while level <= capacity {
                let eval = evaluate(level, capacity, min, max);
                let low = eval.percentage < min;
                let high = eval.percentage > max;
                assert!(!(low && high), "low and high at {level} ({min}, {max})");
                match eval.status {
                    TankStatus::Low => assert!(low),
                    TankStatus::High => assert!(high),
                    TankStatus::Optimal => assert!(!low && !high),
                }
                level += 12.5;
            }
        }
    }
}
