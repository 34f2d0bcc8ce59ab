//! Data models for tanks, sensor history, and alerts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Identifier of a tank row.
pub type TankId = i32;

/// A monitored storage tank.
///
/// `current_level` and `capacity` are in liters, thresholds are percentages
/// of capacity. Every committed row satisfies `0 <= current_level <= capacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tank {
    // ---
    pub tank_id: TankId,
    pub location: String,
    pub capacity: f64,
    pub current_level: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
}

/// One appended water level sample.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SensorReading {
    // ---
    pub id: i64,
    pub tank_id: TankId,
    pub water_level: f64,
    pub timestamp: DateTime<Utc>,
}

/// Kind of threshold breach an [`Alert`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowWater,
    HighWater,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowWater => "low_water",
            AlertType::HighWater => "high_water",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low_water" => Some(AlertType::LowWater),
            "high_water" => Some(AlertType::HighWater),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An appended threshold breach record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    // ---
    pub id: i64,
    pub tank_id: TankId,
    pub alert_type: AlertType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Tank {
    // ---
    /// Label shown to operators when picking a tank.
    pub fn display_name(&self) -> String {
        format!("Tank {} - {}", self.tank_id, self.location)
    }

    /// True when `level` may be written to this tank.
    pub fn accepts_level(&self, level: f64) -> bool {
        level.is_finite() && level >= 0.0 && level <= self.capacity
    }

    /// Clamp `level` into `[0, capacity]`.
    pub fn clamp_level(&self, level: f64) -> f64 {
        level.max(0.0).min(self.capacity.max(0.0))
    }

    pub fn low_water_message(&self, percentage: f64) -> String {
        format!(
            "Tank {} at {} is below minimum threshold ({:.0}%). Current: {:.0}%",
            self.tank_id, self.location, self.min_threshold, percentage
        )
    }

    pub fn high_water_message(&self, percentage: f64) -> String {
        format!(
            "Tank {} at {} is above maximum threshold ({:.0}%). Current: {:.0}%",
            self.tank_id, self.location, self.max_threshold, percentage
        )
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn tank() -> Tank {
        // ---
        Tank {
            tank_id: 7,
            location: "North Field".to_string(),
            capacity: 1000.0,
            current_level: 500.0,
            min_threshold: 20.0,
            max_threshold: 90.0,
        }
    }

    #[test]
    fn test_display_name() {
        // ---
        assert_eq!(tank().display_name(), "Tank 7 - North Field");
    }

    #[test]
    fn test_clamp_level() {
        // ---
        let t = tank();
        assert_eq!(t.clamp_level(-12.5), 0.0);
        assert_eq!(t.clamp_level(1050.0), 1000.0);
        assert_eq!(t.clamp_level(420.0), 420.0);
    }

    #[test]
    fn test_accepts_level() {
        // ---
        let t = tank();
        assert!(t.accepts_level(0.0));
        assert!(t.accepts_level(1000.0));
        assert!(!t.accepts_level(-0.01));
        assert!(!t.accepts_level(1000.01));
        assert!(!t.accepts_level(f64::NAN));
    }

    #[test]
    fn test_alert_messages() {
        // ---
        let t = tank();
        assert_eq!(
            t.low_water_message(12.4),
            "Tank 7 at North Field is below minimum threshold (20%). Current: 12%"
        );
        assert_eq!(
            t.high_water_message(95.0),
            "Tank 7 at North Field is above maximum threshold (90%). Current: 95%"
        );
    }

    #[test]
    fn test_alert_type_names() {
        // ---
        assert_eq!(AlertType::LowWater.as_str(), "low_water");
        assert_eq!(AlertType::parse("high_water"), Some(AlertType::HighWater));
        assert_eq!(AlertType::parse("flood"), None);
        assert_eq!(
            serde_json::to_string(&AlertType::HighWater).unwrap(),
            "\"high_water\""
        );
    }
}
