use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use artbot_core::net::messages::{Severity, SystemAlertMsg};
use artbot_core::robot::Robot;

/// Health thresholds that raise a `system_alert`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Battery percentage strictly below which the robot is critical.
    pub battery_critical: u8,
    /// Degrees Celsius strictly above which the robot is running hot.
    pub temperature_high: f64,
    pub cpu_high: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            battery_critical: 15,
            temperature_high: 70.0,
            cpu_high: 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Condition {
    LowBattery,
    HighTemperature,
    HighCpu,
}

impl Condition {
    const ALL: [Condition; 3] = [Self::LowBattery, Self::HighTemperature, Self::HighCpu];

    fn alert_type(self) -> &'static str {
        match self {
            Self::LowBattery => "low_battery",
            Self::HighTemperature => "high_temperature",
            Self::HighCpu => "high_cpu",
        }
    }

    fn severity(self) -> Severity {
        match self {
            Self::LowBattery => Severity::Critical,
            Self::HighTemperature | Self::HighCpu => Severity::Warning,
        }
    }

    /// `Some(message)` while the condition holds, `None` when it does not
    /// (or the metric has never been reported).
    fn check(self, robot: &Robot, limits: &AlertThresholds) -> Option<String> {
        match self {
            Self::LowBattery => robot
                .battery_level
                .filter(|b| *b < limits.battery_critical)
                .map(|b| format!("Robot {} battery critical: {b}%", robot.id)),
            Self::HighTemperature => robot
                .temperature
                .filter(|t| *t > limits.temperature_high)
                .map(|t| format!("Robot {} temperature high: {t:.1}°C", robot.id)),
            Self::HighCpu => robot
                .cpu_percent
                .filter(|c| *c > limits.cpu_high)
                .map(|c| format!("Robot {} CPU usage high: {c:.1}%", robot.id)),
        }
    }
}

/// Edge-triggered health checks: one alert per threshold crossing, re-armed
/// once the metric recovers.
#[derive(Debug, Default)]
pub struct AlertMonitor {
    thresholds: AlertThresholds,
    raised: HashMap<String, HashSet<Condition>>,
}

impl AlertMonitor {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            raised: HashMap::new(),
        }
    }

    /// Alerts newly raised by `robot`'s current metrics.
    pub fn evaluate(&mut self, robot: &Robot, now: DateTime<Utc>) -> Vec<SystemAlertMsg> {
        let raised = self.raised.entry(robot.id.clone()).or_default();
        let mut alerts = Vec::new();
        for condition in Condition::ALL {
            match condition.check(robot, &self.thresholds) {
                Some(message) => {
                    if raised.insert(condition) {
                        alerts.push(SystemAlertMsg {
                            alert_type: condition.alert_type().to_string(),
                            severity: condition.severity(),
                            message,
                            robot_id: Some(robot.id.clone()),
                            timestamp: now,
                        });
                    }
                },
                None => {
                    raised.remove(&condition);
                },
            }
        }
        alerts
    }

    pub fn forget(&mut self, robot_id: &str) {
        self.raised.remove(robot_id);
    }
}
