//! Machine configuration shared by the controller and the host tools.
//!
//! The controller embeds `MachineConfig::default()` and may override it from
//! a JSON file; the compiler consumes the soft limits and the flow curve.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::Position;

/// Per-axis kinematic settings. Speeds and accelerations are in step units;
/// soft limits are workspace millimeters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AxisConfig {
    pub steps_per_mm: f64,
    /// Maximum step rate, steps/s.
    pub max_speed: f64,
    /// Maximum acceleration, steps/s².
    pub max_accel: f64,
    pub min_mm: f64,
    pub max_mm: f64,
}

impl AxisConfig {
    pub fn max_speed_mm(&self) -> f64 {
        self.max_speed / self.steps_per_mm
    }

    pub fn max_accel_mm(&self) -> f64 {
        self.max_accel / self.steps_per_mm
    }

    pub fn span_mm(&self) -> f64 {
        self.max_mm - self.min_mm
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: 80.0,
            max_speed: 4000.0,
            max_accel: 64_000.0,
            min_mm: -120.0,
            max_mm: 120.0,
        }
    }
}

/// Rectangular workspace bounds, closed on all sides.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SoftLimits {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl SoftLimits {
    pub fn contains(&self, p: Position) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max
    }
}

impl Default for SoftLimits {
    fn default() -> Self {
        Self {
            x_min: -120.0,
            x_max: 120.0,
            y_min: -120.0,
            y_max: 120.0,
        }
    }
}

/// One point of the duty-to-line-width table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FlowCurvePoint {
    pub duty: u8,
    pub width_mm: f64,
}

/// Maps pump duty cycle to the nominal drawn line width. Used by the
/// compiler only; the controller applies duty verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlowCurve {
    points: Vec<FlowCurvePoint>,
}

impl FlowCurve {
    /// Points are sorted by duty; duplicates keep the last entry.
    pub fn new(mut points: Vec<FlowCurvePoint>) -> Self {
        points.sort_by_key(|p| p.duty);
        points.dedup_by_key(|p| p.duty);
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Linear interpolation, clamped to the table ends.
    pub fn width_for(&self, duty: u8) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if duty <= first.duty {
            return Some(first.width_mm);
        }
        if duty >= last.duty {
            return Some(last.width_mm);
        }
        let upper = self.points.iter().position(|p| p.duty >= duty)?;
        let hi = self.points[upper];
        let lo = self.points[upper - 1];
        let t = f64::from(duty - lo.duty) / f64::from(hi.duty - lo.duty);
        Some(lo.width_mm + t * (hi.width_mm - lo.width_mm))
    }

    /// Inverse lookup: the lowest duty whose nominal width reaches `width_mm`.
    pub fn duty_for(&self, width_mm: f64) -> Option<u8> {
        let first = self.points.first()?;
        if width_mm <= first.width_mm {
            return Some(first.duty);
        }
        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if width_mm <= hi.width_mm {
                let t = (width_mm - lo.width_mm) / (hi.width_mm - lo.width_mm);
                let duty = f64::from(lo.duty) + t * f64::from(hi.duty - lo.duty);
                return Some(duty.round() as u8);
            }
        }
        self.points.last().map(|p| p.duty)
    }
}

impl Default for FlowCurve {
    fn default() -> Self {
        FlowCurve::new(vec![
            FlowCurvePoint {
                duty: 20,
                width_mm: 1.5,
            },
            FlowCurvePoint {
                duty: 60,
                width_mm: 3.0,
            },
            FlowCurvePoint {
                duty: 80,
                width_mm: 4.5,
            },
        ])
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MachineConfig {
    pub x: AxisConfig,
    pub y: AxisConfig,
    /// Fast homing seek rate, steps/s. The precision re-seek runs at a
    /// quarter of this.
    pub homing_speed: f64,
    pub homing_backoff_mm: f64,
    /// Dwell after pump-on before motion resumes, ms.
    pub flow_on_dwell_ms: u64,
    /// Dwell after pump-off before motion resumes, ms.
    pub flow_off_dwell_ms: u64,
    pub queue_capacity: usize,
    pub heartbeat_timeout_ms: u64,
    pub telemetry_period_ms: u64,
    pub flow_curve: FlowCurve,
}

impl MachineConfig {
    pub fn soft_limits(&self) -> SoftLimits {
        SoftLimits {
            x_min: self.x.min_mm,
            x_max: self.x.max_mm,
            y_min: self.y.min_mm,
            y_max: self.y.max_mm,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Json(e.to_string()))
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            x: AxisConfig::default(),
            y: AxisConfig::default(),
            homing_speed: 800.0,
            homing_backoff_mm: 5.0,
            flow_on_dwell_ms: 100,
            flow_off_dwell_ms: 50,
            queue_capacity: 64,
            heartbeat_timeout_ms: 3000,
            telemetry_period_ms: 1000,
            flow_curve: FlowCurve::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Json(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read config file: {}", e),
            ConfigError::Json(e) => write!(f, "could not parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_closed_bounds() {
        let limits = SoftLimits::default();
        assert!(limits.contains(Position::new(120.0, -120.0)));
        assert!(limits.contains(Position::new(-120.0, 120.0)));
        assert!(!limits.contains(Position::new(120.01, 0.0)));
    }

    #[test]
    fn flow_curve_interpolates() {
        let curve = FlowCurve::default();
        assert_eq!(curve.width_for(20), Some(1.5));
        assert_eq!(curve.width_for(80), Some(4.5));
        // Clamped outside the table.
        assert_eq!(curve.width_for(0), Some(1.5));
        assert_eq!(curve.width_for(100), Some(4.5));
        // Midway between 20 and 60.
        let mid = curve.width_for(40).unwrap();
        assert!((mid - 2.25).abs() < 1e-9);
    }

    #[test]
    fn flow_curve_inverse() {
        let curve = FlowCurve::default();
        assert_eq!(curve.duty_for(1.5), Some(20));
        assert_eq!(curve.duty_for(3.0), Some(60));
        assert_eq!(curve.duty_for(10.0), Some(80));
        assert_eq!(curve.duty_for(2.25), Some(40));
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = MachineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MachineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn partial_config_file_uses_defaults() {
        let cfg: MachineConfig = serde_json::from_str(r#"{"queue_capacity": 16}"#).unwrap();
        assert_eq!(cfg.queue_capacity, 16);
        assert_eq!(cfg.heartbeat_timeout_ms, 3000);
    }
}
