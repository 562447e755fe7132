//! Compiler input: a normalized vector drawing as ordered polylines.
//!
//! Upstream (SVG parsing, normalization, plate fitting) produces this form;
//! invariants like "at least two points" and "no coincident consecutive
//! points" are promised there but re-checked cheaply during compilation.

use serde::{Deserialize, Serialize};

use crate::config::SoftLimits;
use crate::Position;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Polyline {
    pub points: Vec<Position>,
    /// Pump duty cycle while drawing this polyline, 0..=100.
    pub flow_duty: u8,
    /// Drawing feed, mm/min.
    pub feed_rate: f64,
}

impl Polyline {
    pub fn new(points: Vec<Position>, flow_duty: u8, feed_rate: f64) -> Self {
        Self {
            points,
            flow_duty,
            feed_rate,
        }
    }

    /// Closed means the last point coincides with the first.
    pub fn is_closed(&self) -> bool {
        match (self.points.first(), self.points.last()) {
            (Some(a), Some(b)) if self.points.len() > 2 => a == b,
            _ => false,
        }
    }

    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance_to(pair[1]))
            .sum()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Drawing {
    pub plate_radius_mm: f64,
    pub soft_limits: SoftLimits,
    /// Travel feed between polylines, mm/min.
    pub rapid_feed: f64,
    pub polylines: Vec<Polyline>,
}

impl Drawing {
    pub fn total_vertices(&self) -> usize {
        self.polylines.iter().map(|p| p.points.len()).sum()
    }

    pub fn total_draw_length(&self) -> f64 {
        self.polylines.iter().map(|p| p.length()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_detection() {
        let open = Polyline::new(
            vec![Position::new(0.0, 0.0), Position::new(10.0, 0.0)],
            60,
            600.0,
        );
        assert!(!open.is_closed());

        let closed = Polyline::new(
            vec![
                Position::new(0.0, 0.0),
                Position::new(10.0, 0.0),
                Position::new(10.0, 10.0),
                Position::new(0.0, 0.0),
            ],
            60,
            600.0,
        );
        assert!(closed.is_closed());
    }

    #[test]
    fn length_sums_segments() {
        let line = Polyline::new(
            vec![
                Position::new(0.0, 0.0),
                Position::new(3.0, 4.0),
                Position::new(3.0, 10.0),
            ],
            60,
            600.0,
        );
        assert!((line.length() - 11.0).abs() < 1e-9);
    }
}
