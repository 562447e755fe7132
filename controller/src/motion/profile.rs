//! Trapezoidal velocity profile over a straight segment.

/// Distance-vs-time for one segment: accelerate, cruise, decelerate, with
/// the cruise phase dropped (triangular profile) when the segment is too
/// short to reach the target speed.
///
/// All quantities are scalar millimeters along the segment; the planner maps
/// the path coordinate back onto the axes, which is what makes both axes
/// finish together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    distance: f64,
    accel: f64,
    v_cruise: f64,
    t_accel: f64,
    t_cruise: f64,
}

impl Profile {
    /// `v_target` and `accel` must be positive; a zero-length segment yields
    /// a zero-duration profile.
    pub fn new(distance: f64, v_target: f64, accel: f64) -> Self {
        let distance = distance.max(0.0);
        if distance == 0.0 {
            return Self {
                distance,
                accel,
                v_cruise: 0.0,
                t_accel: 0.0,
                t_cruise: 0.0,
            };
        }

        let accel_dist = v_target * v_target / (2.0 * accel);
        if 2.0 * accel_dist >= distance {
            // Too short to reach the target speed.
            let v_peak = (accel * distance).sqrt();
            Self {
                distance,
                accel,
                v_cruise: v_peak,
                t_accel: v_peak / accel,
                t_cruise: 0.0,
            }
        } else {
            let cruise_dist = distance - 2.0 * accel_dist;
            Self {
                distance,
                accel,
                v_cruise: v_target,
                t_accel: v_target / accel,
                t_cruise: cruise_dist / v_target,
            }
        }
    }

    pub fn duration(&self) -> f64 {
        2.0 * self.t_accel + self.t_cruise
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn cruise_speed(&self) -> f64 {
        self.v_cruise
    }

    /// Path distance covered `t` seconds in, clamped to the segment.
    pub fn distance_at(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        let total = self.duration();
        if t >= total {
            return self.distance;
        }
        if t < self.t_accel {
            0.5 * self.accel * t * t
        } else if t < self.t_accel + self.t_cruise {
            let accel_dist = 0.5 * self.accel * self.t_accel * self.t_accel;
            accel_dist + self.v_cruise * (t - self.t_accel)
        } else {
            let remaining = total - t;
            self.distance - 0.5 * self.accel * remaining * remaining
        }
    }
}
