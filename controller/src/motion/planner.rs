//! Segment execution: two axes, one shared trapezoid.
//!
//! A segment is planned once as a scalar profile along the path; every tick
//! maps the path coordinate onto both axes and emits whatever step pulses
//! are owed up to "now". Because both axes follow the same path coordinate,
//! they finish within one step of each other by construction.

use std::time::Instant;

use ssg::config::MachineConfig;
use ssg::reply::ErrorKind;
use ssg::Position;

use crate::io::{AxisId, StepDir, StepIo};

use super::Profile;

/// Logical position in the switch-pressed region where an asserted endstop
/// is expected rather than a fault (about 0.2 mm at 80 steps/mm).
const ENDSTOP_SLACK_STEPS: i64 = 16;

#[derive(Debug)]
pub struct Axis {
    pub id: AxisId,
    pub steps_per_mm: f64,
    pub position_steps: i64,
}

impl Axis {
    pub fn position_mm(&self) -> f64 {
        self.position_steps as f64 / self.steps_per_mm
    }

    pub fn steps_for(&self, mm: f64) -> i64 {
        (mm * self.steps_per_mm).round() as i64
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: Position,
    target: Position,
    unit: (f64, f64),
    profile: Profile,
    started_at: Instant,
}

/// What a planner tick produced, beyond plain step pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    SegmentDone,
    Fault(ErrorKind),
}

#[derive(Debug)]
pub struct MotionSystem {
    pub x: Axis,
    pub y: Axis,
    max_speed_mm: (f64, f64),
    max_accel_mm: (f64, f64),
    active: Option<Segment>,
    dwell_until: Option<Instant>,
}

impl MotionSystem {
    pub fn new(cfg: &MachineConfig) -> Self {
        Self {
            x: Axis {
                id: AxisId::X,
                steps_per_mm: cfg.x.steps_per_mm,
                position_steps: 0,
            },
            y: Axis {
                id: AxisId::Y,
                steps_per_mm: cfg.y.steps_per_mm,
                position_steps: 0,
            },
            max_speed_mm: (cfg.x.max_speed_mm(), cfg.y.max_speed_mm()),
            max_accel_mm: (cfg.x.max_accel_mm(), cfg.y.max_accel_mm()),
            active: None,
            dwell_until: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x.position_mm(), self.y.position_mm())
    }

    /// Re-reference both axes to the homing origin.
    pub fn set_zero(&mut self) {
        self.x.position_steps = 0;
        self.y.position_steps = 0;
    }

    pub fn is_busy(&self, now: Instant) -> bool {
        self.active.is_some() || self.dwell_until.is_some_and(|until| now < until)
    }

    /// True while a segment is executing. Dwells do not count.
    pub fn is_moving(&self) -> bool {
        self.active.is_some()
    }

    /// Hold motion for a flow-stabilization dwell.
    pub fn dwell(&mut self, now: Instant, millis: u64) {
        self.dwell_until = Some(now + std::time::Duration::from_millis(millis));
    }

    /// Drop the active segment and any dwell. Used on fault entry.
    pub fn abort(&mut self) {
        self.active = None;
        self.dwell_until = None;
    }

    /// Plan a segment from the current position. The commanded Cartesian
    /// feed is split over the axes by the move direction, then each axis'
    /// speed and acceleration caps are pulled back onto the path scalar.
    pub fn start_move(&mut self, now: Instant, target: Position, feed_mm_min: f64) {
        let start = self.position();
        let dx = target.x - start.x;
        let dy = target.y - start.y;
        let length = (dx * dx + dy * dy).sqrt();

        if length < 1e-9 {
            self.active = Some(Segment {
                start,
                target,
                unit: (0.0, 0.0),
                profile: Profile::new(0.0, 1.0, 1.0),
                started_at: now,
            });
            return;
        }

        let ux = dx / length;
        let uy = dy / length;
        let mut v = (feed_mm_min / 60.0).max(1e-6);
        let mut a = f64::INFINITY;
        if ux.abs() > 1e-12 {
            v = v.min(self.max_speed_mm.0 / ux.abs());
            a = a.min(self.max_accel_mm.0 / ux.abs());
        }
        if uy.abs() > 1e-12 {
            v = v.min(self.max_speed_mm.1 / uy.abs());
            a = a.min(self.max_accel_mm.1 / uy.abs());
        }

        self.active = Some(Segment {
            start,
            target,
            unit: (ux, uy),
            profile: Profile::new(length, v, a),
            started_at: now,
        });
    }

    /// Advance the active segment to `now`, emitting owed step pulses.
    pub fn tick(&mut self, now: Instant, io: &mut impl StepIo) -> Option<MotionEvent> {
        if let Some(until) = self.dwell_until {
            if now < until {
                return None;
            }
            self.dwell_until = None;
        }

        let seg = self.active?;
        let t = now.saturating_duration_since(seg.started_at).as_secs_f64();
        let done = t >= seg.profile.duration();

        let (x_mm, y_mm) = if done {
            (seg.target.x, seg.target.y)
        } else {
            let s = seg.profile.distance_at(t);
            (seg.start.x + seg.unit.0 * s, seg.start.y + seg.unit.1 * s)
        };

        if let Err(code) = drive_axis(&mut self.x, x_mm, io) {
            self.abort();
            return Some(MotionEvent::Fault(code));
        }
        if let Err(code) = drive_axis(&mut self.y, y_mm, io) {
            self.abort();
            return Some(MotionEvent::Fault(code));
        }

        if done {
            self.active = None;
            return Some(MotionEvent::SegmentDone);
        }
        None
    }
}

/// Step one axis to its owed position, watching the endstop on the way.
fn drive_axis(axis: &mut Axis, target_mm: f64, io: &mut impl StepIo) -> Result<(), ErrorKind> {
    // A pressed switch with the carriage logically far from it means the
    // carriage is somewhere the controller does not think it is.
    if io.endstop(axis.id) && axis.position_steps > ENDSTOP_SLACK_STEPS {
        return Err(ErrorKind::Endstop);
    }

    let desired = axis.steps_for(target_mm);
    while axis.position_steps != desired {
        if desired < axis.position_steps {
            // Never step past the switch.
            if axis.position_steps <= 0 && io.endstop(axis.id) {
                return Err(ErrorKind::Endstop);
            }
            io.step(axis.id, StepDir::Back);
            axis.position_steps -= 1;
        } else {
            io.step(axis.id, StepDir::Forward);
            axis.position_steps += 1;
        }
    }
    Ok(())
}
