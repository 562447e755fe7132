//! The homing procedure: seek the minimum endstop, back off, re-seek slowly,
//! zero the axis. X first, then Y.
//!
//! Homing holds the controller loop until it finishes; nothing else executes
//! concurrently. The fast seek and back-off run at `homing_speed`, the
//! precision re-seek at a quarter of it; the speed is the pacing gap between
//! pulses, pushed through [`StepIo::pace`] so hardware holds the loop for
//! each gap while the simulated gantry settles instantly. The "endstop never
//! asserted" timeout is expressed as a travel budget: a switch that has not
//! triggered within the full axis span plus margin is not going to.

use std::fmt;
use std::time::Duration;

use ssg::config::MachineConfig;

use crate::io::{AxisId, StepDir, StepIo};

use super::MotionSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingError {
    EndstopTimeout { axis: AxisId },
}

impl fmt::Display for HomingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomingError::EndstopTimeout { axis } => {
                write!(f, "endstop on {:?} never asserted", axis)
            }
        }
    }
}

impl std::error::Error for HomingError {}

pub fn run_homing(
    motion: &mut MotionSystem,
    io: &mut impl StepIo,
    cfg: &MachineConfig,
) -> Result<(), HomingError> {
    motion.abort();

    let fast_period = Duration::from_secs_f64(1.0 / cfg.homing_speed.max(1.0));
    let slow_period = fast_period * 4;

    for axis in [AxisId::X, AxisId::Y] {
        let axis_cfg = match axis {
            AxisId::X => &cfg.x,
            AxisId::Y => &cfg.y,
        };
        let steps_per_mm = axis_cfg.steps_per_mm;
        let backoff_steps = (cfg.homing_backoff_mm * steps_per_mm).round().max(1.0) as u64;
        let seek_budget =
            ((axis_cfg.span_mm() + 2.0 * cfg.homing_backoff_mm) * steps_per_mm) as u64;

        // Fast approach until the switch triggers.
        seek(io, axis, seek_budget, fast_period)?;

        // Back off, then creep in again for the precision reference.
        for _ in 0..backoff_steps {
            io.step(axis, StepDir::Forward);
            io.pace(fast_period);
        }
        seek(io, axis, backoff_steps * 2, slow_period)?;
    }

    motion.set_zero();
    Ok(())
}

fn seek(
    io: &mut impl StepIo,
    axis: AxisId,
    budget: u64,
    period: Duration,
) -> Result<(), HomingError> {
    let mut traveled = 0;
    while !io.endstop(axis) {
        if traveled >= budget {
            return Err(HomingError::EndstopTimeout { axis });
        }
        io.step(axis, StepDir::Back);
        io.pace(period);
        traveled += 1;
    }
    Ok(())
}
