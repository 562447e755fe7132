//! Soft-limit validation.
//!
//! Targets are validated before a move is ever queued; a violation is fatal
//! for the job and the fault path (pump off, queue flush, `ERROR` state)
//! lives in the plotter, which owns the state.

use ssg::config::SoftLimits;
use ssg::Position;

/// Bounds are closed: a target exactly on a limit is legal.
pub fn target_within_limits(limits: &SoftLimits, target: Position) -> bool {
    limits.contains(target)
}
