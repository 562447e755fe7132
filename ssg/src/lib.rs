use serde::{Deserialize, Serialize};

pub mod command;
pub mod compiler;
pub mod config;
pub mod drawing;
pub mod drivers;
pub mod errors;
pub mod reply;

pub use errors::*;

/// A position in the workspace frame, in millimeters.
///
/// `(0, 0)` is the homing reference; positions are undefined until the
/// controller has homed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Controller state as it appears in `state=` tokens on the wire.
///
/// The transition graph is owned by the controller; this enum is shared so
/// the host can parse `busy`/`status`/`telemetry` replies without string
/// matching.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    Boot,
    Idle,
    Homing,
    Ready,
    Printing,
    Paused,
    Cleaning,
    Error,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Boot => "BOOT",
            MachineState::Idle => "IDLE",
            MachineState::Homing => "HOMING",
            MachineState::Ready => "READY",
            MachineState::Printing => "PRINTING",
            MachineState::Paused => "PAUSED",
            MachineState::Cleaning => "CLEANING",
            MachineState::Error => "ERROR",
        }
    }

    /// Motion commands other than homing are only legal here.
    pub fn accepts_motion(&self) -> bool {
        matches!(self, MachineState::Ready | MachineState::Printing)
    }

    /// Pump activation is only legal while drawing is possible.
    pub fn accepts_flow_on(&self) -> bool {
        matches!(self, MachineState::Ready | MachineState::Printing)
    }

    /// Homing is privileged: it is also the recovery path out of `Error`.
    pub fn accepts_home(&self) -> bool {
        matches!(
            self,
            MachineState::Idle | MachineState::Ready | MachineState::Paused | MachineState::Error
        )
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MachineState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOOT" => Ok(MachineState::Boot),
            "IDLE" => Ok(MachineState::Idle),
            "HOMING" => Ok(MachineState::Homing),
            "READY" => Ok(MachineState::Ready),
            "PRINTING" => Ok(MachineState::Printing),
            "PAUSED" => Ok(MachineState::Paused),
            "CLEANING" => Ok(MachineState::Cleaning),
            "ERROR" => Ok(MachineState::Error),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tokens_round_trip() {
        for state in [
            MachineState::Boot,
            MachineState::Idle,
            MachineState::Homing,
            MachineState::Ready,
            MachineState::Printing,
            MachineState::Paused,
            MachineState::Cleaning,
            MachineState::Error,
        ] {
            assert_eq!(state.as_str().parse::<MachineState>(), Ok(state));
        }
    }

    #[test]
    fn motion_gates() {
        assert!(MachineState::Ready.accepts_motion());
        assert!(MachineState::Printing.accepts_motion());
        assert!(!MachineState::Paused.accepts_motion());
        assert!(!MachineState::Error.accepts_motion());
        assert!(MachineState::Error.accepts_home());
        assert!(!MachineState::Printing.accepts_home());
    }
}
