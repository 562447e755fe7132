use std::time::Duration;

use crate::reply::{ErrorKind, TelemetryFrame};

/// Progress snapshot published while a job streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamProgress {
    pub total: usize,
    pub sent: usize,
    pub acked: usize,
    pub retries: usize,
}

/// Events published on the driver's broadcast channel for UI consumption.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Progress(StreamProgress),
    Telemetry(TelemetryFrame),
    DeviceError {
        seq: Option<u32>,
        code: ErrorKind,
    },
    Busy {
        queue_depth: usize,
    },
}

/// Final accounting for a completed stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStats {
    pub sent: usize,
    pub acked: usize,
    pub retries: usize,
    pub elapsed: Duration,
}
