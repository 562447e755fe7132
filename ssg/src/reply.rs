//! Controller-to-host replies: acks, errors, `busy`, telemetry, and reports.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MachineState;

/// Wire error codes, the `code=` token of an `err` reply.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Seq,
    Gap,
    NotHomed,
    Limit,
    Endstop,
    HomingFail,
    BusyState,
    Heartbeat,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "PARSE",
            ErrorKind::Seq => "SEQ",
            ErrorKind::Gap => "GAP",
            ErrorKind::NotHomed => "NOT_HOMED",
            ErrorKind::Limit => "LIMIT",
            ErrorKind::Endstop => "ENDSTOP",
            ErrorKind::HomingFail => "HOMING_FAIL",
            ErrorKind::BusyState => "BUSY_STATE",
            ErrorKind::Heartbeat => "HEARTBEAT",
        }
    }

    /// `GAP` is the only rejection the stream recovers from by resending;
    /// everything else ends the job.
    pub fn is_fatal_for_job(&self) -> bool {
        !matches!(self, ErrorKind::Gap)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PARSE" => Ok(ErrorKind::Parse),
            "SEQ" => Ok(ErrorKind::Seq),
            "GAP" => Ok(ErrorKind::Gap),
            "NOT_HOMED" => Ok(ErrorKind::NotHomed),
            "LIMIT" => Ok(ErrorKind::Limit),
            "ENDSTOP" => Ok(ErrorKind::Endstop),
            "HOMING_FAIL" => Ok(ErrorKind::HomingFail),
            "BUSY_STATE" => Ok(ErrorKind::BusyState),
            "HEARTBEAT" => Ok(ErrorKind::Heartbeat),
            _ => Err(()),
        }
    }
}

/// Unsolicited once-a-second frame.
///
/// `last_ack` is an extension over the minimum frame so that a host can
/// recover its resume point from telemetry alone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub pos: TelemetryPos,
    pub flow: u8,
    pub q: usize,
    pub state: MachineState,
    pub last_ack: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TelemetryPos {
    pub x: f64,
    pub y: f64,
}

/// Response to `M408`. Carries `last_ack` so a single status query is enough
/// to resume a stream after a disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: MachineState,
    pub q: usize,
    pub flow: u8,
    pub sauce_on: bool,
    pub last_ack: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok { seq: u32 },
    Err { seq: Option<u32>, code: ErrorKind },
    Busy { q: usize, state: MachineState },
    Telemetry(TelemetryFrame),
    Pos { x: f64, y: f64 },
    Status(StatusReport),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok { seq } => write!(f, "ok N{}", seq),
            Reply::Err {
                seq: Some(seq),
                code,
            } => write!(f, "err N{} code={}", seq, code),
            Reply::Err { seq: None, code } => write!(f, "err code={}", code),
            Reply::Busy { q, state } => write!(f, "busy q={} state={}", q, state),
            Reply::Telemetry(frame) => {
                let json = serde_json::to_string(frame).map_err(|_| fmt::Error)?;
                write!(f, "telemetry {}", json)
            }
            Reply::Pos { x, y } => write!(f, "pos X:{:.2} Y:{:.2}", x, y),
            Reply::Status(s) => write!(
                f,
                "status state={} q={} flow={} sauce={} last_ack={}",
                s.state,
                s.q,
                s.flow,
                if s.sauce_on { "ON" } else { "OFF" },
                s.last_ack,
            ),
        }
    }
}

/// Why a reply line failed to parse on the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyError {
    Empty,
    UnknownReply(String),
    Malformed(String),
    Json(String),
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyError::Empty => write!(f, "empty reply"),
            ReplyError::UnknownReply(s) => write!(f, "unknown reply '{}'", s),
            ReplyError::Malformed(s) => write!(f, "malformed reply: {}", s),
            ReplyError::Json(s) => write!(f, "bad telemetry json: {}", s),
        }
    }
}

impl std::error::Error for ReplyError {}

fn parse_seq_token(token: &str) -> Result<u32, ReplyError> {
    token
        .strip_prefix('N')
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| ReplyError::Malformed(format!("bad sequence token '{}'", token)))
}

fn parse_kv<'a>(token: &'a str, key: &str) -> Result<&'a str, ReplyError> {
    token
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or_else(|| ReplyError::Malformed(format!("expected {}=, got '{}'", key, token)))
}

/// Parse one reply line from the controller.
pub fn parse_reply(input: &str) -> Result<Reply, ReplyError> {
    let input = input.trim();
    let mut tokens = input.split_whitespace();
    let head = tokens.next().ok_or(ReplyError::Empty)?;

    match head {
        "ok" => {
            let seq = parse_seq_token(tokens.next().ok_or_else(|| {
                ReplyError::Malformed("ok without sequence".to_string())
            })?)?;
            Ok(Reply::Ok { seq })
        }
        "err" => {
            let next = tokens
                .next()
                .ok_or_else(|| ReplyError::Malformed("err without code".to_string()))?;
            let (seq, code_token) = if next.starts_with('N') {
                let seq = parse_seq_token(next)?;
                let code = tokens
                    .next()
                    .ok_or_else(|| ReplyError::Malformed("err without code".to_string()))?;
                (Some(seq), code)
            } else {
                (None, next)
            };
            let code = parse_kv(code_token, "code")?
                .parse::<ErrorKind>()
                .map_err(|_| ReplyError::Malformed(format!("unknown code in '{}'", input)))?;
            Ok(Reply::Err { seq, code })
        }
        "busy" => {
            let q = parse_kv(
                tokens
                    .next()
                    .ok_or_else(|| ReplyError::Malformed("busy without q".to_string()))?,
                "q",
            )?
            .parse::<usize>()
            .map_err(|_| ReplyError::Malformed(format!("bad queue depth in '{}'", input)))?;
            let state = parse_kv(
                tokens
                    .next()
                    .ok_or_else(|| ReplyError::Malformed("busy without state".to_string()))?,
                "state",
            )?
            .parse::<MachineState>()
            .map_err(|_| ReplyError::Malformed(format!("bad state in '{}'", input)))?;
            Ok(Reply::Busy { q, state })
        }
        "telemetry" => {
            let json = input
                .split_once(' ')
                .map(|(_, rest)| rest)
                .ok_or_else(|| ReplyError::Malformed("telemetry without body".to_string()))?;
            let frame: TelemetryFrame =
                serde_json::from_str(json).map_err(|e| ReplyError::Json(e.to_string()))?;
            Ok(Reply::Telemetry(frame))
        }
        "pos" => {
            let x = tokens
                .next()
                .and_then(|t| t.strip_prefix("X:"))
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ReplyError::Malformed(format!("bad pos reply '{}'", input)))?;
            let y = tokens
                .next()
                .and_then(|t| t.strip_prefix("Y:"))
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ReplyError::Malformed(format!("bad pos reply '{}'", input)))?;
            Ok(Reply::Pos { x, y })
        }
        "status" => {
            let mut state = None;
            let mut q = None;
            let mut flow = None;
            let mut sauce_on = None;
            let mut last_ack = 0;
            for token in tokens {
                let (key, value) = token
                    .split_once('=')
                    .ok_or_else(|| ReplyError::Malformed(format!("bad status token '{}'", token)))?;
                match key {
                    "state" => state = value.parse::<MachineState>().ok(),
                    "q" => q = value.parse::<usize>().ok(),
                    "flow" => flow = value.parse::<u8>().ok(),
                    "sauce" => sauce_on = Some(value == "ON"),
                    "last_ack" => {
                        last_ack = value.parse().map_err(|_| {
                            ReplyError::Malformed(format!("bad last_ack '{}'", value))
                        })?
                    }
                    _ => {}
                }
            }
            match (state, q, flow, sauce_on) {
                (Some(state), Some(q), Some(flow), Some(sauce_on)) => {
                    Ok(Reply::Status(StatusReport {
                        state,
                        q,
                        flow,
                        sauce_on,
                        last_ack,
                    }))
                }
                _ => Err(ReplyError::Malformed(format!(
                    "incomplete status reply '{}'",
                    input
                ))),
            }
        }
        other => Err(ReplyError::UnknownReply(other.to_string())),
    }
}
