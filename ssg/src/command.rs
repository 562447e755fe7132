//! SSG command lines: the host-to-controller half of the wire format.
//!
//! Each line is `N<seq> <op> [<param><value>]*`, newline-terminated, at most
//! 256 bytes. `N0` marks an out-of-band command that skips sequence
//! validation (manual jog, status polls from a console).

use std::fmt;

/// Upper bound on an encoded line, including the sequence token.
pub const MAX_LINE_BYTES: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `G0`: travel move, pump must be off.
    Rapid {
        x: Option<f64>,
        y: Option<f64>,
        feed: Option<f64>,
    },
    /// `G1`: drawing move at the currently configured flow.
    Draw {
        x: Option<f64>,
        y: Option<f64>,
        feed: Option<f64>,
    },
    /// `M3 S<duty>`: pump on at a duty cycle of 0..=100.
    FlowOn { duty: u8 },
    /// `M5`: pump off.
    FlowOff,
    /// `G28`: run the homing procedure.
    Home,
    /// `M114`: report position.
    ReportPos,
    /// `M408`: report status.
    ReportStatus,
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Command::Rapid { .. } => "G0",
            Command::Draw { .. } => "G1",
            Command::FlowOn { .. } => "M3",
            Command::FlowOff => "M5",
            Command::Home => "G28",
            Command::ReportPos => "M114",
            Command::ReportStatus => "M408",
        }
    }

    pub fn is_motion(&self) -> bool {
        matches!(self, Command::Rapid { .. } | Command::Draw { .. })
    }
}

/// A command with its sequence number. `seq == 0` is out-of-band.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub seq: u32,
    pub command: Command,
}

impl CommandLine {
    pub fn new(seq: u32, command: Command) -> Self {
        Self { seq, command }
    }

    pub fn is_out_of_band(&self) -> bool {
        self.seq == 0
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{} {}", self.seq, self.command.op())?;
        match &self.command {
            Command::Rapid { x, y, feed } | Command::Draw { x, y, feed } => {
                if let Some(x) = x {
                    write!(f, " X{:.2}", x)?;
                }
                if let Some(y) = y {
                    write!(f, " Y{:.2}", y)?;
                }
                if let Some(feed) = feed {
                    write!(f, " F{:.0}", feed)?;
                }
            }
            Command::FlowOn { duty } => write!(f, " S{}", duty)?,
            _ => {}
        }
        Ok(())
    }
}

/// Why a line failed to parse. Every variant answers `err code=PARSE` on the
/// wire; the detail is for the controller log.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    /// Sequence number, when it could be recovered from the line.
    pub seq: Option<u32>,
    pub kind: LineErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineErrorKind {
    Empty,
    TooLong { len: usize },
    BadSequence(String),
    UnknownOp(String),
    UnexpectedParam { op: &'static str, param: String },
    MissingParam { op: &'static str, param: char },
    BadNumber { param: char, value: String },
    DutyRange(i64),
    FeedRange(f64),
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LineErrorKind::Empty => write!(f, "empty line"),
            LineErrorKind::TooLong { len } => {
                write!(f, "line is {} bytes, limit is {}", len, MAX_LINE_BYTES)
            }
            LineErrorKind::BadSequence(tok) => write!(f, "bad sequence token '{}'", tok),
            LineErrorKind::UnknownOp(op) => write!(f, "unknown op '{}'", op),
            LineErrorKind::UnexpectedParam { op, param } => {
                write!(f, "{} does not take parameter '{}'", op, param)
            }
            LineErrorKind::MissingParam { op, param } => {
                write!(f, "{} requires parameter {}", op, param)
            }
            LineErrorKind::BadNumber { param, value } => {
                write!(f, "parameter {} has bad value '{}'", param, value)
            }
            LineErrorKind::DutyRange(v) => write!(f, "duty {} outside 0..=100", v),
            LineErrorKind::FeedRange(v) => write!(f, "feed {} must be positive", v),
        }
    }
}

impl std::error::Error for LineError {}

/// Parse one SSG line. Lines without a leading `N` token are treated as
/// out-of-band (`seq == 0`).
pub fn parse_line(input: &str) -> Result<CommandLine, LineError> {
    let err = |seq, kind| LineError { seq, kind };

    if input.len() > MAX_LINE_BYTES {
        return Err(err(None, LineErrorKind::TooLong { len: input.len() }));
    }
    let mut tokens = input.split_whitespace();
    let first = tokens
        .next()
        .ok_or_else(|| err(None, LineErrorKind::Empty))?;

    let (seq, op) = if let Some(digits) = first.strip_prefix('N') {
        let seq = digits
            .parse::<u32>()
            .map_err(|_| err(None, LineErrorKind::BadSequence(first.to_string())))?;
        let op = tokens
            .next()
            .ok_or_else(|| err(Some(seq), LineErrorKind::Empty))?;
        (seq, op)
    } else {
        (0, first)
    };

    let mut x = None;
    let mut y = None;
    let mut feed = None;
    let mut duty = None;

    for token in tokens {
        let param = token.chars().next().unwrap();
        let value = &token[param.len_utf8()..];
        match param {
            'X' | 'Y' | 'F' => {
                let v = value.parse::<f64>().map_err(|_| {
                    err(
                        Some(seq),
                        LineErrorKind::BadNumber {
                            param,
                            value: value.to_string(),
                        },
                    )
                })?;
                match param {
                    'X' => x = Some(v),
                    'Y' => y = Some(v),
                    _ => {
                        if v <= 0.0 {
                            return Err(err(Some(seq), LineErrorKind::FeedRange(v)));
                        }
                        feed = Some(v);
                    }
                }
            }
            'S' => {
                let v = value.parse::<i64>().map_err(|_| {
                    err(
                        Some(seq),
                        LineErrorKind::BadNumber {
                            param,
                            value: value.to_string(),
                        },
                    )
                })?;
                if !(0..=100).contains(&v) {
                    return Err(err(Some(seq), LineErrorKind::DutyRange(v)));
                }
                duty = Some(v as u8);
            }
            _ => {
                return Err(err(
                    Some(seq),
                    LineErrorKind::UnexpectedParam {
                        op: "?",
                        param: token.to_string(),
                    },
                ))
            }
        }
    }

    let reject_params = |op: &'static str| -> Result<(), LineError> {
        if x.is_some() || y.is_some() || feed.is_some() || duty.is_some() {
            return Err(err(
                Some(seq),
                LineErrorKind::UnexpectedParam {
                    op,
                    param: "X/Y/F/S".to_string(),
                },
            ));
        }
        Ok(())
    };

    let command = match op {
        "G0" | "G1" => {
            if duty.is_some() {
                return Err(err(
                    Some(seq),
                    LineErrorKind::UnexpectedParam {
                        op: if op == "G0" { "G0" } else { "G1" },
                        param: "S".to_string(),
                    },
                ));
            }
            if op == "G0" {
                Command::Rapid { x, y, feed }
            } else {
                Command::Draw { x, y, feed }
            }
        }
        "M3" => {
            if x.is_some() || y.is_some() || feed.is_some() {
                return Err(err(
                    Some(seq),
                    LineErrorKind::UnexpectedParam {
                        op: "M3",
                        param: "X/Y/F".to_string(),
                    },
                ));
            }
            let duty = duty.ok_or_else(|| {
                err(
                    Some(seq),
                    LineErrorKind::MissingParam { op: "M3", param: 'S' },
                )
            })?;
            Command::FlowOn { duty }
        }
        "M5" => {
            reject_params("M5")?;
            Command::FlowOff
        }
        "G28" => {
            reject_params("G28")?;
            Command::Home
        }
        "M114" => {
            reject_params("M114")?;
            Command::ReportPos
        }
        "M408" => {
            reject_params("M408")?;
            Command::ReportStatus
        }
        other => return Err(err(Some(seq), LineErrorKind::UnknownOp(other.to_string()))),
    };

    Ok(CommandLine::new(seq, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_draw_with_all_params() {
        let line = parse_line("N3 G1 X10.5 Y-2 F600").unwrap();
        assert_eq!(line.seq, 3);
        assert_eq!(
            line.command,
            Command::Draw {
                x: Some(10.5),
                y: Some(-2.0),
                feed: Some(600.0)
            }
        );
    }

    #[test]
    fn missing_sequence_is_out_of_band() {
        let line = parse_line("M408").unwrap();
        assert_eq!(line.seq, 0);
        assert_eq!(line.command, Command::ReportStatus);
        assert!(line.is_out_of_band());
    }

    #[test]
    fn draw_without_coordinates_is_valid() {
        let line = parse_line("N1 G1").unwrap();
        assert_eq!(
            line.command,
            Command::Draw {
                x: None,
                y: None,
                feed: None
            }
        );
    }

    #[test]
    fn flow_on_requires_duty() {
        let e = parse_line("N1 M3").unwrap_err();
        assert_eq!(e.seq, Some(1));
        assert!(matches!(e.kind, LineErrorKind::MissingParam { .. }));
    }

    #[test]
    fn duty_out_of_range_rejected() {
        let e = parse_line("N1 M3 S101").unwrap_err();
        assert!(matches!(e.kind, LineErrorKind::DutyRange(101)));
    }

    #[test]
    fn zero_feed_rejected() {
        let e = parse_line("N1 G1 X1 F0").unwrap_err();
        assert!(matches!(e.kind, LineErrorKind::FeedRange(_)));
    }

    #[test]
    fn unknown_op_rejected() {
        let e = parse_line("N1 G2 X1 Y1").unwrap_err();
        assert!(matches!(e.kind, LineErrorKind::UnknownOp(_)));
    }

    #[test]
    fn whitespace_runs_are_tolerated() {
        let line = parse_line("N2   G0  X1.00   Y2.00").unwrap();
        assert_eq!(line.seq, 2);
        assert_eq!(line.command.op(), "G0");
    }

    #[test]
    fn oversized_line_rejected() {
        let long = format!("N1 G1 X1 {}", " ".repeat(MAX_LINE_BYTES));
        assert!(matches!(
            parse_line(&long).unwrap_err().kind,
            LineErrorKind::TooLong { .. }
        ));
    }

    #[test]
    fn canonical_rendering() {
        let line = CommandLine::new(
            7,
            Command::Draw {
                x: Some(10.0),
                y: Some(0.125),
                feed: Some(600.0),
            },
        );
        assert_eq!(line.to_string(), "N7 G1 X10.00 Y0.12 F600");
        let flow = CommandLine::new(8, Command::FlowOn { duty: 60 });
        assert_eq!(flow.to_string(), "N8 M3 S60");
        assert_eq!(CommandLine::new(1, Command::Home).to_string(), "N1 G28");
    }

    #[test]
    fn rendering_parses_back() {
        let line = CommandLine::new(
            12,
            Command::Rapid {
                x: Some(-20.0),
                y: Some(14.25),
                feed: Some(3000.0),
            },
        );
        assert_eq!(parse_line(&line.to_string()).unwrap(), line);
    }
}
