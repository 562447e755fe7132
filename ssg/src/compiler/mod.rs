//! Toolpath compiler: polylines in, a numbered SSG line sequence out.
//!
//! The pipeline is validate, simplify (optional), order, emit. Compilation
//! is deterministic: identical input and configuration produce byte-identical
//! output, which keeps retries and resumes stable.

mod order;
mod simplify;

use std::fmt;

use crate::command::{Command, CommandLine};
use crate::drawing::{Drawing, Polyline};
use crate::Position;

pub use order::travel_length;

#[derive(Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    /// Ramer-Douglas-Peucker tolerance in mm; 0 disables simplification.
    pub simplify_epsilon: f64,
    /// Run a 2-opt improvement pass after nearest-neighbor ordering.
    pub two_opt: bool,
    /// Emit a final rapid back to the origin.
    pub park: bool,
    /// Emit a trailing `M114` so the stream ends with a position report.
    pub report_position: bool,
    pub max_total_length_mm: f64,
    pub max_vertices: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            simplify_epsilon: 0.0,
            two_opt: false,
            park: false,
            report_position: false,
            max_total_length_mm: 3000.0,
            max_vertices: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileStats {
    pub commands: usize,
    pub rapid_moves: usize,
    pub draw_moves: usize,
    pub draw_length_mm: f64,
    pub travel_length_mm: f64,
    /// Rough duration from the commanded feed rates, ignoring acceleration.
    pub estimated_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledJob {
    pub lines: Vec<String>,
    pub stats: CompileStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    EmptyDrawing,
    TooFewPoints {
        polyline: usize,
    },
    CoincidentPoints {
        polyline: usize,
        vertex: usize,
    },
    OutOfBounds {
        polyline: usize,
        vertex: usize,
        x: f64,
        y: f64,
    },
    TooLong {
        total_mm: f64,
        max_mm: f64,
    },
    TooManyVertices {
        count: usize,
        max: usize,
    },
    BadFeed {
        polyline: Option<usize>,
        feed: f64,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::EmptyDrawing => write!(f, "drawing has no polylines"),
            CompileError::TooFewPoints { polyline } => {
                write!(f, "polyline {} has fewer than 2 points", polyline)
            }
            CompileError::CoincidentPoints { polyline, vertex } => write!(
                f,
                "polyline {} vertex {} coincides with its predecessor",
                polyline, vertex
            ),
            CompileError::OutOfBounds {
                polyline,
                vertex,
                x,
                y,
            } => write!(
                f,
                "polyline {} vertex {} at ({:.2}, {:.2}) is outside the soft limits",
                polyline, vertex, x, y
            ),
            CompileError::TooLong { total_mm, max_mm } => write!(
                f,
                "total path length {:.1} mm exceeds the {:.1} mm limit",
                total_mm, max_mm
            ),
            CompileError::TooManyVertices { count, max } => {
                write!(f, "{} vertices exceed the limit of {}", count, max)
            }
            CompileError::BadFeed { polyline, feed } => match polyline {
                Some(i) => write!(f, "polyline {} has non-positive feed {}", i, feed),
                None => write!(f, "rapid feed {} is not positive", feed),
            },
        }
    }
}

impl std::error::Error for CompileError {}

/// Compile a drawing into a streamable SSG job.
///
/// The first line is an out-of-band `N0 G28`: homing must execute no matter
/// where a previous job left the controller's sequence tracker, and it
/// resets the tracker on completion, so the numbered lines that follow
/// start at `N1`. The line at index `i > 0` therefore carries sequence
/// number `i`, which is what lets a resuming host map `last_ack` straight
/// back to an index.
pub fn compile(drawing: &Drawing, config: &CompilerConfig) -> Result<CompiledJob, CompileError> {
    validate(drawing, config)?;

    let mut polylines: Vec<Polyline> = drawing.polylines.clone();
    if config.simplify_epsilon > 0.0 {
        for polyline in &mut polylines {
            polyline.points =
                simplify::ramer_douglas_peucker(&polyline.points, config.simplify_epsilon);
        }
    }

    let origin = Position::new(0.0, 0.0);
    let ordered = order::order_polylines(polylines, origin, config.two_opt);

    let mut lines = Vec::new();
    let mut rapid_moves = 0;
    let mut draw_moves = 0;

    lines.push(CommandLine::new(0, Command::Home).to_string());

    // Homing resets the sequence tracker, so numbering starts after it.
    let mut seq = 1u32;
    let mut push = |command: Command, lines: &mut Vec<String>| {
        lines.push(CommandLine::new(seq, command).to_string());
        seq += 1;
    };

    for polyline in &ordered {
        let first = polyline.points[0];
        push(
            Command::Rapid {
                x: Some(first.x),
                y: Some(first.y),
                feed: Some(drawing.rapid_feed),
            },
            &mut lines,
        );
        rapid_moves += 1;
        push(
            Command::FlowOn {
                duty: polyline.flow_duty,
            },
            &mut lines,
        );
        for point in &polyline.points[1..] {
            push(
                Command::Draw {
                    x: Some(point.x),
                    y: Some(point.y),
                    feed: Some(polyline.feed_rate),
                },
                &mut lines,
            );
            draw_moves += 1;
        }
        push(Command::FlowOff, &mut lines);
    }

    if config.park {
        push(
            Command::Rapid {
                x: Some(0.0),
                y: Some(0.0),
                feed: Some(drawing.rapid_feed),
            },
            &mut lines,
        );
        rapid_moves += 1;
    }
    if config.report_position {
        push(Command::ReportPos, &mut lines);
    }

    let draw_length_mm: f64 = ordered.iter().map(|p| p.length()).sum();
    let mut travel_length_mm = travel_length(&ordered, origin);
    if config.park {
        if let Some(last) = ordered.last().and_then(|p| p.points.last()) {
            travel_length_mm += last.distance_to(origin);
        }
    }
    let estimated_secs = ordered
        .iter()
        .map(|p| p.length() / (p.feed_rate / 60.0))
        .sum::<f64>()
        + travel_length_mm / (drawing.rapid_feed / 60.0);

    Ok(CompiledJob {
        stats: CompileStats {
            commands: lines.len(),
            rapid_moves,
            draw_moves,
            draw_length_mm,
            travel_length_mm,
            estimated_secs,
        },
        lines,
    })
}

fn validate(drawing: &Drawing, config: &CompilerConfig) -> Result<(), CompileError> {
    if drawing.polylines.is_empty() {
        return Err(CompileError::EmptyDrawing);
    }
    if drawing.rapid_feed <= 0.0 {
        return Err(CompileError::BadFeed {
            polyline: None,
            feed: drawing.rapid_feed,
        });
    }

    for (pi, polyline) in drawing.polylines.iter().enumerate() {
        if polyline.points.len() < 2 {
            return Err(CompileError::TooFewPoints { polyline: pi });
        }
        if polyline.feed_rate <= 0.0 {
            return Err(CompileError::BadFeed {
                polyline: Some(pi),
                feed: polyline.feed_rate,
            });
        }
        for (vi, point) in polyline.points.iter().enumerate() {
            if !drawing.soft_limits.contains(*point) {
                return Err(CompileError::OutOfBounds {
                    polyline: pi,
                    vertex: vi,
                    x: point.x,
                    y: point.y,
                });
            }
            if vi > 0 && *point == polyline.points[vi - 1] {
                return Err(CompileError::CoincidentPoints {
                    polyline: pi,
                    vertex: vi,
                });
            }
        }
    }

    let vertices = drawing.total_vertices();
    if vertices > config.max_vertices {
        return Err(CompileError::TooManyVertices {
            count: vertices,
            max: config.max_vertices,
        });
    }
    let total = drawing.total_draw_length();
    if total > config.max_total_length_mm {
        return Err(CompileError::TooLong {
            total_mm: total,
            max_mm: config.max_total_length_mm,
        });
    }
    Ok(())
}
