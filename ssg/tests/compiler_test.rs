/// Compiler contract tests: determinism, per-polyline structure, validation
/// diagnostics, and travel-reducing ordering.

use ssg::command::{parse_line, Command};
use ssg::compiler::{compile, travel_length, CompileError, CompilerConfig};
use ssg::config::SoftLimits;
use ssg::drawing::{Drawing, Polyline};
use ssg::Position;

fn poly(points: &[(f64, f64)], duty: u8, feed: f64) -> Polyline {
    Polyline::new(
        points.iter().map(|&(x, y)| Position::new(x, y)).collect(),
        duty,
        feed,
    )
}

fn drawing(polylines: Vec<Polyline>) -> Drawing {
    Drawing {
        plate_radius_mm: 110.0,
        soft_limits: SoftLimits::default(),
        rapid_feed: 3000.0,
        polylines,
    }
}

fn sample_drawing() -> Drawing {
    drawing(vec![
        poly(&[(40.0, 40.0), (50.0, 40.0), (50.0, 50.0)], 60, 600.0),
        poly(&[(5.0, 5.0), (15.0, 5.0)], 40, 900.0),
        poly(
            &[
                (70.0, 70.0),
                (80.0, 70.0),
                (80.0, 80.0),
                (70.0, 80.0),
                (70.0, 70.0),
            ],
            80,
            600.0,
        ),
    ])
}

#[test]
fn compilation_is_deterministic() {
    let config = CompilerConfig {
        two_opt: true,
        simplify_epsilon: 0.15,
        park: true,
        ..Default::default()
    };
    let a = compile(&sample_drawing(), &config).unwrap();
    let b = compile(&sample_drawing(), &config).unwrap();
    assert_eq!(a.lines, b.lines);
    assert_eq!(a.stats, b.stats);
}

#[test]
fn job_opens_out_of_band_homing_and_numbers_from_one() {
    let job = compile(&sample_drawing(), &CompilerConfig::default()).unwrap();
    // Out-of-band so it executes regardless of where a previous job left
    // the controller's sequence tracker.
    assert_eq!(job.lines[0], "N0 G28");
    // Homing resets the tracker, so line i carries sequence i from then on.
    for (i, line) in job.lines.iter().enumerate().skip(1) {
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.seq as usize, i, "line {} misnumbered: {}", i, line);
    }
}

#[test]
fn one_flow_pair_per_polyline_in_emission_order() {
    let input = sample_drawing();
    let job = compile(&input, &CompilerConfig::default()).unwrap();

    let mut flow_on = 0;
    let mut flow_off = 0;
    let mut pump_on = false;
    for line in &job.lines {
        match parse_line(line).unwrap().command {
            Command::FlowOn { .. } => {
                assert!(!pump_on, "M3 while pump already on");
                pump_on = true;
                flow_on += 1;
            }
            Command::FlowOff => {
                assert!(pump_on, "M5 while pump already off");
                pump_on = false;
                flow_off += 1;
            }
            Command::Rapid { .. } => {
                assert!(!pump_on, "travel with pump on");
            }
            Command::Draw { .. } => {
                assert!(pump_on, "drawing with pump off");
            }
            _ => {}
        }
    }
    assert_eq!(flow_on, input.polylines.len());
    assert_eq!(flow_off, input.polylines.len());
    assert!(!pump_on);
}

#[test]
fn output_references_only_input_points() {
    let input = sample_drawing();
    let job = compile(&input, &CompilerConfig::default()).unwrap();

    let mut input_points: Vec<(i64, i64)> = Vec::new();
    for polyline in &input.polylines {
        for p in &polyline.points {
            input_points.push(((p.x * 100.0).round() as i64, (p.y * 100.0).round() as i64));
        }
    }

    for line in &job.lines {
        if let Command::Rapid { x, y, .. } | Command::Draw { x, y, .. } =
            parse_line(line).unwrap().command
        {
            let key = (
                (x.unwrap() * 100.0).round() as i64,
                (y.unwrap() * 100.0).round() as i64,
            );
            assert!(
                input_points.contains(&key),
                "{} targets a point not in the input",
                line
            );
        }
    }
}

#[test]
fn park_and_position_report_are_appended() {
    let config = CompilerConfig {
        park: true,
        report_position: true,
        ..Default::default()
    };
    let job = compile(&sample_drawing(), &config).unwrap();
    let n = job.lines.len();
    let park = parse_line(&job.lines[n - 2]).unwrap();
    assert_eq!(
        park.command,
        Command::Rapid {
            x: Some(0.0),
            y: Some(0.0),
            feed: Some(3000.0)
        }
    );
    assert_eq!(parse_line(&job.lines[n - 1]).unwrap().command, Command::ReportPos);
}

#[test]
fn ordering_reduces_travel() {
    let input = sample_drawing();
    let naive = travel_length(&input.polylines, Position::new(0.0, 0.0));
    let job = compile(&input, &CompilerConfig::default()).unwrap();
    assert!(job.stats.travel_length_mm <= naive + 1e-9);
}

#[test]
fn out_of_bounds_vertex_is_reported_with_indices() {
    let input = drawing(vec![
        poly(&[(0.0, 0.0), (10.0, 0.0)], 60, 600.0),
        poly(&[(10.0, 10.0), (20.0, 10.0), (130.0, 10.0)], 60, 600.0),
    ]);
    let err = compile(&input, &CompilerConfig::default()).unwrap_err();
    assert_eq!(
        err,
        CompileError::OutOfBounds {
            polyline: 1,
            vertex: 2,
            x: 130.0,
            y: 10.0
        }
    );
}

#[test]
fn boundary_points_are_accepted() {
    let input = drawing(vec![poly(&[(120.0, 120.0), (-120.0, -120.0)], 60, 600.0)]);
    // Path length is long; raise the cap so only the bounds are under test.
    let config = CompilerConfig {
        max_total_length_mm: 10_000.0,
        ..Default::default()
    };
    assert!(compile(&input, &config).is_ok());
}

#[test]
fn vertex_budget_is_enforced() {
    let points: Vec<(f64, f64)> = (0..2001).map(|i| (i as f64 * 0.01, 0.0)).collect();
    let input = drawing(vec![poly(&points, 60, 600.0)]);
    let config = CompilerConfig {
        max_vertices: 2000,
        ..Default::default()
    };
    let err = compile(&input, &config).unwrap_err();
    assert_eq!(
        err,
        CompileError::TooManyVertices {
            count: 2001,
            max: 2000
        }
    );
}

#[test]
fn total_length_budget_is_enforced() {
    let mut polylines = Vec::new();
    for i in 0..20 {
        let y = i as f64;
        polylines.push(poly(&[(-100.0, y), (100.0, y)], 60, 600.0));
    }
    let input = drawing(polylines);
    let err = compile(&input, &CompilerConfig::default()).unwrap_err();
    match err {
        CompileError::TooLong { total_mm, max_mm } => {
            assert_eq!(max_mm, 3000.0);
            assert!(total_mm > max_mm);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn degenerate_polylines_are_rejected() {
    let single = drawing(vec![poly(&[(10.0, 10.0)], 60, 600.0)]);
    assert_eq!(
        compile(&single, &CompilerConfig::default()).unwrap_err(),
        CompileError::TooFewPoints { polyline: 0 }
    );

    let coincident = drawing(vec![poly(
        &[(10.0, 10.0), (20.0, 10.0), (20.0, 10.0)],
        60,
        600.0,
    )]);
    assert_eq!(
        compile(&coincident, &CompilerConfig::default()).unwrap_err(),
        CompileError::CoincidentPoints {
            polyline: 0,
            vertex: 2
        }
    );
}

#[test]
fn simplification_prunes_collinear_vertices() {
    let dense: Vec<(f64, f64)> = (0..=100).map(|i| (i as f64, 30.0)).collect();
    let input = drawing(vec![poly(&dense, 60, 600.0)]);
    let plain = compile(&input, &CompilerConfig::default()).unwrap();
    let simplified = compile(
        &input,
        &CompilerConfig {
            simplify_epsilon: 0.15,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(simplified.stats.draw_moves < plain.stats.draw_moves);
    assert_eq!(simplified.stats.draw_moves, 1);
    // Geometry endpoints survive.
    let last_draw = simplified
        .lines
        .iter()
        .filter_map(|l| match parse_line(l).unwrap().command {
            Command::Draw { x, y, .. } => Some((x.unwrap(), y.unwrap())),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_draw, (100.0, 30.0));
}

#[test]
fn empty_drawing_is_rejected() {
    let input = drawing(Vec::new());
    assert_eq!(
        compile(&input, &CompilerConfig::default()).unwrap_err(),
        CompileError::EmptyDrawing
    );
}
