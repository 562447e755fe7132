//! Polyline ordering to minimize rapid travel.
//!
//! Nearest-neighbor over entry candidates: an open polyline may be entered
//! from either end (the other end becomes the exit), a closed polyline from
//! any vertex. An optional 2-opt pass untangles the worst of the greedy
//! choices. All tie-breaking is index-ordered so output is deterministic.

use crate::drawing::Polyline;
use crate::Position;

pub(crate) fn order_polylines(
    polylines: Vec<Polyline>,
    start: Position,
    two_opt: bool,
) -> Vec<Polyline> {
    if polylines.len() <= 1 {
        return polylines;
    }

    let mut remaining = polylines;
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut cursor = start;

    while !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_entry = Entry::Forward;
        let mut best_dist = f64::INFINITY;

        for (i, polyline) in remaining.iter().enumerate() {
            for entry in entry_candidates(polyline) {
                let d = cursor.distance_to(entry.point(polyline));
                if d < best_dist {
                    best_dist = d;
                    best_index = i;
                    best_entry = entry;
                }
            }
        }

        let polyline = best_entry.apply(remaining.remove(best_index));
        cursor = *polyline.points.last().expect("polyline has points");
        ordered.push(polyline);
    }

    if two_opt {
        improve_order(&mut ordered, start);
    }
    ordered
}

/// Total rapid travel for a given order: home to the first entry, then each
/// exit to the next entry.
pub fn travel_length(ordered: &[Polyline], start: Position) -> f64 {
    let mut cursor = start;
    let mut total = 0.0;
    for polyline in ordered {
        total += cursor.distance_to(polyline.points[0]);
        cursor = *polyline.points.last().expect("polyline has points");
    }
    total
}

#[derive(Clone, Copy, Debug)]
enum Entry {
    Forward,
    Reversed,
    /// Closed polyline rotated to start at this ring vertex.
    Rotated(usize),
}

impl Entry {
    fn point(&self, polyline: &Polyline) -> Position {
        match self {
            Entry::Forward => polyline.points[0],
            Entry::Reversed => *polyline.points.last().expect("polyline has points"),
            Entry::Rotated(k) => polyline.points[*k],
        }
    }

    fn apply(&self, mut polyline: Polyline) -> Polyline {
        match self {
            Entry::Forward => polyline,
            Entry::Reversed => {
                polyline.points.reverse();
                polyline
            }
            Entry::Rotated(k) => {
                let ring = &polyline.points[..polyline.points.len() - 1];
                let mut rotated: Vec<Position> = Vec::with_capacity(polyline.points.len());
                rotated.extend_from_slice(&ring[*k..]);
                rotated.extend_from_slice(&ring[..*k]);
                rotated.push(rotated[0]);
                polyline.points = rotated;
                polyline
            }
        }
    }
}

fn entry_candidates(polyline: &Polyline) -> Vec<Entry> {
    if polyline.is_closed() {
        (0..polyline.points.len() - 1).map(Entry::Rotated).collect()
    } else {
        vec![Entry::Forward, Entry::Reversed]
    }
}

/// Reverse the drawing direction without moving the entry vertex of a
/// closed polyline.
fn flip(polyline: &mut Polyline) {
    if polyline.is_closed() {
        // [p0, p1, .., pn, p0] becomes [p0, pn, .., p1, p0].
        let ring_len = polyline.points.len() - 1;
        polyline.points[1..ring_len].reverse();
    } else {
        polyline.points.reverse();
    }
}

/// First-improvement 2-opt on the polyline order. Reversing a sub-range also
/// flips each polyline in it, so entry and exit swap for open polylines.
fn improve_order(ordered: &mut Vec<Polyline>, start: Position) {
    const MAX_PASSES: usize = 8;
    let n = ordered.len();
    if n < 2 {
        return;
    }

    for _ in 0..MAX_PASSES {
        let mut improved = false;
        for i in 0..n - 1 {
            for j in i + 1..n {
                let a = if i == 0 {
                    start
                } else {
                    *ordered[i - 1].points.last().expect("polyline has points")
                };
                let b = ordered[i].points[0];
                let c = *ordered[j].points.last().expect("polyline has points");
                let old = a.distance_to(b)
                    + ordered
                        .get(j + 1)
                        .map(|next| c.distance_to(next.points[0]))
                        .unwrap_or(0.0);
                let new = a.distance_to(c)
                    + ordered
                        .get(j + 1)
                        .map(|next| b.distance_to(next.points[0]))
                        .unwrap_or(0.0);
                if new + 1e-9 < old {
                    ordered[i..=j].reverse();
                    for polyline in &mut ordered[i..=j] {
                        flip(polyline);
                    }
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }
}
