// src/geometry/order.rs - Stroke ordering and chain merging
use serde::Serialize;

use super::{Pattern, Point, Stroke};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderReport {
    pub travel_before: f64,
    pub travel_after: f64,
    pub reversed: usize,
}

impl OrderReport {
    pub fn saved(&self) -> f64 {
        (self.travel_before - self.travel_after).max(0.0)
    }
}

impl std::fmt::Display for OrderReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = if self.travel_before > 0.0 {
            self.saved() / self.travel_before * 100.0
        } else {
            0.0
        };
        write!(
            f,
            "Optimize order: travel {:.2} -> {:.2} mm, saved {:.2} mm ({:.1}%)",
            self.travel_before,
            self.travel_after,
            self.saved(),
            pct
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MergeReport {
    pub strokes_before: usize,
    pub strokes_after: usize,
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Combine endpoints: strokes {} -> {}, pen lifts saved {}",
            self.strokes_before,
            self.strokes_after,
            self.strokes_before.saturating_sub(self.strokes_after)
        )
    }
}

pub(crate) fn travel_distance(strokes: &[Stroke], start: Point) -> f64 {
    let mut cur = start;
    let mut total = 0.0;
    for stroke in strokes {
        let (Some(first), Some(last)) = (stroke.first(), stroke.last()) else {
            continue;
        };
        total += cur.distance(&first);
        cur = last;
    }
    total
}

/// Greedy nearest-neighbour order starting at `start`.
///
/// Returns (original index, reversed) pairs. Ties keep the lower original index.
fn nearest_neighbour_order(strokes: &[Stroke], start: Point) -> Vec<(usize, bool)> {
    let mut remaining: Vec<usize> = (0..strokes.len()).collect();
    let mut order = Vec::with_capacity(strokes.len());
    let mut cur = start;

    while !remaining.is_empty() {
        let mut best: Option<(usize, f64, bool)> = None;
        for (slot, &idx) in remaining.iter().enumerate() {
            let stroke = &strokes[idx];
            let (Some(head), Some(tail)) = (stroke.first(), stroke.last()) else {
                continue;
            };
            let d_fwd = cur.distance(&head);
            let d_rev = cur.distance(&tail);
            let (cost, rev) = if d_fwd <= d_rev { (d_fwd, false) } else { (d_rev, true) };
            if best.is_none_or(|(_, c, _)| cost < c) {
                best = Some((slot, cost, rev));
            }
        }
        let Some((slot, _, rev)) = best else {
            // only empty strokes left; keep them in their original order
            order.extend(remaining.drain(..).map(|idx| (idx, false)));
            break;
        };
        let idx = remaining.remove(slot);
        let stroke = &strokes[idx];
        if let Some(far) = if rev { stroke.first() } else { stroke.last() } {
            cur = far;
        }
        order.push((idx, rev));
    }
    order
}

impl Pattern {
    /// Reorder strokes with a greedy nearest-neighbour walk from `start`.
    ///
    /// The identity order is kept whenever the greedy walk would travel further.
    pub fn optimize_order_nn(&mut self, start: Point) -> OrderReport {
        let travel_before = self.travel_distance(start);
        let order = nearest_neighbour_order(&self.strokes, start);
        let travel_after = ordered_travel(&self.strokes, &order, start);
        if travel_after > travel_before {
            return OrderReport {
                travel_before,
                travel_after: travel_before,
                reversed: 0,
            };
        }

        let mut slots: Vec<Option<Stroke>> = self.strokes.drain(..).map(Some).collect();
        let mut reversed = 0;
        for (idx, rev) in order {
            if let Some(mut stroke) = slots[idx].take() {
                if rev {
                    stroke.reverse();
                    reversed += 1;
                }
                self.strokes.push(stroke);
            }
        }
        OrderReport {
            travel_before,
            travel_after,
            reversed,
        }
    }

    /// Merge same-pen strokes whose tail meets another stroke's head within `tolerance`.
    ///
    /// The junction point of the appended stroke is dropped. Colour and width
    /// come from the first stroke of each chain.
    pub fn merge_chains(&mut self, tolerance: f64) -> MergeReport {
        let strokes_before = self.strokes.len();
        let mut chains: Vec<Option<Stroke>> = self.strokes.drain(..).map(Some).collect();
        let mut merged = Vec::with_capacity(chains.len());

        for i in 0..chains.len() {
            let Some(mut chain) = chains[i].take() else {
                continue;
            };
            loop {
                let Some(tail) = chain.last() else {
                    break;
                };
                let next = chains.iter().position(|c| {
                    c.as_ref().is_some_and(|c| {
                        c.pen == chain.pen && c.first().is_some_and(|head| head.distance(&tail) <= tolerance)
                    })
                });
                match next.and_then(|j| chains[j].take()) {
                    Some(other) => chain.points.extend(other.points.into_iter().skip(1)),
                    None => break,
                }
            }
            merged.push(chain);
        }

        self.strokes = merged;
        MergeReport {
            strokes_before,
            strokes_after: self.strokes.len(),
        }
    }
}

fn ordered_travel(strokes: &[Stroke], order: &[(usize, bool)], start: Point) -> f64 {
    let mut cur = start;
    let mut total = 0.0;
    for &(idx, rev) in order {
        let stroke = &strokes[idx];
        let (Some(head), Some(tail)) = (stroke.first(), stroke.last()) else {
            continue;
        };
        let (entry, exit) = if rev { (tail, head) } else { (head, tail) };
        total += cur.distance(&entry);
        cur = exit;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(pts: &[(f64, f64)], pen: u32) -> Stroke {
        Stroke::new(pts.iter().map(|&p| p.into()).collect(), pen)
    }

    #[test]
    fn test_nn_reverses_when_tail_is_closer() {
        let mut p = Pattern::from_strokes(vec![
            stroke(&[(50.0, 0.0), (60.0, 0.0)], 0),
            stroke(&[(10.0, 0.0), (1.0, 0.0)], 0),
        ]);
        let report = p.optimize_order_nn(Point::ORIGIN);
        assert_eq!(p.strokes[0].points[0], Point::new(1.0, 0.0));
        assert_eq!(p.strokes[1].points[0], Point::new(50.0, 0.0));
        assert_eq!(report.reversed, 1);
        assert!(report.travel_after <= report.travel_before);
    }

    #[test]
    fn test_nn_ties_keep_original_index() {
        let mut p = Pattern::from_strokes(vec![
            stroke(&[(5.0, 0.0), (5.0, 1.0)], 0).with_color("a"),
            stroke(&[(0.0, 5.0), (1.0, 5.0)], 0).with_color("b"),
        ]);
        p.optimize_order_nn(Point::ORIGIN);
        assert_eq!(p.strokes[0].color.as_deref(), Some("a"));
    }

    #[test]
    fn test_merge_chains_joins_matching_endpoints() {
        let mut p = Pattern::from_strokes(vec![
            stroke(&[(0.0, 0.0), (1.0, 0.0)], 0),
            stroke(&[(5.0, 5.0), (6.0, 6.0)], 0),
            stroke(&[(1.0, 0.01), (2.0, 0.0)], 0),
            stroke(&[(2.0, 0.0), (3.0, 0.0)], 1),
        ]);
        let report = p.merge_chains(0.05);
        assert_eq!(report.strokes_before, 4);
        assert_eq!(report.strokes_after, 3);
        assert_eq!(p.strokes[0].points.len(), 3);
        assert_eq!(p.strokes[0].points[2], Point::new(2.0, 0.0));
        // different pen is never merged
        assert_eq!(p.strokes[2].pen, 1);
    }
}
