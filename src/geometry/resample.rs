// src/geometry/resample.rs - Arc-length resampling and simplification
use serde::Serialize;

use super::{polyline_length, GeometryError, Pattern, Point};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResampleReport {
    pub strokes: usize,
    pub points_before: usize,
    pub points_after: usize,
}

impl std::fmt::Display for ResampleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resample: {} strokes, points {} -> {}",
            self.strokes, self.points_before, self.points_after
        )
    }
}

/// Upper bound on the points a single resample pass may produce.
pub const MAX_RESAMPLE_POINTS: usize = 1_000_000;

/// Segments needed to cover `points` at `spacing`, counted in `f64` so a
/// tiny spacing cannot overflow.
fn segments_needed(points: &[Point], spacing: f64) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let total = polyline_length(points);
    if total < spacing || total == 0.0 {
        1.0
    } else {
        (total / spacing).ceil()
    }
}

/// Replace `points` with evenly spaced points along its arc length.
///
/// Every output point lies on the input polyline and consecutive points are
/// at most `spacing` apart along it. Endpoints are copied exactly. A path
/// shorter than `spacing` collapses to its two endpoints; a single point is
/// returned unchanged. Fails when the result would exceed
/// [`MAX_RESAMPLE_POINTS`].
pub fn resample_points(points: &[Point], spacing: f64) -> Result<Vec<Point>, GeometryError> {
    if !(spacing > 0.0) || !spacing.is_finite() {
        return Err(GeometryError::NonPositive {
            name: "spacing",
            value: spacing,
        });
    }
    let (Some(&first), Some(&last)) = (points.first(), points.last()) else {
        return Ok(Vec::new());
    };
    if points.len() == 1 {
        return Ok(vec![first]);
    }
    let needed = segments_needed(points, spacing);
    if needed + 1.0 > MAX_RESAMPLE_POINTS as f64 {
        return Err(GeometryError::TooManyPoints {
            requested: needed + 1.0,
            limit: MAX_RESAMPLE_POINTS,
        });
    }
    let total = polyline_length(points);
    if needed <= 1.0 {
        return Ok(vec![first, last]);
    }

    let n = needed as usize;
    let step = total / n as f64;
    let mut out = Vec::with_capacity(n + 1);
    out.push(first);

    // walk the segments once, emitting a point every `step`
    let mut seg = 0usize;
    let mut seg_start_dist = 0.0;
    let mut seg_len = points[0].distance(&points[1]);
    for k in 1..n {
        let target = step * k as f64;
        while seg_start_dist + seg_len < target && seg + 2 < points.len() {
            seg_start_dist += seg_len;
            seg += 1;
            seg_len = points[seg].distance(&points[seg + 1]);
        }
        let t = if seg_len > 0.0 {
            ((target - seg_start_dist) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(points[seg].lerp(&points[seg + 1], t));
    }
    out.push(last);
    Ok(out)
}

/// Ramer-Douglas-Peucker simplification; endpoints are always kept.
pub fn simplify_points(points: &[Point], max_dev: f64) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((i0, i1)) = stack.pop() {
        let mut max_d = -1.0;
        let mut idx = None;
        for i in (i0 + 1)..i1 {
            let d = distance_to_segment(points[i], points[i0], points[i1]);
            if d > max_d {
                max_d = d;
                idx = Some(i);
            }
        }
        if let Some(i) = idx {
            if max_d > max_dev {
                keep[i] = true;
                stack.push((i0, i));
                stack.push((i, i1));
            }
        }
    }
    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Shortest distance from `p` to the segment `a`-`b`.
pub fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return p.distance(&a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance(&a.lerp(&b, t))
}

/// Shortest distance from `p` to any segment of `polyline`.
pub fn distance_to_polyline(p: Point, polyline: &[Point]) -> f64 {
    match polyline {
        [] => f64::INFINITY,
        [only] => p.distance(only),
        _ => polyline
            .windows(2)
            .map(|w| distance_to_segment(p, w[0], w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

impl Pattern {
    pub fn resample_polylines(&mut self, target_spacing: f64) -> Result<ResampleReport, GeometryError> {
        if !(target_spacing > 0.0) || !target_spacing.is_finite() {
            return Err(GeometryError::NonPositive {
                name: "target_spacing",
                value: target_spacing,
            });
        }
        // check the whole pattern up front so a rejected pass leaves it untouched
        let requested: f64 = self
            .strokes
            .iter()
            .map(|s| segments_needed(&s.points, target_spacing) + 1.0)
            .sum();
        if requested > MAX_RESAMPLE_POINTS as f64 {
            return Err(GeometryError::TooManyPoints {
                requested,
                limit: MAX_RESAMPLE_POINTS,
            });
        }
        let points_before = self.point_count();
        for stroke in &mut self.strokes {
            stroke.points = resample_points(&stroke.points, target_spacing)?;
        }
        Ok(ResampleReport {
            strokes: self.strokes.len(),
            points_before,
            points_after: self.point_count(),
        })
    }

    pub fn simplify(&mut self, max_dev: f64) -> Result<ResampleReport, GeometryError> {
        if !(max_dev > 0.0) {
            return Err(GeometryError::NonPositive {
                name: "max_dev",
                value: max_dev,
            });
        }
        let points_before = self.point_count();
        for stroke in &mut self.strokes {
            stroke.points = simplify_points(&stroke.points, max_dev);
        }
        Ok(ResampleReport {
            strokes: self.strokes.len(),
            points_before,
            points_after: self.point_count(),
        })
    }
}
