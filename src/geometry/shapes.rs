// src/geometry/shapes.rs - Primitive shapes converted to polylines on insertion
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::{GeometryError, Point};

/// Minimum number of segments for a full circle.
pub const MIN_CIRCLE_SEGMENTS: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Line {
        start: Point,
        end: Point,
    },
    /// Circle or arc. Angles in degrees, counter-clockwise from +X.
    Circle {
        center: Point,
        radius: f64,
        #[serde(default)]
        start_deg: f64,
        #[serde(default = "full_sweep")]
        sweep_deg: f64,
    },
    Polyline {
        points: Vec<Point>,
    },
}

fn full_sweep() -> f64 {
    360.0
}

impl Shape {
    pub fn line(start: impl Into<Point>, end: impl Into<Point>) -> Self {
        Shape::Line {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn circle(center: impl Into<Point>, radius: f64) -> Self {
        Shape::Circle {
            center: center.into(),
            radius,
            start_deg: 0.0,
            sweep_deg: 360.0,
        }
    }

    pub fn arc(center: impl Into<Point>, radius: f64, start_deg: f64, sweep_deg: f64) -> Self {
        Shape::Circle {
            center: center.into(),
            radius,
            start_deg,
            sweep_deg,
        }
    }

    pub fn polyline(points: Vec<Point>) -> Self {
        Shape::Polyline { points }
    }

    /// Convert to points. Curves are sampled so the chord error stays below `tolerance`.
    pub fn to_polyline(&self, tolerance: f64) -> Result<Vec<Point>, GeometryError> {
        match self {
            Shape::Line { start, end } => Ok(vec![*start, *end]),
            Shape::Polyline { points } => {
                if points.is_empty() {
                    return Err(GeometryError::InvalidShape("polyline has no points".into()));
                }
                Ok(points.clone())
            }
            Shape::Circle {
                center,
                radius,
                start_deg,
                sweep_deg,
            } => sample_arc(*center, *radius, *start_deg, *sweep_deg, tolerance),
        }
    }
}

/// Segments needed for a full circle so that `r * (1 - cos(pi / n)) <= tolerance`.
pub fn circle_segments(radius: f64, tolerance: f64) -> usize {
    let ratio = (1.0 - tolerance / radius).clamp(-1.0, 1.0);
    let max_half_angle = ratio.acos();
    if max_half_angle <= 0.0 {
        // tolerance too small to represent; cap rather than loop forever
        return 1 << 16;
    }
    let n = (PI / max_half_angle).ceil() as usize;
    n.clamp(MIN_CIRCLE_SEGMENTS, 1 << 16)
}

fn sample_arc(
    center: Point,
    radius: f64,
    start_deg: f64,
    sweep_deg: f64,
    tolerance: f64,
) -> Result<Vec<Point>, GeometryError> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Err(GeometryError::InvalidShape(format!("circle radius must be > 0 (got {radius})")));
    }
    if !(tolerance > 0.0) {
        return Err(GeometryError::NonPositive {
            name: "tolerance",
            value: tolerance,
        });
    }
    if sweep_deg == 0.0 || !sweep_deg.is_finite() {
        return Err(GeometryError::InvalidShape("arc sweep must be non-zero".into()));
    }

    let full = circle_segments(radius, tolerance);
    let closed = sweep_deg.abs() >= 360.0;
    let sweep_deg = sweep_deg.clamp(-360.0, 360.0);
    let n = if closed {
        full
    } else {
        ((full as f64) * sweep_deg.abs() / 360.0).ceil().max(1.0) as usize
    };

    let start = start_deg.to_radians();
    let sweep = sweep_deg.to_radians();
    let mut points: Vec<Point> = (0..=n)
        .map(|k| {
            let a = start + sweep * (k as f64 / n as f64);
            Point::new(center.x + radius * a.cos(), center.y + radius * a.sin())
        })
        .collect();
    if closed {
        points[n] = points[0];
    }
    Ok(points)
}
