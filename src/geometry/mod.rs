// src/geometry/mod.rs - Pattern model and toolpath geometry
//!
//! A [`Pattern`] is an ordered list of [`Stroke`]s. Stroke order is plotting
//! order; only the explicit optimisation passes ([`Pattern::optimize_order_nn`],
//! [`Pattern::merge_chains`]) reorder or restructure it.

pub mod color;
pub mod order;
pub mod resample;
pub mod shapes;
pub mod transform;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use color::{group_by_color, ColorGroups, ColoredPath};
pub use order::{MergeReport, OrderReport};
pub use resample::ResampleReport;
pub use shapes::Shape;
pub use transform::Transform;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("Stroke {index} has no points")]
    EmptyStroke { index: usize },
    #[error("Non-finite coordinate in stroke {index}")]
    NonFinite { index: usize },
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
    #[error("{name} must be > 0 (got {value})")]
    NonPositive { name: &'static str, value: f64 },
    #[error("Resampling would produce {requested:.0} points (limit {limit})")]
    TooManyPoints { requested: f64, limit: usize },
}

/// Workspace coordinate in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point::new(self.x + (other.x - self.x) * t, self.y + (other.y - self.y) * t)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from(v: [f64; 2]) -> Self {
        Point::new(v[0], v[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from(v: (f64, f64)) -> Self {
        Point::new(v.0, v.1)
    }
}

/// One continuous pen-down path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    #[serde(default)]
    pub pen: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

impl Stroke {
    pub fn new(points: Vec<Point>, pen: u32) -> Self {
        Self {
            points,
            pen,
            color: None,
            width: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }

    pub fn first(&self) -> Option<Point> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<Point> {
        self.points.last().copied()
    }

    /// Number of point-to-point segments (0 for a dot).
    pub fn segment_count(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    pub fn length(&self) -> f64 {
        polyline_length(&self.points)
    }

    pub fn reverse(&mut self) {
        self.points.reverse();
    }
}

pub(crate) fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

/// Axis-aligned bounds as (min, max).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(default)]
    pub strokes: Vec<Stroke>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_strokes(strokes: Vec<Stroke>) -> Self {
        Self { strokes }
    }

    /// Parse the `{strokes:[...]}` JSON shape and validate it.
    pub fn from_json(json: &str) -> Result<Self, PatternParseError> {
        let pattern: Pattern = serde_json::from_str(json)?;
        pattern.validate()?;
        Ok(pattern)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Every stroke needs at least one finite point.
    pub fn validate(&self) -> Result<(), GeometryError> {
        for (index, stroke) in self.strokes.iter().enumerate() {
            if stroke.points.is_empty() {
                return Err(GeometryError::EmptyStroke { index });
            }
            if !stroke.points.iter().all(Point::is_finite) {
                return Err(GeometryError::NonFinite { index });
            }
        }
        Ok(())
    }

    /// Convert a shape into strokes and append them.
    pub fn add(&mut self, shape: &Shape, pen: u32, tolerance: f64) -> Result<&mut Self, GeometryError> {
        let points = shape.to_polyline(tolerance)?;
        self.strokes.push(Stroke::new(points, pen));
        Ok(self)
    }

    pub fn push(&mut self, stroke: Stroke) -> &mut Self {
        self.strokes.push(stroke);
        self
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stroke> {
        self.strokes.iter()
    }

    pub fn point_count(&self) -> usize {
        self.strokes.iter().map(|s| s.points.len()).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.strokes.iter().map(Stroke::segment_count).sum()
    }

    /// Sum of per-segment Euclidean lengths, in mm.
    pub fn total_length(&self) -> f64 {
        self.strokes.iter().map(Stroke::length).sum()
    }

    /// Pen-up travel from `start` through every stroke in order.
    pub fn travel_distance(&self, start: Point) -> f64 {
        order::travel_distance(&self.strokes, start)
    }

    pub fn bounding_box(&self) -> Option<Bounds> {
        let mut points = self.strokes.iter().flat_map(|s| s.points.iter());
        let first = points.next()?;
        let mut bounds = Bounds {
            min: *first,
            max: *first,
        };
        for p in points {
            bounds.min.x = bounds.min.x.min(p.x);
            bounds.min.y = bounds.min.y.min(p.y);
            bounds.max.x = bounds.max.x.max(p.x);
            bounds.max.y = bounds.max.y.max(p.y);
        }
        Some(bounds)
    }

    /// True when every point lies inside `[0,width] x [0,height]`.
    pub fn fits_bed(&self, width: f64, height: f64) -> bool {
        const EPS: f64 = 1e-6;
        match self.bounding_box() {
            None => true,
            Some(b) => {
                b.min.x >= -EPS && b.min.y >= -EPS && b.max.x <= width + EPS && b.max.y <= height + EPS
            }
        }
    }

    pub fn transform(&mut self, transform: &Transform) {
        for stroke in &mut self.strokes {
            for p in &mut stroke.points {
                *p = transform.apply(*p);
            }
        }
    }
}

impl<'a> IntoIterator for &'a Pattern {
    type Item = &'a Stroke;
    type IntoIter = std::slice::Iter<'a, Stroke>;

    fn into_iter(self) -> Self::IntoIter {
        self.strokes.iter()
    }
}

#[derive(Debug, Error)]
pub enum PatternParseError {
    #[error("Malformed pattern JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pattern {
        Pattern::from_strokes(vec![
            Stroke::new(vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)], 0),
            Stroke::new(vec![Point::new(10.0, 0.0), Point::new(10.0, 2.0), Point::new(12.0, 2.0)], 1)
                .with_color("#ff0000"),
        ])
    }

    #[test]
    fn test_total_length_sums_segments() {
        let p = sample();
        assert!((p.total_length() - 9.0).abs() < 1e-12);
        assert_eq!(p.segment_count(), 3);
        assert_eq!(p.point_count(), 5);
    }

    #[test]
    fn test_point_serializes_as_pair() {
        let json = serde_json::to_string(&Point::new(1.5, -2.0)).unwrap();
        assert_eq!(json, "[1.5,-2.0]");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_value(&sample()).unwrap();
        let first = &json["strokes"][0];
        assert!(first.get("color").is_none());
        assert!(first.get("width").is_none());
        assert_eq!(json["strokes"][1]["color"], "#ff0000");
    }

    #[test]
    fn test_validate_rejects_empty_stroke() {
        let err = Pattern::from_json(r#"{"strokes":[{"points":[],"pen":0}]}"#).unwrap_err();
        assert!(matches!(err, PatternParseError::Geometry(GeometryError::EmptyStroke { index: 0 })));
    }

    #[test]
    fn test_bounds_and_fit() {
        let p = sample();
        let b = p.bounding_box().unwrap();
        assert_eq!(b.min, Point::new(0.0, 0.0));
        assert_eq!(b.max, Point::new(12.0, 4.0));
        assert!(p.fits_bed(12.0, 4.0));
        assert!(!p.fits_bed(11.0, 4.0));
        assert!(Pattern::new().bounding_box().is_none());
    }

    #[test]
    fn test_transform_moves_whole_pattern() {
        let mut p = sample();
        p.transform(&Transform::translate(100.0, 50.0).scaled(2.0));
        let b = p.bounding_box().unwrap();
        assert_eq!(b.min, Point::new(100.0, 50.0));
        assert_eq!(b.max, Point::new(124.0, 58.0));
        assert!((p.total_length() - 18.0).abs() < 1e-9);
        assert_eq!(p.strokes[1].color.as_deref(), Some("#ff0000"));
    }
}
