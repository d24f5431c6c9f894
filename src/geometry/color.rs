// src/geometry/color.rs - Assign pens to multi-colour source geometry
use serde::{Deserialize, Serialize};

use super::{Pattern, Point, Stroke};

/// Raw path from an upstream artwork producer (e.g. a sampled SVG path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColoredPath {
    pub points: Vec<Point>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorGroups {
    pub pattern: Pattern,
    /// Colour for each pen id, indexed by pen id.
    pub palette: Vec<String>,
}

impl ColorGroups {
    pub fn pen_for(&self, color: &str) -> Option<u32> {
        self.palette.iter().position(|c| c == color).map(|i| i as u32)
    }
}

/// Group paths into pens by exact colour value; pen ids follow first-seen order.
/// Paths with fewer than two points carry nothing to plot and are dropped.
pub fn group_by_color<I>(paths: I) -> ColorGroups
where
    I: IntoIterator<Item = ColoredPath>,
{
    let mut groups = ColorGroups::default();
    for path in paths {
        if path.points.len() < 2 {
            continue;
        }
        let pen = match groups.pen_for(&path.color) {
            Some(pen) => pen,
            None => {
                groups.palette.push(path.color.clone());
                (groups.palette.len() - 1) as u32
            }
        };
        let mut stroke = Stroke::new(path.points, pen).with_color(path.color);
        stroke.width = path.width;
        groups.pattern.strokes.push(stroke);
    }
    groups
}
