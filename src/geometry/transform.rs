// src/geometry/transform.rs - Placement of artwork on the bed
use serde::{Deserialize, Serialize};

use super::Point;

/// Scale and rotate about `origin`, then translate by `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub scale: f64,
    pub rotation_deg: f64,
    pub offset: Point,
    pub origin: Point,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation_deg: 0.0,
            offset: Point::ORIGIN,
            origin: Point::ORIGIN,
        }
    }
}

impl Transform {
    pub fn translate(dx: f64, dy: f64) -> Self {
        Self {
            offset: Point::new(dx, dy),
            ..Self::default()
        }
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn rotated(mut self, degrees: f64) -> Self {
        self.rotation_deg = degrees;
        self
    }

    pub fn apply(&self, p: Point) -> Point {
        let x = (p.x - self.origin.x) * self.scale;
        let y = (p.y - self.origin.y) * self.scale;
        let (sin, cos) = self.rotation_deg.to_radians().sin_cos();
        Point::new(x * cos - y * sin + self.offset.x, x * sin + y * cos + self.offset.y)
    }
}
