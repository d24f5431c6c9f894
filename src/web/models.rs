//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Shape};

/// Body of `POST /api/device/goto`.
#[derive(Debug, Deserialize)]
pub struct GotoRequest {
    pub x: f64,
    pub y: f64,
}

/// Body of `POST /api/device/jog`.
#[derive(Debug, Deserialize)]
pub struct JogRequest {
    pub dx: f64,
    pub dy: f64,
}

/// Body of `POST /api/device/pen`; 0 is down, 1 is up.
#[derive(Debug, Deserialize)]
pub struct PenRequest {
    pub pos: f64,
}

/// Body of `POST /api/device/connect`; omitted fields fall back to the config.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConnectRequest {
    pub port: Option<String>,
    pub baud: Option<u32>,
}

/// Body of `POST /api/pattern/shapes`.
#[derive(Debug, Deserialize)]
pub struct ShapesRequest {
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub pen: u32,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Position reported after a manual move: the clipped target actually sent.
#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub result: &'static str,
    pub position: Point,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
