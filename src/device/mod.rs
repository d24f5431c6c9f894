//! # Device layer
//!
//! Everything that talks to the motion controller:
//!
//! - [`protocol`]: GRBL command formatting and response parsing
//! - [`transport`]: the byte-link seam plus [`serial`] for real hardware
//! - [`driver`]: [`GrblDriver`], the one-command-in-flight state machine
//! - [`actor`]: the task that owns the driver and the cloneable [`DeviceHandle`]

// src/device/mod.rs - Device state, errors, and submodules
pub mod actor;
pub mod driver;
pub mod protocol;
pub mod serial;
pub mod transport;

pub use actor::{DeviceClaim, DeviceHandle};
pub use driver::GrblDriver;
pub use serial::{SerialConnector, SerialTransport};
pub use transport::{Connector, LinkStats, Transport};

use serde::Serialize;
use thiserror::Error;

use crate::geometry::Point;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Protocol error: {message} (response: {raw:?})")]
    Protocol { message: String, raw: String },
    #[error("Timeout after {ms}ms waiting for {waiting_for}")]
    Timeout { ms: u64, waiting_for: String },
    #[error("Device not connected")]
    NotConnected,
    #[error("Device is in {0} state; reset required")]
    Faulted(DeviceState),
    #[error("Target ({x:.3}, {y:.3}) is outside the bed")]
    OutOfBounds { x: f64, y: f64 },
    #[error("Invalid pen position {0}; expected a value in [0, 1]")]
    InvalidPen(f64),
    #[error("Device busy: a job owns the driver")]
    Busy,
    #[error("Device task has stopped")]
    Closed,
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// The raw controller line attached to a protocol fault, if any.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            DeviceError::Protocol { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Idle,
    #[serde(rename = "running")]
    Moving,
    Alarm,
    Error,
}

impl DeviceState {
    pub fn is_connected(&self) -> bool {
        !matches!(self, DeviceState::Disconnected | DeviceState::Connecting)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, DeviceState::Alarm | DeviceState::Error)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceState::Disconnected => "disconnected",
            DeviceState::Connecting => "connecting",
            DeviceState::Idle => "idle",
            DeviceState::Moving => "running",
            DeviceState::Alarm => "alarm",
            DeviceState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of the driver, copied out to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub state: DeviceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wpos: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last status query went unanswered.
    pub stale: bool,
    /// Last commanded pen position; `None` until the first pen command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pen: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            state: DeviceState::Disconnected,
            wpos: None,
            error: None,
            stale: false,
            pen: None,
            port: None,
        }
    }
}

impl DeviceStatus {
    pub fn pen_is_up(&self) -> bool {
        self.pen.is_some_and(|p| p >= 1.0)
    }
}
