//! # Plotter configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file is a
//! valid configuration.
//!
//! ## Example
//!
//! ```toml
//! [device]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [bed]
//! width_mm = 300.0
//! height_mm = 245.0
//! policy = "clamp"
//!
//! [servo]
//! up_pwm = 40
//! down_pwm = 90
//!
//! [[pens]]
//! id = 0
//! name = "Black fineliner"
//! color = "#111111"
//! feed_rate = 2500
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub bed: BedConfig,
    #[serde(default)]
    pub servo: ServoCalibration,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub pens: Vec<PenConfig>,
    #[serde(default)]
    pub web: WebConfig,
}

/// Serial link and controller timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub port: String,
    pub baud: u32,
    pub simulate: bool,
    pub startup_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub motion_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub idle_poll_ms: u64,
    pub poll_interval_ms: u64,
    pub reset_on_connect: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: 115_200,
            simulate: false,
            startup_delay_ms: 2000,
            connect_timeout_ms: 5000,
            command_timeout_ms: 5000,
            motion_timeout_ms: 30_000,
            status_timeout_ms: 250,
            idle_poll_ms: 50,
            poll_interval_ms: 500,
            reset_on_connect: true,
        }
    }
}

impl DeviceConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
    pub fn motion_timeout(&self) -> Duration {
        Duration::from_millis(self.motion_timeout_ms)
    }
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Timings suitable for the in-memory controller.
    pub fn fast() -> Self {
        Self {
            port: "sim".to_string(),
            simulate: true,
            startup_delay_ms: 0,
            connect_timeout_ms: 500,
            command_timeout_ms: 500,
            motion_timeout_ms: 2000,
            status_timeout_ms: 100,
            idle_poll_ms: 1,
            poll_interval_ms: 0,
            ..Self::default()
        }
    }
}

/// What to do with a motion target outside the bed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundsPolicy {
    #[default]
    Clamp,
    Reject,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BedConfig {
    pub width_mm: f64,
    pub height_mm: f64,
    pub policy: BoundsPolicy,
}

impl Default for BedConfig {
    fn default() -> Self {
        Self {
            width_mm: 300.0,
            height_mm: 245.0,
            policy: BoundsPolicy::Clamp,
        }
    }
}

/// Servo PWM calibration; position 0 is pen down, 1 is pen up.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServoCalibration {
    pub up_pwm: u32,
    pub down_pwm: u32,
    pub settle_up_ms: u64,
    pub settle_down_ms: u64,
    /// Move the servo in increments of this size instead of one jump.
    pub step: Option<f64>,
    pub step_delay_ms: u64,
}

impl Default for ServoCalibration {
    fn default() -> Self {
        Self {
            up_pwm: 40,
            down_pwm: 90,
            settle_up_ms: 30,
            settle_down_ms: 50,
            step: None,
            step_delay_ms: 30,
        }
    }
}

impl ServoCalibration {
    pub fn to_pwm(&self, pos: f64) -> u32 {
        let pos = pos.clamp(0.0, 1.0);
        let down = self.down_pwm as f64;
        let up = self.up_pwm as f64;
        (down + pos * (up - down)).round() as u32
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Pen-up travel feed, mm/min.
    pub travel_feed: u32,
    /// Baseline drawing feed for pens without their own, mm/min.
    pub draw_feed: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            travel_feed: 3000,
            draw_feed: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Maximum chord error when sampling curves, mm.
    pub tolerance_mm: f64,
    pub join_tolerance_mm: f64,
    pub resample_spacing_mm: Option<f64>,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            tolerance_mm: 0.1,
            join_tolerance_mm: 0.05,
            resample_spacing_mm: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PenConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_feed")]
    pub feed_rate: u32,
    /// Servo position used for "down" with this pen, in [0, 1].
    #[serde(default)]
    pub down_pos: f64,
    #[serde(default)]
    pub up_pwm: Option<u32>,
    #[serde(default)]
    pub down_pwm: Option<u32>,
}

impl PenConfig {
    pub fn baseline(id: u32, feed_rate: u32) -> Self {
        Self {
            id,
            name: format!("pen{id}"),
            color: None,
            enabled: true,
            feed_rate,
            down_pos: 0.0,
            up_pwm: None,
            down_pwm: None,
        }
    }

    /// The global calibration with this pen's overrides applied.
    pub fn calibration(&self, base: &ServoCalibration) -> ServoCalibration {
        ServoCalibration {
            up_pwm: self.up_pwm.unwrap_or(base.up_pwm),
            down_pwm: self.down_pwm.unwrap_or(base.down_pwm),
            ..base.clone()
        }
    }
}

/// Pen lookup with a baseline for ids that are not configured.
#[derive(Debug, Clone)]
pub struct PenTable {
    pens: Vec<PenConfig>,
    default_feed: u32,
}

impl PenTable {
    pub fn new(pens: Vec<PenConfig>, default_feed: u32) -> Self {
        Self { pens, default_feed }
    }

    pub fn get(&self, id: u32) -> PenConfig {
        self.pens
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .unwrap_or_else(|| PenConfig::baseline(id, self.default_feed))
    }

    pub fn is_enabled(&self, id: u32) -> bool {
        self.get(id).enabled
    }

    pub fn configured(&self) -> &[PenConfig] {
        &self.pens
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Config {
    pub fn pen_table(&self) -> PenTable {
        PenTable::new(self.pens.clone(), self.motion.draw_feed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bed.width_mm <= 0.0 || self.bed.height_mm <= 0.0 {
            return Err(ConfigError::Invalid("bed size must be > 0".to_string()));
        }
        if self.motion.travel_feed == 0 || self.motion.draw_feed == 0 {
            return Err(ConfigError::Invalid("feed rates must be > 0".to_string()));
        }
        if self.geometry.tolerance_mm <= 0.0 {
            return Err(ConfigError::Invalid("geometry.tolerance_mm must be > 0".to_string()));
        }
        if let Some(spacing) = self.geometry.resample_spacing_mm {
            if spacing <= 0.0 {
                return Err(ConfigError::Invalid("geometry.resample_spacing_mm must be > 0".to_string()));
            }
        }
        if let Some(step) = self.servo.step {
            if step <= 0.0 || step > 1.0 {
                return Err(ConfigError::Invalid("servo.step must be in (0, 1]".to_string()));
            }
        }
        for pen in &self.pens {
            if !(0.0..=1.0).contains(&pen.down_pos) {
                return Err(ConfigError::Invalid(format!("pen {} down_pos must be in [0, 1]", pen.id)));
            }
            if pen.feed_rate == 0 {
                return Err(ConfigError::Invalid(format!("pen {} feed_rate must be > 0", pen.id)));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_feed() -> u32 {
    3000
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
