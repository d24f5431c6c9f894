//! Pen plotter host: GRBL device driver, background job manager, and the
//! geometry pipeline that turns artwork into plottable strokes.

pub mod config;
pub mod device;
pub mod geometry;
pub mod job;
pub mod plotter;
pub mod simulator;
pub mod web;

pub use config::{load_config, Config, ConfigError};
pub use geometry::{Pattern, Point, Stroke};
pub use plotter::{Plotter, PlotterError, PlotterStatus};
