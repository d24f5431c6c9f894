// src/plotter.rs - Service facade tying pattern, job manager, and device together
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::device::{Connector, DeviceError, DeviceHandle, DeviceStatus, GrblDriver};
use crate::geometry::{GeometryError, Pattern, PatternParseError, Point, Shape};
use crate::job::{JobError, JobManager, JobOptions, JobStatus};

/// Errors surfaced to callers of the service.
///
/// `Validation` and `JobConflict` mean nothing happened. `Protocol` means the
/// controller misbehaved during an operation; only when a job was running does
/// that abort it (with the pen raised).
#[derive(Debug, Error)]
pub enum PlotterError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Device busy: {0}")]
    DeviceBusy(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Job conflict: {0}")]
    JobConflict(String),
}

impl PlotterError {
    pub fn kind(&self) -> &'static str {
        match self {
            PlotterError::Connection(_) => "connection",
            PlotterError::Protocol(_) => "protocol",
            PlotterError::DeviceBusy(_) => "device_busy",
            PlotterError::Validation(_) => "validation",
            PlotterError::JobConflict(_) => "job_conflict",
        }
    }

    /// True when the failure hit the device while `job_active`, so the run was aborted.
    pub fn aborted_job(&self, job_active: bool) -> bool {
        job_active && matches!(self, PlotterError::Protocol(_))
    }
}

impl From<DeviceError> for PlotterError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::Busy => PlotterError::DeviceBusy(e.to_string()),
            DeviceError::OutOfBounds { .. } | DeviceError::InvalidPen(_) => PlotterError::Validation(e.to_string()),
            DeviceError::Protocol { .. } | DeviceError::Timeout { .. } => PlotterError::Protocol(e.to_string()),
            DeviceError::Connection(_)
            | DeviceError::NotConnected
            | DeviceError::Faulted(_)
            | DeviceError::Closed
            | DeviceError::Io(_) => PlotterError::Connection(e.to_string()),
        }
    }
}

impl From<JobError> for PlotterError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::InvalidTransition(msg) => PlotterError::JobConflict(msg),
            JobError::Validation(msg) => PlotterError::Validation(msg),
            JobError::Device(e) => e.into(),
        }
    }
}

impl From<GeometryError> for PlotterError {
    fn from(e: GeometryError) -> Self {
        PlotterError::Validation(e.to_string())
    }
}

impl From<PatternParseError> for PlotterError {
    fn from(e: PatternParseError) -> Self {
        PlotterError::Validation(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSummary {
    pub count: usize,
    pub total_length_mm: f64,
}

/// The snapshot served by `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotterStatus {
    pub pattern: PatternSummary,
    pub job: JobStatus,
    pub device: DeviceStatus,
}

#[derive(Clone)]
pub struct Plotter {
    config: Arc<Config>,
    pattern: Arc<RwLock<Pattern>>,
    jobs: JobManager,
    device: DeviceHandle,
}

impl Plotter {
    /// Spawn the device task for `connector` and build the service around it.
    pub fn new(config: Config, connector: Box<dyn Connector>) -> (Self, JoinHandle<()>) {
        let driver = GrblDriver::new(&config, connector);
        let poll = std::time::Duration::from_millis(config.device.poll_interval_ms);
        let (device, task) = DeviceHandle::spawn(driver, poll);
        (Self::with_device(config, device), task)
    }

    pub fn with_device(config: Config, device: DeviceHandle) -> Self {
        let jobs = JobManager::new(device.clone(), &config);
        Self {
            config: Arc::new(config),
            pattern: Arc::new(RwLock::new(Pattern::new())),
            jobs,
            device,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub async fn status(&self) -> PlotterStatus {
        let pattern = self.pattern.read().await;
        PlotterStatus {
            pattern: PatternSummary {
                count: pattern.len(),
                total_length_mm: pattern.total_length(),
            },
            job: self.jobs.status(),
            device: self.device.status(),
        }
    }

    // Pattern

    pub async fn pattern(&self) -> Pattern {
        self.pattern.read().await.clone()
    }

    /// Replace the stored pattern. Rejected while a job is active.
    pub async fn set_pattern(&self, pattern: Pattern) -> Result<usize, PlotterError> {
        pattern.validate()?;
        let mut current = self.pattern.write().await;
        self.ensure_no_job("replace the pattern")?;
        *current = pattern;
        tracing::info!(
            "Pattern replaced: {} strokes, {:.1} mm",
            current.len(),
            current.total_length()
        );
        Ok(current.len())
    }

    /// Sample `shapes` onto `pen` and append them. All or nothing.
    pub async fn add_shapes(&self, shapes: &[Shape], pen: u32) -> Result<usize, PlotterError> {
        let tolerance = self.config.geometry.tolerance_mm;
        let mut current = self.pattern.write().await;
        self.ensure_no_job("modify the pattern")?;
        let mut updated = current.clone();
        for shape in shapes {
            updated.add(shape, pen, tolerance)?;
        }
        let added = updated.len() - current.len();
        *current = updated;
        tracing::info!("Added {} strokes on pen {}", added, pen);
        Ok(current.len())
    }

    pub async fn clear_pattern(&self) -> Result<(), PlotterError> {
        let mut current = self.pattern.write().await;
        self.ensure_no_job("clear the pattern")?;
        current.clear();
        tracing::info!("Pattern cleared");
        Ok(())
    }

    // Job control

    pub async fn start_job(&self, options: JobOptions) -> Result<JobStatus, PlotterError> {
        // held across start so the pattern cannot be swapped mid-capture
        let pattern = self.pattern.read().await;
        Ok(self.jobs.start(&pattern, options).await?)
    }

    pub fn pause_job(&self) -> Result<JobStatus, PlotterError> {
        Ok(self.jobs.pause()?)
    }

    pub fn resume_job(&self) -> Result<JobStatus, PlotterError> {
        Ok(self.jobs.resume()?)
    }

    pub async fn stop_job(&self) -> Result<JobStatus, PlotterError> {
        Ok(self.jobs.stop().await?)
    }

    // Manual device control

    pub async fn goto(&self, x: f64, y: f64) -> Result<Point, PlotterError> {
        self.ensure_device_free()?;
        Ok(self.device.goto(x, y).await?)
    }

    pub async fn jog(&self, dx: f64, dy: f64) -> Result<Point, PlotterError> {
        self.ensure_device_free()?;
        Ok(self.device.jog(dx, dy).await?)
    }

    pub async fn set_pen(&self, pos: f64) -> Result<(), PlotterError> {
        if !pos.is_finite() || !(0.0..=1.0).contains(&pos) {
            return Err(DeviceError::InvalidPen(pos).into());
        }
        self.ensure_device_free()?;
        Ok(self.device.set_pen(pos).await?)
    }

    pub async fn set_origin(&self) -> Result<(), PlotterError> {
        self.ensure_device_free()?;
        Ok(self.device.set_origin().await?)
    }

    pub async fn connect(&self, port: Option<String>, baud: Option<u32>) -> Result<DeviceStatus, PlotterError> {
        self.ensure_device_free()?;
        Ok(self.device.connect(port, baud).await?)
    }

    pub async fn disconnect(&self) -> Result<DeviceStatus, PlotterError> {
        self.ensure_device_free()?;
        Ok(self.device.disconnect().await?)
    }

    pub async fn reset(&self) -> Result<DeviceStatus, PlotterError> {
        self.ensure_device_free()?;
        self.device.reset().await?;
        Ok(self.device.status())
    }

    /// Stop any job (raising the pen) and close the device link.
    pub async fn shutdown(&self) {
        if let Err(e) = self.jobs.stop().await {
            tracing::warn!("Stopping job during shutdown failed: {}", e);
        }
        if let Err(e) = self.device.disconnect().await {
            tracing::warn!("Disconnect during shutdown failed: {}", e);
        }
    }

    fn ensure_no_job(&self, action: &str) -> Result<(), PlotterError> {
        let state = self.jobs.status().job_state;
        if state.is_active() {
            return Err(PlotterError::JobConflict(format!("cannot {} while the job is {}", action, state)));
        }
        Ok(())
    }

    fn ensure_device_free(&self) -> Result<(), PlotterError> {
        let state = self.jobs.status().job_state;
        if state.is_active() {
            return Err(PlotterError::DeviceBusy(format!("a job is {}", state)));
        }
        Ok(())
    }
}
