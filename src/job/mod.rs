//! # Job manager
//!
//! Runs one captured pattern at a time through the device on a background
//! task. Control calls (`start`, `pause`, `resume`, `stop`) and status reads
//! come from other tasks and never wait on plotting progress, with the single
//! exception of `stop`, which waits for the worker to reach a segment
//! boundary and raise the pen.
//!
//! ## State machine
//!
//! ```text
//! Idle/Completed/Failed --start--> Running <--pause/resume--> Paused
//! Running --all segments done--> Completed
//! Running --device fault--> Failed
//! Running/Paused --stop--> Stopping --worker exited--> Idle
//! ```

// src/job/mod.rs - Job state, errors, and the JobManager
pub mod plan;
mod runner;

pub use plan::{build_plan, CombineOptions, JobOptions, JobPlan, Optimize, PlannedStroke, ResampleOptions};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{Config, GeometryConfig, PenTable, ServoCalibration};
use crate::device::driver::PEN_UP;
use crate::device::{DeviceError, DeviceHandle, DeviceState};
use crate::geometry::{Pattern, Point};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job state transition: {0}")]
    InvalidTransition(String),
    #[error("Invalid job: {0}")]
    Validation(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
    Paused,
    Stopping,
    Completed,
    Failed,
}

impl JobState {
    /// A worker owns the device in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Paused | JobState::Stopping)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Stopping => "stopping",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Plotted segments out of the run's total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_state: JobState,
    pub progress: Progress,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            job_state: JobState::Idle,
            progress: Progress::default(),
            last_status: None,
            last_error: None,
            id: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Requests from the control plane, observed by the worker between segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Run,
    Pause,
    Stop,
}

pub(crate) struct JobInner {
    status: watch::Sender<JobStatus>,
    control: watch::Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
    device: DeviceHandle,
    pens: PenTable,
    servo: ServoCalibration,
    geometry: GeometryConfig,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<JobInner>,
}

impl JobManager {
    pub fn new(device: DeviceHandle, config: &Config) -> Self {
        let (status, _) = watch::channel(JobStatus::default());
        let (control, _) = watch::channel(Control::Run);
        Self {
            inner: Arc::new(JobInner {
                status,
                control,
                worker: Mutex::new(None),
                device,
                pens: config.pen_table(),
                servo: config.servo.clone(),
                geometry: config.geometry.clone(),
            }),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.status.borrow().job_state.is_active()
    }

    /// Capture `pattern`, plan it and start the worker.
    pub async fn start(&self, pattern: &Pattern, options: JobOptions) -> Result<JobStatus, JobError> {
        let mut worker = self.inner.worker.lock().await;
        let state = self.status().job_state;
        if state.is_active() {
            return Err(JobError::InvalidTransition(format!("cannot start: job is {}", state)));
        }

        let device = self.inner.device.status();
        match device.state {
            DeviceState::Disconnected | DeviceState::Connecting => {
                return Err(JobError::Device(DeviceError::NotConnected));
            }
            s if s.is_faulted() => return Err(JobError::Device(DeviceError::Faulted(s))),
            _ => {}
        }
        let start = device.wpos.unwrap_or(Point::ORIGIN);
        let plan = build_plan(pattern, &options, &self.inner.pens, &self.inner.geometry, start)?;

        // reap the previous worker so its claim is released
        if let Some(previous) = worker.take() {
            let _ = previous.await;
        }
        let claim = self.inner.device.try_claim().map_err(|_| {
            JobError::InvalidTransition("device is owned by another job".to_string())
        })?;

        let id = Uuid::new_v4().to_string();
        tracing::info!(
            "Job {} started: {} strokes, {} segments",
            id,
            plan.strokes.len(),
            plan.total_segments
        );
        for note in &plan.notes {
            tracing::info!("Job {}: {}", id, note);
        }

        self.inner.control.send_replace(Control::Run);
        self.inner.status.send_replace(JobStatus {
            job_state: JobState::Running,
            progress: Progress {
                current: 0,
                total: plan.total_segments,
            },
            last_status: None,
            last_error: None,
            id: Some(id),
            started_at: Some(Utc::now()),
            finished_at: None,
        });

        let control = self.inner.control.subscribe();
        *worker = Some(tokio::spawn(runner::run_job(self.inner.clone(), claim, plan, control)));
        Ok(self.status())
    }

    /// Suspend at the next segment boundary; the pen is lifted while paused.
    pub fn pause(&self) -> Result<JobStatus, JobError> {
        self.transition(JobState::Running, JobState::Paused, "pause")?;
        self.inner.control.send_replace(Control::Pause);
        tracing::info!("Job pause requested");
        Ok(self.status())
    }

    pub fn resume(&self) -> Result<JobStatus, JobError> {
        self.transition(JobState::Paused, JobState::Running, "resume")?;
        self.inner.control.send_replace(Control::Run);
        tracing::info!("Job resume requested");
        Ok(self.status())
    }

    /// Stop the run and wait for the worker to exit with the pen raised.
    /// Always ends `Idle`; on a finished job this just acknowledges.
    pub async fn stop(&self) -> Result<JobStatus, JobError> {
        let mut worker = self.inner.worker.lock().await;
        let state = self.status().job_state;
        if matches!(state, JobState::Running | JobState::Paused) {
            tracing::info!("Stopping job");
            self.inner.status.send_modify(|s| s.job_state = JobState::Stopping);
            self.inner.control.send_replace(Control::Stop);
        }
        if let Some(handle) = worker.take() {
            if let Err(e) = handle.await {
                tracing::error!("Job worker ended abnormally: {}", e);
                if let Err(e) = self.inner.device.set_pen(PEN_UP).await {
                    tracing::error!("Could not raise pen after worker failure: {}", e);
                }
            }
        }
        self.inner.status.send_modify(|s| s.job_state = JobState::Idle);
        Ok(self.status())
    }

    /// Wait until no run is active and return the final status.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.inner.status.subscribe();
        match rx.wait_for(|s| !s.job_state.is_active()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        }
    }

    fn transition(&self, from: JobState, to: JobState, action: &str) -> Result<(), JobError> {
        let mut result = Ok(());
        self.inner.status.send_if_modified(|s| {
            if s.job_state == from {
                s.job_state = to;
                true
            } else {
                result = Err(JobError::InvalidTransition(format!(
                    "cannot {}: job is {}",
                    action, s.job_state
                )));
                false
            }
        });
        result
    }
}
