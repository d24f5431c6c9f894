//! Defines the task that owns the [`GrblDriver`] and the handle other
//! components use to reach it.
//!
//! Requests are queued on one channel and executed strictly in order, so at
//! most one controller command is ever in flight. Observers read a
//! [`DeviceStatus`] snapshot from a watch channel without touching the task.

// src/device/actor.rs - Device task, handle, and job claim
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::driver::GrblDriver;
use super::{DeviceError, DeviceStatus};
use crate::config::ServoCalibration;
use crate::geometry::Point;

/// Who issued an operation; manual operations are refused while a job holds the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Job,
    Manual,
}

#[derive(Debug, Clone)]
pub enum DeviceOp {
    Goto { x: f64, y: f64 },
    DrawTo { x: f64, y: f64, feed: u32 },
    Jog { dx: f64, dy: f64 },
    SetPen { pos: f64, calibration: Option<ServoCalibration> },
    PenUpSafe { calibration: Option<ServoCalibration> },
    SetOrigin,
    PollStatus,
    Reset,
}

/// Represents a request sent to the device task.
#[derive(Debug)]
pub enum DeviceRequest {
    Connect {
        port: Option<String>,
        baud: Option<u32>,
        respond_to: oneshot::Sender<Result<DeviceStatus, DeviceError>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<DeviceStatus>,
    },
    Execute {
        op: DeviceOp,
        origin: Origin,
        /// The target actually commanded for motion ops, after bed clipping.
        respond_to: oneshot::Sender<Result<Option<Point>, DeviceError>>,
    },
}

/// Cloneable access to the device task.
#[derive(Clone)]
pub struct DeviceHandle {
    tx: mpsc::Sender<DeviceRequest>,
    status: watch::Receiver<DeviceStatus>,
    claimed: Arc<AtomicBool>,
}

impl DeviceHandle {
    /// Spawn the task owning `driver`. A zero `poll_interval` disables background polling.
    pub fn spawn(driver: GrblDriver, poll_interval: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(driver.status().clone());
        let claimed = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_device(driver, rx, status_tx, claimed.clone(), poll_interval));
        (
            Self {
                tx,
                status: status_rx,
                claimed,
            },
            task,
        )
    }

    /// Latest snapshot; never waits on the device task.
    pub fn status(&self) -> DeviceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.status.clone()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Take exclusive use of the driver for a job.
    pub fn try_claim(&self) -> Result<DeviceClaim, DeviceError> {
        self.claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DeviceError::Busy)?;
        Ok(DeviceClaim { handle: self.clone() })
    }

    pub async fn connect(&self, port: Option<String>, baud: Option<u32>) -> Result<DeviceStatus, DeviceError> {
        if self.is_claimed() {
            return Err(DeviceError::Busy);
        }
        let (respond_to, rx) = oneshot::channel();
        self.send(DeviceRequest::Connect { port, baud, respond_to }).await?;
        rx.await.map_err(|_| DeviceError::Closed)?
    }

    pub async fn disconnect(&self) -> Result<DeviceStatus, DeviceError> {
        if self.is_claimed() {
            return Err(DeviceError::Busy);
        }
        let (respond_to, rx) = oneshot::channel();
        self.send(DeviceRequest::Disconnect { respond_to }).await?;
        rx.await.map_err(|_| DeviceError::Closed)
    }

    pub async fn goto(&self, x: f64, y: f64) -> Result<Point, DeviceError> {
        self.motion(DeviceOp::Goto { x, y }, Origin::Manual).await
    }

    pub async fn jog(&self, dx: f64, dy: f64) -> Result<Point, DeviceError> {
        self.motion(DeviceOp::Jog { dx, dy }, Origin::Manual).await
    }

    pub async fn set_pen(&self, pos: f64) -> Result<(), DeviceError> {
        self.execute(DeviceOp::SetPen { pos, calibration: None }, Origin::Manual)
            .await
            .map(|_| ())
    }

    pub async fn set_origin(&self) -> Result<(), DeviceError> {
        self.execute(DeviceOp::SetOrigin, Origin::Manual).await.map(|_| ())
    }

    pub async fn reset(&self) -> Result<(), DeviceError> {
        self.execute(DeviceOp::Reset, Origin::Manual).await.map(|_| ())
    }

    /// Ask the task for a fresh status query and return the updated snapshot.
    pub async fn poll_status(&self) -> Result<DeviceStatus, DeviceError> {
        self.execute(DeviceOp::PollStatus, Origin::Manual).await?;
        Ok(self.status())
    }

    async fn motion(&self, op: DeviceOp, origin: Origin) -> Result<Point, DeviceError> {
        self.execute(op, origin).await?.ok_or_else(|| DeviceError::Protocol {
            message: "motion finished without a target".to_string(),
            raw: String::new(),
        })
    }

    async fn execute(&self, op: DeviceOp, origin: Origin) -> Result<Option<Point>, DeviceError> {
        if origin == Origin::Manual && self.is_claimed() && !matches!(op, DeviceOp::PollStatus) {
            return Err(DeviceError::Busy);
        }
        let (respond_to, rx) = oneshot::channel();
        self.send(DeviceRequest::Execute { op, origin, respond_to }).await?;
        rx.await.map_err(|_| DeviceError::Closed)?
    }

    async fn send(&self, request: DeviceRequest) -> Result<(), DeviceError> {
        self.tx.send(request).await.map_err(|_| DeviceError::Closed)
    }
}

/// Exclusive use of the driver, held by a running job. Released on drop.
pub struct DeviceClaim {
    handle: DeviceHandle,
}

impl DeviceClaim {
    pub fn status(&self) -> DeviceStatus {
        self.handle.status()
    }

    pub async fn goto(&self, p: Point) -> Result<Point, DeviceError> {
        self.handle.motion(DeviceOp::Goto { x: p.x, y: p.y }, Origin::Job).await
    }

    pub async fn draw_to(&self, p: Point, feed: u32) -> Result<Point, DeviceError> {
        self.handle
            .motion(DeviceOp::DrawTo { x: p.x, y: p.y, feed }, Origin::Job)
            .await
    }

    pub async fn set_pen(&self, pos: f64, calibration: &ServoCalibration) -> Result<(), DeviceError> {
        let op = DeviceOp::SetPen {
            pos,
            calibration: Some(calibration.clone()),
        };
        self.handle.execute(op, Origin::Job).await.map(|_| ())
    }

    /// Raise the pen regardless of the controller's fault state.
    pub async fn pen_up_safe(&self, calibration: &ServoCalibration) -> Result<(), DeviceError> {
        let op = DeviceOp::PenUpSafe {
            calibration: Some(calibration.clone()),
        };
        self.handle.execute(op, Origin::Job).await.map(|_| ())
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.handle.claimed.store(false, Ordering::SeqCst);
    }
}

async fn run_device(
    mut driver: GrblDriver,
    mut rx: mpsc::Receiver<DeviceRequest>,
    status_tx: watch::Sender<DeviceStatus>,
    claimed: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let polling = !poll_interval.is_zero();
    let mut ticker = tokio::time::interval(if polling { poll_interval } else { Duration::from_secs(3600) });
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else {
                    break;
                };
                handle_request(&mut driver, request).await;
                status_tx.send_replace(driver.status().clone());
            }
            _ = ticker.tick(), if polling => {
                if driver.is_connected() && !claimed.load(Ordering::SeqCst) {
                    driver.poll_status().await;
                    status_tx.send_if_modified(|current| {
                        let fresh = driver.status();
                        if current != fresh {
                            *current = fresh.clone();
                            true
                        } else {
                            false
                        }
                    });
                }
            }
        }
    }
    driver.disconnect();
    tracing::info!("Device task terminated");
}

async fn handle_request(driver: &mut GrblDriver, request: DeviceRequest) {
    match request {
        DeviceRequest::Connect { port, baud, respond_to } => {
            let port = port.unwrap_or_else(|| driver.device_config().port.clone());
            let baud = baud.unwrap_or(driver.device_config().baud);
            let result = driver.connect(&port, baud).await.map(|_| driver.status().clone());
            let _ = respond_to.send(result);
        }
        DeviceRequest::Disconnect { respond_to } => {
            driver.disconnect();
            let _ = respond_to.send(driver.status().clone());
        }
        DeviceRequest::Execute { op, origin, respond_to } => {
            tracing::trace!("Executing {:?} for {:?}", op, origin);
            let result = match op {
                DeviceOp::Goto { x, y } => driver.goto(x, y).await.map(Some),
                DeviceOp::DrawTo { x, y, feed } => driver.draw_to(x, y, feed).await.map(Some),
                DeviceOp::Jog { dx, dy } => driver.jog(dx, dy).await.map(Some),
                DeviceOp::SetPen { pos, calibration } => driver.set_pen(pos, calibration.as_ref()).await.map(|_| None),
                DeviceOp::PenUpSafe { calibration } => driver.force_pen_up(calibration.as_ref()).await.map(|_| None),
                DeviceOp::SetOrigin => driver.set_origin().await.map(|_| None),
                DeviceOp::PollStatus => {
                    driver.poll_status().await;
                    Ok(None)
                }
                DeviceOp::Reset => driver.reset().await.map(|_| None),
            };
            let _ = respond_to.send(result);
        }
    }
}
