// src/device/driver.rs - GRBL driver: one command in flight, status feedback, bed clipping
use std::time::Duration;
use tokio::time::{sleep, timeout, timeout_at, Instant};

use super::protocol::{Command, MachineState, Response, StatusReport, SOFT_RESET, STATUS_QUERY};
use super::transport::{Connector, Transport};
use super::{DeviceError, DeviceState, DeviceStatus};
use crate::config::{BedConfig, BoundsPolicy, Config, DeviceConfig, ServoCalibration};
use crate::geometry::Point;

/// Servo position for a raised pen.
pub const PEN_UP: f64 = 1.0;

/// Owns the link to one controller. Every blocking call sends at most one
/// command and waits for its acknowledgement (and, for motion, for the
/// controller to report `Idle`) before returning.
pub struct GrblDriver {
    connector: Box<dyn Connector>,
    link: Option<Box<dyn Transport>>,
    device: DeviceConfig,
    bed: BedConfig,
    servo: ServoCalibration,
    travel_feed: u32,
    status: DeviceStatus,
}

impl GrblDriver {
    pub fn new(config: &Config, connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            link: None,
            device: config.device.clone(),
            bed: config.bed.clone(),
            servo: config.servo.clone(),
            travel_feed: config.motion.travel_feed,
            status: DeviceStatus::default(),
        }
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    /// Open the link, reset/wake the controller and wait until it reports ready.
    pub async fn connect(&mut self, port: &str, baud: u32) -> Result<(), DeviceError> {
        if self.link.is_some() {
            self.disconnect();
        }
        self.status = DeviceStatus {
            state: DeviceState::Connecting,
            port: Some(port.to_string()),
            ..DeviceStatus::default()
        };
        tracing::info!("Connecting to controller on {} at {} baud", port, baud);

        match self.handshake(port, baud).await {
            Ok(()) => {
                tracing::info!("Controller on {} ready ({})", port, self.status.state);
                Ok(())
            }
            Err(e) => {
                self.link = None;
                let err = match e {
                    DeviceError::Connection(_) => e,
                    other => DeviceError::Connection(other.to_string()),
                };
                tracing::error!("Connect to {} failed: {}", port, err);
                self.status.state = DeviceState::Disconnected;
                self.status.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn handshake(&mut self, port: &str, baud: u32) -> Result<(), DeviceError> {
        let budget = self.device.connect_timeout();
        let link = match timeout(budget, self.connector.open(port, baud)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(DeviceError::Connection(format!("cannot open {}: {}", port, e))),
            Err(_) => return Err(DeviceError::Connection(format!("timed out opening {}", port))),
        };
        self.link = Some(link);

        // most boards reboot when the port opens
        sleep(self.device.startup_delay()).await;
        if self.device.reset_on_connect {
            self.write_realtime(SOFT_RESET).await?;
        } else {
            self.write_line("").await?;
        }
        self.wait_ready(budget).await?;
        self.link()?.discard_input()?;

        let (report, _) = self.query_status(self.device.status_timeout()).await?;
        if report.state == MachineState::Alarm {
            tracing::warn!("Controller is in alarm; reset or unlock before moving");
            return Ok(());
        }
        self.send_raw(&Command::AbsoluteMode.to_string()).await?;
        self.send_raw(&Command::Millimeters.to_string()).await?;
        Ok(())
    }

    /// Close the link. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            let stats = link.stats();
            tracing::info!(
                "Disconnected ({} lines sent, {} lines received)",
                stats.lines_sent,
                stats.lines_received
            );
        }
        self.status = DeviceStatus::default();
    }

    /// Soft reset plus unlock; the way out of `Alarm` and `Error`.
    pub async fn reset(&mut self) -> Result<(), DeviceError> {
        tracing::info!("Soft-resetting controller");
        self.write_realtime(SOFT_RESET).await?;
        self.wait_ready(self.device.connect_timeout()).await?;
        self.link()?.discard_input()?;

        self.status.state = DeviceState::Idle;
        self.status.error = None;
        self.status.stale = false;
        self.status.pen = None;
        self.send_raw(&Command::Unlock.to_string()).await?;
        self.send_raw(&Command::AbsoluteMode.to_string()).await?;
        self.send_raw(&Command::Millimeters.to_string()).await?;
        self.query_status(self.device.status_timeout()).await?;
        Ok(())
    }

    /// Apply the bed policy to a target.
    pub fn clip(&self, target: Point) -> Result<Point, DeviceError> {
        if !target.is_finite() {
            return Err(DeviceError::OutOfBounds {
                x: target.x,
                y: target.y,
            });
        }
        let (w, h) = (self.bed.width_mm, self.bed.height_mm);
        let clipped = Point::new(target.x.clamp(0.0, w), target.y.clamp(0.0, h));
        if clipped == target {
            return Ok(target);
        }
        match self.bed.policy {
            BoundsPolicy::Clamp => {
                tracing::debug!(
                    "Clipped target ({:.3}, {:.3}) to ({:.3}, {:.3})",
                    target.x,
                    target.y,
                    clipped.x,
                    clipped.y
                );
                Ok(clipped)
            }
            BoundsPolicy::Reject => Err(DeviceError::OutOfBounds {
                x: target.x,
                y: target.y,
            }),
        }
    }

    /// Pen-up travel to an absolute position. Returns the (clipped) target.
    pub async fn goto(&mut self, x: f64, y: f64) -> Result<Point, DeviceError> {
        self.move_to(Point::new(x, y), None).await
    }

    /// Drawing move at `feed` mm/min. Returns the (clipped) target.
    pub async fn draw_to(&mut self, x: f64, y: f64, feed: u32) -> Result<Point, DeviceError> {
        self.move_to(Point::new(x, y), Some(feed)).await
    }

    /// Relative move from the current work position, sent as an absolute
    /// move so the bed policy applies.
    pub async fn jog(&mut self, dx: f64, dy: f64) -> Result<Point, DeviceError> {
        self.ensure_ready()?;
        let here = match self.query_status(self.device.status_timeout()).await {
            Ok((report, _)) => report.wpos.or(self.status.wpos),
            Err(DeviceError::Timeout { .. }) => self.status.wpos,
            Err(e) => return Err(e),
        };
        let Some(here) = here else {
            return Err(DeviceError::Protocol {
                message: "work position unknown; cannot jog".to_string(),
                raw: String::new(),
            });
        };
        self.move_to(Point::new(here.x + dx, here.y + dy), None).await
    }

    async fn move_to(&mut self, target: Point, draw_feed: Option<u32>) -> Result<Point, DeviceError> {
        self.ensure_ready()?;
        let target = self.clip(target)?;
        let command = match draw_feed {
            Some(feed) => Command::Linear { target, feed },
            None => Command::Rapid {
                target,
                feed: self.travel_feed,
            },
        };
        self.status.state = DeviceState::Moving;
        self.send_raw(&command.to_string()).await?;
        self.wait_idle().await?;
        Ok(target)
    }

    /// Move the pen servo to `pos` (0 = down, 1 = up) and wait for it to settle.
    pub async fn set_pen(&mut self, pos: f64, calibration: Option<&ServoCalibration>) -> Result<(), DeviceError> {
        if !pos.is_finite() || !(0.0..=1.0).contains(&pos) {
            return Err(DeviceError::InvalidPen(pos));
        }
        self.ensure_ready()?;
        let cal = calibration.cloned().unwrap_or_else(|| self.servo.clone());
        let current = self.status.pen.unwrap_or(PEN_UP);

        if let Some(step) = cal.step.filter(|s| *s > 0.0) {
            let dir = if pos > current { 1.0 } else { -1.0 };
            let mut p = current;
            loop {
                let next = p + dir * step;
                if (dir > 0.0 && next >= pos) || (dir < 0.0 && next <= pos) {
                    break;
                }
                self.send_servo(next, &cal).await?;
                sleep(Duration::from_millis(cal.step_delay_ms)).await;
                p = next;
            }
        }
        self.send_servo(pos, &cal).await?;

        let settle = if pos >= current {
            cal.settle_up_ms
        } else {
            cal.settle_down_ms
        };
        sleep(Duration::from_millis(settle)).await;
        Ok(())
    }

    /// Raise the pen even when the driver is faulted. Used on job exit.
    pub async fn force_pen_up(&mut self, calibration: Option<&ServoCalibration>) -> Result<(), DeviceError> {
        if self.link.is_none() {
            return Err(DeviceError::NotConnected);
        }
        let cal = calibration.cloned().unwrap_or_else(|| self.servo.clone());
        self.send_servo(PEN_UP, &cal).await?;
        sleep(Duration::from_millis(cal.settle_up_ms)).await;
        Ok(())
    }

    async fn send_servo(&mut self, pos: f64, cal: &ServoCalibration) -> Result<(), DeviceError> {
        let pwm = cal.to_pwm(pos);
        self.send_raw(&Command::Servo { pwm }.to_string()).await?;
        self.status.pen = Some(pos);
        Ok(())
    }

    /// Make the current machine position the work origin. No motion.
    pub async fn set_origin(&mut self) -> Result<(), DeviceError> {
        self.ensure_ready()?;
        self.send_raw(&Command::SetOrigin.to_string()).await?;
        self.status.wpos = Some(Point::ORIGIN);
        Ok(())
    }

    /// Routine status refresh. Never fails: a missed reply marks the snapshot stale.
    pub async fn poll_status(&mut self) -> DeviceStatus {
        if self.link.is_some() {
            match self.query_status(self.device.status_timeout()).await {
                Ok(_) => {}
                Err(DeviceError::Timeout { .. }) => {
                    if !self.status.stale {
                        tracing::warn!("Status query unanswered; marking device status stale");
                    }
                    self.status.stale = true;
                }
                Err(e) => tracing::warn!("Status poll failed: {}", e),
            }
        }
        self.status.clone()
    }

    /// Poll `?` until the controller reports `Idle`, bounded by the motion timeout.
    pub async fn wait_idle(&mut self) -> Result<(), DeviceError> {
        let budget = self.device.motion_timeout();
        let deadline = Instant::now() + budget;
        loop {
            match self.query_status(self.device.status_timeout()).await {
                Ok((report, raw)) => match report.state {
                    MachineState::Idle => return Ok(()),
                    MachineState::Alarm => {
                        return Err(self.fault(DeviceState::Alarm, "controller entered alarm during motion", raw));
                    }
                    _ => {}
                },
                Err(DeviceError::Timeout { .. }) => self.status.stale = true,
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                let err = DeviceError::Timeout {
                    ms: budget.as_millis() as u64,
                    waiting_for: "motion to complete".to_string(),
                };
                return Err(self.record(DeviceState::Error, err));
            }
            sleep(self.device.idle_poll()).await;
        }
    }

    fn ensure_ready(&self) -> Result<(), DeviceError> {
        if self.link.is_none() {
            return Err(DeviceError::NotConnected);
        }
        if self.status.state.is_faulted() {
            return Err(DeviceError::Faulted(self.status.state));
        }
        Ok(())
    }

    fn link(&mut self) -> Result<&mut Box<dyn Transport>, DeviceError> {
        self.link.as_mut().ok_or(DeviceError::NotConnected)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), DeviceError> {
        tracing::debug!("TX: {}", line);
        let result = self.link()?.write_line(line).await;
        result.map_err(|e| self.lost_link(e))
    }

    async fn write_realtime(&mut self, byte: u8) -> Result<(), DeviceError> {
        let result = self.link()?.write_realtime(byte).await;
        result.map_err(|e| self.lost_link(e))
    }

    async fn read_response(&mut self, deadline: Instant, budget: Duration, waiting_for: &str) -> Result<String, DeviceError> {
        let result = timeout_at(deadline, self.link()?.read_line()).await;
        match result {
            Ok(Ok(Some(line))) => {
                tracing::debug!("RX: {}", line);
                Ok(line)
            }
            Ok(Ok(None)) => Err(self.lost_link(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "controller closed the connection",
            ))),
            Ok(Err(e)) => Err(self.lost_link(e)),
            Err(_) => Err(DeviceError::Timeout {
                ms: budget.as_millis() as u64,
                waiting_for: waiting_for.to_string(),
            }),
        }
    }

    /// Send one line and wait for `ok`. `error:`/`ALARM:` and anything
    /// unparseable are faults carrying the raw line.
    async fn send_raw(&mut self, line: &str) -> Result<(), DeviceError> {
        let budget = self.device.command_timeout();
        self.write_line(line).await?;
        let deadline = Instant::now() + budget;
        loop {
            let raw = match self.read_response(deadline, budget, &format!("ack of '{}'", line)).await {
                Ok(raw) => raw,
                Err(e @ DeviceError::Timeout { .. }) => return Err(self.record(DeviceState::Error, e)),
                Err(e) => return Err(e),
            };
            match Response::parse(&raw) {
                Response::Ok => return Ok(()),
                Response::Error(code) => {
                    let message = format!("controller rejected '{}' with error {}", line, code);
                    return Err(self.fault(DeviceState::Error, &message, raw));
                }
                Response::Alarm(code) => {
                    let message = format!("alarm {} while executing '{}'", code, line);
                    return Err(self.fault(DeviceState::Alarm, &message, raw));
                }
                Response::Status(report) => self.apply_report(&report),
                Response::Message(msg) => tracing::debug!("Controller message: {}", msg),
                Response::Empty => {}
                Response::Welcome(_) => {
                    return Err(self.fault(DeviceState::Error, "controller reset unexpectedly", raw));
                }
                Response::Unknown(_) => {
                    let message = format!("unexpected response to '{}'", line);
                    return Err(self.fault(DeviceState::Error, &message, raw));
                }
            }
        }
    }

    /// Send `?` and wait for the status line. Out-of-band: only called when
    /// no command is awaiting its acknowledgement.
    async fn query_status(&mut self, budget: Duration) -> Result<(StatusReport, String), DeviceError> {
        self.write_realtime(STATUS_QUERY).await?;
        let deadline = Instant::now() + budget;
        loop {
            let raw = self.read_response(deadline, budget, "status report").await?;
            match Response::parse(&raw) {
                Response::Status(report) => {
                    self.apply_report(&report);
                    return Ok((report, raw));
                }
                Response::Alarm(code) => {
                    let message = format!("controller raised alarm {}", code);
                    return Err(self.fault(DeviceState::Alarm, &message, raw));
                }
                Response::Ok | Response::Empty | Response::Message(_) | Response::Welcome(_) => {}
                Response::Error(_) | Response::Unknown(_) => {
                    tracing::warn!("Ignoring unexpected line while polling status: {:?}", raw);
                }
            }
        }
    }

    /// Read lines until the start-up banner (or a bare `ok` after a wake),
    /// falling back to a status query when the banner never shows.
    async fn wait_ready(&mut self, budget: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + budget;
        loop {
            match self.read_response(deadline, budget, "controller start-up").await {
                Ok(raw) => match Response::parse(&raw) {
                    Response::Welcome(banner) => {
                        tracing::info!("Controller: {}", banner);
                        return Ok(());
                    }
                    Response::Ok => return Ok(()),
                    _ => {}
                },
                Err(DeviceError::Timeout { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        match self.query_status(self.device.status_timeout()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(DeviceError::Connection(format!(
                "controller did not report ready within {}ms",
                budget.as_millis()
            ))),
        }
    }

    fn apply_report(&mut self, report: &StatusReport) {
        if report.wpos.is_some() {
            self.status.wpos = report.wpos;
        }
        self.status.stale = false;
        if self.status.state == DeviceState::Error {
            return;
        }
        self.status.state = match &report.state {
            MachineState::Alarm => DeviceState::Alarm,
            s if s.is_moving() => DeviceState::Moving,
            _ => {
                if self.status.state == DeviceState::Alarm {
                    tracing::info!("Controller left alarm state");
                    self.status.error = None;
                }
                DeviceState::Idle
            }
        };
    }

    fn fault(&mut self, state: DeviceState, message: &str, raw: String) -> DeviceError {
        tracing::error!("{}: {:?}", message, raw);
        self.status.state = state;
        self.status.error = Some(format!("{}: {}", message, raw));
        DeviceError::Protocol {
            message: message.to_string(),
            raw,
        }
    }

    fn record(&mut self, state: DeviceState, err: DeviceError) -> DeviceError {
        tracing::error!("{}", err);
        self.status.state = state;
        self.status.error = Some(err.to_string());
        err
    }

    fn lost_link(&mut self, e: std::io::Error) -> DeviceError {
        tracing::error!("Lost controller link: {}", e);
        self.link = None;
        self.status.state = DeviceState::Disconnected;
        self.status.error = Some(e.to_string());
        DeviceError::Io(e)
    }
}
