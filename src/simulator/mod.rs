//! In-memory GRBL controller.
//!
//! Speaks enough of the protocol for the driver: line commands answered
//! with `ok`/`error:N`, `?` status reports, soft reset with the start-up
//! banner, `$X` unlock, `G0/G1/G90/G91/G92/G21` and `M3 S<pwm>` for the pen
//! servo. Every received line is logged so tests can assert on exactly what
//! the host sent. Faults can be injected for commands matching a prefix.

// src/simulator/mod.rs - Simulated controller for development and tests
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::device::protocol::{SOFT_RESET, STATUS_QUERY};
use crate::device::transport::{Connector, LinkStats, Transport};
use crate::geometry::Point;

pub const BANNER: &str = "Grbl 1.1h ['$' for help]";

#[derive(Debug, Clone, PartialEq)]
pub enum FaultKind {
    /// Answer `error:N` instead of `ok`.
    Error(u16),
    /// Answer `ALARM:N` and lock up until unlocked or reset.
    Alarm(u16),
    /// Answer with an arbitrary line.
    Garbage(String),
    /// Swallow the command without answering.
    Silence,
}

/// A scripted reaction to the next command starting with `prefix`.
#[derive(Debug, Clone)]
pub struct Fault {
    pub prefix: String,
    pub kind: FaultKind,
    pub once: bool,
}

impl Fault {
    pub fn once(prefix: impl Into<String>, kind: FaultKind) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
            once: true,
        }
    }

    pub fn always(prefix: impl Into<String>, kind: FaultKind) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
            once: false,
        }
    }
}

#[derive(Debug)]
struct SimState {
    mpos: Point,
    wco: Point,
    absolute: bool,
    alarm: bool,
    servo_pwm: Option<u32>,
    busy_until: Option<Instant>,
    motion_time: Duration,
    report_mpos: bool,
    mute: bool,
    online: bool,
    connections: u32,
    log: Vec<String>,
    faults: Vec<Fault>,
    outbox: VecDeque<String>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            mpos: Point::ORIGIN,
            wco: Point::ORIGIN,
            absolute: true,
            alarm: false,
            servo_pwm: None,
            busy_until: None,
            motion_time: Duration::ZERO,
            report_mpos: false,
            mute: false,
            online: true,
            connections: 0,
            log: Vec::new(),
            faults: Vec::new(),
            outbox: VecDeque::new(),
        }
    }
}

impl SimState {
    fn wpos(&self) -> Point {
        Point::new(self.mpos.x - self.wco.x, self.mpos.y - self.wco.y)
    }

    fn is_busy(&self) -> bool {
        self.busy_until.is_some_and(|t| Instant::now() < t)
    }

    fn push(&mut self, line: impl Into<String>) {
        self.outbox.push_back(line.into());
    }

    fn status_line(&self) -> String {
        let state = if self.alarm {
            "Alarm"
        } else if self.is_busy() {
            "Run"
        } else {
            "Idle"
        };
        if self.report_mpos {
            format!(
                "<{}|MPos:{:.3},{:.3},0.000|FS:0,0|WCO:{:.3},{:.3},0.000>",
                state, self.mpos.x, self.mpos.y, self.wco.x, self.wco.y
            )
        } else {
            let w = self.wpos();
            format!("<{}|WPos:{:.3},{:.3},0.000|FS:0,0>", state, w.x, w.y)
        }
    }

    fn soft_reset(&mut self) {
        self.outbox.clear();
        if self.is_busy() {
            // reset mid-motion loses position; GRBL locks up
            self.alarm = true;
        }
        self.busy_until = None;
        self.absolute = true;
        self.servo_pwm = None;
        self.push("");
        self.push(BANNER);
        if self.alarm {
            self.push("[MSG:'$H'|'$X' to unlock]");
        }
    }

    fn take_fault(&mut self, line: &str) -> Option<FaultKind> {
        let idx = self.faults.iter().position(|f| line.starts_with(&f.prefix))?;
        let kind = self.faults[idx].kind.clone();
        if self.faults[idx].once {
            self.faults.remove(idx);
        }
        Some(kind)
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if !line.is_empty() {
            self.log.push(line.to_string());
        }
        if self.mute {
            return;
        }
        if let Some(kind) = self.take_fault(line) {
            match kind {
                FaultKind::Error(code) => self.push(format!("error:{}", code)),
                FaultKind::Alarm(code) => {
                    self.alarm = true;
                    self.busy_until = None;
                    self.push(format!("ALARM:{}", code));
                }
                FaultKind::Garbage(text) => self.push(text),
                FaultKind::Silence => {}
            }
            return;
        }
        if line.is_empty() {
            self.push("ok");
            return;
        }
        if line.starts_with('$') {
            if line.eq_ignore_ascii_case("$X") && self.alarm {
                self.alarm = false;
                self.push("[MSG:Caution: Unlocked]");
            }
            self.push("ok");
            return;
        }
        if self.alarm {
            // G-code locked out during alarm
            self.push("error:9");
            return;
        }
        match self.execute_gcode(line) {
            Ok(()) => self.push("ok"),
            Err(code) => self.push(format!("error:{}", code)),
        }
    }

    fn execute_gcode(&mut self, line: &str) -> Result<(), u16> {
        let mut motion = false;
        let mut set_origin = false;
        let mut spindle_on = false;
        let mut spindle_off = false;
        let mut absolute = self.absolute;
        let (mut x, mut y, mut s) = (None, None, None);

        for word in line.split_whitespace() {
            let (letter, value) = word.split_at(1);
            let value: f64 = value.parse().map_err(|_| 2u16)?;
            match letter.to_ascii_uppercase().as_str() {
                "G" => match value as u32 {
                    0 | 1 => motion = true,
                    90 => absolute = true,
                    91 => absolute = false,
                    21 => {}
                    92 => set_origin = true,
                    _ => return Err(20),
                },
                "M" => match value as u32 {
                    3 | 4 => spindle_on = true,
                    5 => spindle_off = true,
                    _ => return Err(20),
                },
                "X" => x = Some(value),
                "Y" => y = Some(value),
                "S" => s = Some(value),
                "Z" | "F" => {}
                _ => return Err(20),
            }
        }

        self.absolute = absolute;
        let here = self.wpos();
        if set_origin {
            let new_w = Point::new(x.unwrap_or(here.x), y.unwrap_or(here.y));
            self.wco = Point::new(self.mpos.x - new_w.x, self.mpos.y - new_w.y);
        } else if motion {
            let target = if self.absolute {
                Point::new(x.unwrap_or(here.x), y.unwrap_or(here.y))
            } else {
                Point::new(here.x + x.unwrap_or(0.0), here.y + y.unwrap_or(0.0))
            };
            self.mpos = Point::new(target.x + self.wco.x, target.y + self.wco.y);
            if !self.motion_time.is_zero() {
                self.busy_until = Some(Instant::now() + self.motion_time);
            }
        }
        if spindle_on {
            self.servo_pwm = Some(s.unwrap_or(0.0).round() as u32);
        }
        if spindle_off {
            self.servo_pwm = None;
        }
        Ok(())
    }
}

/// Shared handle to one simulated controller. Cloning shares the controller.
#[derive(Clone, Default)]
pub struct Simulator {
    state: Arc<Mutex<SimState>>,
    notify: Arc<Notify>,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every non-empty line received, in order.
    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Only the `G0`/`G1` lines.
    pub fn motion_log(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter(|l| l.starts_with("G0 ") || l.starts_with("G1 "))
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn servo_pwm(&self) -> Option<u32> {
        self.state().servo_pwm
    }

    pub fn position(&self) -> Point {
        self.state().wpos()
    }

    pub fn is_alarmed(&self) -> bool {
        self.state().alarm
    }

    pub fn connections(&self) -> u32 {
        self.state().connections
    }

    /// How long each move reports `Run` before going `Idle`.
    pub fn set_motion_time(&self, motion_time: Duration) {
        self.state().motion_time = motion_time;
    }

    pub fn set_report_mpos(&self, report_mpos: bool) {
        self.state().report_mpos = report_mpos;
    }

    /// A muted controller receives everything and answers nothing.
    pub fn set_mute(&self, mute: bool) {
        self.state().mute = mute;
    }

    /// An offline controller refuses new connections.
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Raise an alarm out of band, as a limit switch would.
    pub fn trigger_alarm(&self, code: u16) {
        {
            let mut st = self.state();
            st.alarm = true;
            st.busy_until = None;
            st.push(format!("ALARM:{}", code));
        }
        self.notify.notify_one();
    }
}

#[async_trait]
impl Connector for Simulator {
    async fn open(&self, port: &str, _baud: u32) -> io::Result<Box<dyn Transport>> {
        {
            let mut st = self.state();
            if !st.online {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no simulated controller on {}", port),
                ));
            }
            st.connections += 1;
            st.outbox.clear();
            if !st.mute {
                st.push(BANNER);
            }
        }
        tracing::info!("Simulated controller attached on {}", port);
        Ok(Box::new(SimLink {
            sim: self.clone(),
            stats: LinkStats::default(),
        }))
    }
}

/// One connection to a [`Simulator`].
pub struct SimLink {
    sim: Simulator,
    stats: LinkStats,
}

#[async_trait]
impl Transport for SimLink {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.sim.state().handle_line(line);
        self.stats.lines_sent += 1;
        self.stats.bytes_sent += line.len() as u64 + 1;
        self.sim.notify.notify_one();
        Ok(())
    }

    async fn write_realtime(&mut self, byte: u8) -> io::Result<()> {
        {
            let mut st = self.sim.state();
            match byte {
                STATUS_QUERY if !st.mute => {
                    let line = st.status_line();
                    st.push(line);
                }
                SOFT_RESET if !st.mute => st.soft_reset(),
                _ => {}
            }
        }
        self.stats.bytes_sent += 1;
        self.sim.notify.notify_one();
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let next = self.sim.state().outbox.pop_front();
            if let Some(line) = next {
                self.stats.lines_received += 1;
                self.stats.bytes_received += line.len() as u64 + 2;
                return Ok(Some(line));
            }
            self.sim.notify.notified().await;
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.sim.state().outbox.clear();
        Ok(())
    }

    fn stats(&self) -> LinkStats {
        self.stats
    }
}
