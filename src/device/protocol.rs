// src/device/protocol.rs - GRBL line protocol: command formatting and response parsing
use std::fmt;

use crate::geometry::Point;

/// Realtime soft reset (Ctrl-X). Not newline terminated.
pub const SOFT_RESET: u8 = 0x18;
/// Realtime status query. Out-of-band: does not occupy the command slot.
pub const STATUS_QUERY: u8 = b'?';

/// Commands the host sends. Coordinates are workspace millimetres.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Rapid { target: Point, feed: u32 },
    Linear { target: Point, feed: u32 },
    AbsoluteMode,
    RelativeMode,
    Millimeters,
    /// Servo output; GRBL spindle PWM drives the pen servo.
    Servo { pwm: u32 },
    /// Work zero at the current machine position.
    SetOrigin,
    Unlock,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Rapid { target, feed } => {
                write!(f, "G0 X{:.3} Y{:.3} F{}", target.x, target.y, feed)
            }
            Command::Linear { target, feed } => {
                write!(f, "G1 X{:.3} Y{:.3} F{}", target.x, target.y, feed)
            }
            Command::AbsoluteMode => write!(f, "G90"),
            Command::RelativeMode => write!(f, "G91"),
            Command::Millimeters => write!(f, "G21"),
            Command::Servo { pwm } => write!(f, "M3 S{}", pwm),
            Command::SetOrigin => write!(f, "G92 X0 Y0"),
            Command::Unlock => write!(f, "$X"),
        }
    }
}

/// Machine state field of a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
    Other(String),
}

impl MachineState {
    fn parse(field: &str) -> Self {
        // substates look like "Hold:0" or "Door:1"
        let name = field.split(':').next().unwrap_or(field);
        match name.to_ascii_lowercase().as_str() {
            "idle" => MachineState::Idle,
            "run" => MachineState::Run,
            "hold" => MachineState::Hold,
            "jog" => MachineState::Jog,
            "alarm" => MachineState::Alarm,
            "door" => MachineState::Door,
            "check" => MachineState::Check,
            "home" => MachineState::Home,
            "sleep" => MachineState::Sleep,
            _ => MachineState::Other(name.to_string()),
        }
    }

    pub fn is_moving(&self) -> bool {
        matches!(
            self,
            MachineState::Run | MachineState::Jog | MachineState::Home | MachineState::Hold | MachineState::Door
        )
    }
}

/// Parsed `<...>` status line.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: MachineState,
    /// Work position; derived from MPos - WCO when the controller reports machine position.
    pub wpos: Option<Point>,
}

impl StatusReport {
    /// Parse a status line; accepts both the `|`-separated 1.1 format and the
    /// older comma-separated one.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.trim().strip_prefix('<')?.strip_suffix('>')?;
        let state_field = body.split(['|', ',']).next()?.trim();
        if state_field.is_empty() || !state_field.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return None;
        }
        let state = MachineState::parse(state_field);

        let wpos = match field_xy(body, "WPos:") {
            Some(w) => Some(w),
            None => field_xy(body, "MPos:").map(|m| match field_xy(body, "WCO:") {
                Some(wco) => Point::new(m.x - wco.x, m.y - wco.y),
                None => m,
            }),
        };
        Some(Self { state, wpos })
    }
}

/// First two numbers following `key`, up to the next `|` or the end of the body.
fn field_xy(body: &str, key: &str) -> Option<Point> {
    let start = body.find(key)? + key.len();
    let rest = &body[start..];
    let end = rest.find('|').unwrap_or(rest.len());
    let mut nums = rest[..end].split(',').filter_map(|s| s.trim().parse::<f64>().ok());
    let x = nums.next()?;
    let y = nums.next()?;
    Some(Point::new(x, y))
}

/// One line received from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(u16),
    Alarm(u16),
    Status(StatusReport),
    /// Start-up banner, e.g. `Grbl 1.1h ['$' for help]`.
    Welcome(String),
    /// Bracketed feedback such as `[MSG:...]` or `[GC:...]`.
    Message(String),
    Empty,
    Unknown(String),
}

impl Response {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Response::Empty;
        }
        if line.eq_ignore_ascii_case("ok") {
            return Response::Ok;
        }
        if let Some(code) = strip_prefix_ci(line, "error:") {
            return match code.trim().parse() {
                Ok(code) => Response::Error(code),
                Err(_) => Response::Unknown(line.to_string()),
            };
        }
        if let Some(code) = strip_prefix_ci(line, "alarm:") {
            return match code.trim().parse() {
                Ok(code) => Response::Alarm(code),
                Err(_) => Response::Unknown(line.to_string()),
            };
        }
        if line.starts_with('<') {
            return match StatusReport::parse(line) {
                Some(report) => Response::Status(report),
                None => Response::Unknown(line.to_string()),
            };
        }
        if line.starts_with('[') && line.ends_with(']') {
            return Response::Message(line[1..line.len() - 1].to_string());
        }
        if strip_prefix_ci(line, "grbl ").is_some() {
            return Response::Welcome(line.to_string());
        }
        Response::Unknown(line.to_string())
    }
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_formatting() {
        let cmd = Command::Rapid {
            target: Point::new(200.0, 50.0),
            feed: 3000,
        };
        assert_eq!(cmd.to_string(), "G0 X200.000 Y50.000 F3000");
        assert_eq!(Command::Servo { pwm: 65 }.to_string(), "M3 S65");
        assert_eq!(Command::SetOrigin.to_string(), "G92 X0 Y0");
    }

    #[test]
    fn test_parse_acks_and_faults() {
        assert_eq!(Response::parse("ok\r"), Response::Ok);
        assert_eq!(Response::parse("error:20"), Response::Error(20));
        assert_eq!(Response::parse("ALARM:2"), Response::Alarm(2));
        assert!(matches!(Response::parse("error:x"), Response::Unknown(_)));
        assert!(matches!(Response::parse("Grbl 1.1h ['$' for help]"), Response::Welcome(_)));
        assert_eq!(
            Response::parse("[MSG:'$H'|'$X' to unlock]"),
            Response::Message("MSG:'$H'|'$X' to unlock".to_string())
        );
        assert!(matches!(Response::parse("%%garbage"), Response::Unknown(_)));
    }

    #[test]
    fn test_status_with_wpos() {
        let r = StatusReport::parse("<Run|WPos:10.000,5.500,0.000|FS:500,0>").unwrap();
        assert_eq!(r.state, MachineState::Run);
        assert_eq!(r.wpos, Some(Point::new(10.0, 5.5)));
        assert!(r.state.is_moving());
    }

    #[test]
    fn test_status_with_mpos_and_wco() {
        let r = StatusReport::parse("<Hold:0|MPos:12.000,8.000,0.000|FS:0,0|WCO:2.000,3.000,0.000>").unwrap();
        assert_eq!(r.state, MachineState::Hold);
        assert_eq!(r.wpos, Some(Point::new(10.0, 5.0)));
    }

    #[test]
    fn test_legacy_comma_status() {
        let r = StatusReport::parse("<Idle,MPos:1.000,2.000,0.000,WPos:1.000,2.000,0.000>").unwrap();
        assert_eq!(r.state, MachineState::Idle);
        assert_eq!(r.wpos, Some(Point::new(1.0, 2.0)));
    }

    #[test]
    fn test_malformed_status_is_unknown() {
        assert!(matches!(Response::parse("<|WPos:1,2>"), Response::Unknown(_)));
        assert!(matches!(Response::parse("<Idle"), Response::Unknown(_)));
    }
}
