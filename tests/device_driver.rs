use penplot_rs::config::{BoundsPolicy, Config, DeviceConfig};
use penplot_rs::device::{DeviceError, DeviceHandle, DeviceState, GrblDriver};
use penplot_rs::geometry::Point;
use penplot_rs::simulator::{Fault, FaultKind, Simulator};
use std::time::Duration;

fn test_config() -> Config {
    let mut config = Config::default();
    config.device = DeviceConfig::fast();
    config.servo.settle_up_ms = 0;
    config.servo.settle_down_ms = 0;
    config.bed.width_mm = 200.0;
    config.bed.height_mm = 200.0;
    config
}

async fn connected_driver(sim: &Simulator, config: &Config) -> GrblDriver {
    let mut driver = GrblDriver::new(config, Box::new(sim.clone()));
    driver.connect("sim", 115_200).await.unwrap();
    driver
}

#[tokio::test]
async fn test_connect_handshake() {
    let sim = Simulator::new();
    let driver = connected_driver(&sim, &test_config()).await;
    assert!(driver.is_connected());
    assert_eq!(driver.status().state, DeviceState::Idle);
    assert_eq!(driver.status().port.as_deref(), Some("sim"));
    assert_eq!(driver.status().wpos, Some(Point::ORIGIN));
    assert_eq!(sim.log(), vec!["G90", "G21"]);
    assert_eq!(sim.connections(), 1);
}

#[tokio::test]
async fn test_goto_clamps_to_bed() {
    let sim = Simulator::new();
    let mut driver = connected_driver(&sim, &test_config()).await;
    let landed = driver.goto(250.0, 50.0).await.unwrap();
    assert_eq!(landed, Point::new(200.0, 50.0));
    assert_eq!(sim.motion_log(), vec!["G0 X200.000 Y50.000 F3000"]);
    assert_eq!(sim.position(), Point::new(200.0, 50.0));
    assert_eq!(driver.status().state, DeviceState::Idle);
}

#[tokio::test]
async fn test_goto_rejects_out_of_bounds_when_configured() {
    let sim = Simulator::new();
    let mut config = test_config();
    config.bed.policy = BoundsPolicy::Reject;
    let mut driver = connected_driver(&sim, &config).await;
    let err = driver.goto(-1.0, 10.0).await.unwrap_err();
    assert!(matches!(err, DeviceError::OutOfBounds { .. }));
    assert!(sim.motion_log().is_empty());
    // nothing was sent, so the driver is still usable
    assert_eq!(driver.status().state, DeviceState::Idle);
    driver.goto(10.0, 10.0).await.unwrap();
}

#[tokio::test]
async fn test_error_response_faults_until_reset() {
    let sim = Simulator::new();
    let mut driver = connected_driver(&sim, &test_config()).await;
    sim.inject(Fault::once("G1", FaultKind::Error(22)));

    let err = driver.draw_to(10.0, 10.0, 1000).await.unwrap_err();
    assert!(matches!(err, DeviceError::Protocol { .. }));
    assert_eq!(err.raw_response(), Some("error:22"));
    assert_eq!(driver.status().state, DeviceState::Error);
    assert!(driver.status().error.is_some());

    let err = driver.goto(5.0, 5.0).await.unwrap_err();
    assert!(matches!(err, DeviceError::Faulted(DeviceState::Error)));

    driver.reset().await.unwrap();
    assert_eq!(driver.status().state, DeviceState::Idle);
    assert!(driver.status().error.is_none());
    driver.goto(5.0, 5.0).await.unwrap();
    assert_eq!(sim.position(), Point::new(5.0, 5.0));
}

#[tokio::test]
async fn test_alarm_is_cleared_by_reset_and_unlock() {
    let sim = Simulator::new();
    let mut driver = connected_driver(&sim, &test_config()).await;
    sim.inject(Fault::once("G0", FaultKind::Alarm(1)));

    let err = driver.goto(10.0, 0.0).await.unwrap_err();
    assert_eq!(err.raw_response(), Some("ALARM:1"));
    assert_eq!(driver.status().state, DeviceState::Alarm);
    assert!(sim.is_alarmed());

    driver.reset().await.unwrap();
    assert!(!sim.is_alarmed());
    assert_eq!(driver.status().state, DeviceState::Idle);
    assert!(sim.log().iter().any(|l| l == "$X"));
}

#[tokio::test]
async fn test_garbage_reply_is_a_protocol_fault() {
    let sim = Simulator::new();
    let mut driver = connected_driver(&sim, &test_config()).await;
    sim.inject(Fault::once("M3", FaultKind::Garbage("what?".to_string())));
    let err = driver.set_pen(1.0, None).await.unwrap_err();
    assert_eq!(err.raw_response(), Some("what?"));
    assert_eq!(driver.status().state, DeviceState::Error);
}

#[tokio::test]
async fn test_silent_controller_times_out() {
    let sim = Simulator::new();
    let mut driver = connected_driver(&sim, &test_config()).await;
    sim.inject(Fault::once("G0", FaultKind::Silence));
    let err = driver.goto(1.0, 1.0).await.unwrap_err();
    assert!(matches!(err, DeviceError::Timeout { .. }));
    assert_eq!(driver.status().state, DeviceState::Error);
}

#[tokio::test]
async fn test_muted_controller_fails_to_connect() {
    let sim = Simulator::new();
    sim.set_mute(true);
    let mut driver = GrblDriver::new(&test_config(), Box::new(sim.clone()));
    let err = driver.connect("sim", 115_200).await.unwrap_err();
    assert!(matches!(err, DeviceError::Connection(_)));
    assert!(!driver.is_connected());
    assert_eq!(driver.status().state, DeviceState::Disconnected);
}

#[tokio::test]
async fn test_offline_port_fails_to_connect() {
    let sim = Simulator::new();
    sim.set_online(false);
    let mut driver = GrblDriver::new(&test_config(), Box::new(sim.clone()));
    let err = driver.connect("ttyNOPE", 115_200).await.unwrap_err();
    assert!(err.to_string().contains("ttyNOPE"));
    assert_eq!(sim.connections(), 0);
}

#[tokio::test]
async fn test_pen_positions_map_to_servo_pwm() {
    let sim = Simulator::new();
    let mut driver = connected_driver(&sim, &test_config()).await;
    driver.set_pen(0.0, None).await.unwrap();
    assert_eq!(sim.servo_pwm(), Some(90));
    driver.set_pen(1.0, None).await.unwrap();
    assert_eq!(sim.servo_pwm(), Some(40));
    driver.set_pen(0.5, None).await.unwrap();
    assert_eq!(sim.servo_pwm(), Some(65));
    assert_eq!(driver.status().pen, Some(0.5));
    assert!(matches!(driver.set_pen(1.5, None).await, Err(DeviceError::InvalidPen(_))));
}

#[tokio::test]
async fn test_stepped_pen_motion() {
    let sim = Simulator::new();
    let mut config = test_config();
    config.servo.step = Some(0.25);
    config.servo.step_delay_ms = 0;
    let mut driver = connected_driver(&sim, &config).await;
    sim.clear_log();
    driver.set_pen(0.0, None).await.unwrap();
    // from the assumed-up start: 0.75, 0.5, 0.25, then 0.0
    assert_eq!(sim.log(), vec!["M3 S53", "M3 S65", "M3 S78", "M3 S90"]);
}

#[tokio::test]
async fn test_jog_and_set_origin() {
    let sim = Simulator::new();
    let mut driver = connected_driver(&sim, &test_config()).await;
    driver.goto(20.0, 30.0).await.unwrap();
    let landed = driver.jog(5.0, -10.0).await.unwrap();
    assert_eq!(landed, Point::new(25.0, 20.0));

    driver.set_origin().await.unwrap();
    assert_eq!(sim.position(), Point::ORIGIN);
    assert_eq!(driver.status().wpos, Some(Point::ORIGIN));

    // jog is clipped against the bed in work coordinates
    let landed = driver.jog(-5.0, 0.0).await.unwrap();
    assert_eq!(landed, Point::new(0.0, 0.0));
}

#[tokio::test]
async fn test_machine_position_reports_are_converted() {
    let sim = Simulator::new();
    sim.set_report_mpos(true);
    let mut driver = connected_driver(&sim, &test_config()).await;
    driver.goto(10.0, 10.0).await.unwrap();
    driver.set_origin().await.unwrap();
    driver.goto(2.0, 3.0).await.unwrap();
    let status = driver.poll_status().await;
    assert_eq!(status.wpos, Some(Point::new(2.0, 3.0)));
}

#[tokio::test]
async fn test_wait_idle_polls_through_motion() {
    let sim = Simulator::new();
    sim.set_motion_time(Duration::from_millis(30));
    let mut driver = connected_driver(&sim, &test_config()).await;
    let started = std::time::Instant::now();
    driver.goto(50.0, 50.0).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(driver.status().state, DeviceState::Idle);
}

#[tokio::test]
async fn test_handle_rejects_manual_moves_while_claimed() {
    let sim = Simulator::new();
    let config = test_config();
    let driver = GrblDriver::new(&config, Box::new(sim.clone()));
    let (handle, _task) = DeviceHandle::spawn(driver, Duration::ZERO);
    handle.connect(None, None).await.unwrap();
    assert!(handle.status().state.is_connected());

    let claim = handle.try_claim().unwrap();
    assert!(handle.is_claimed());
    assert!(matches!(handle.try_claim(), Err(DeviceError::Busy)));
    assert!(matches!(handle.goto(1.0, 1.0).await, Err(DeviceError::Busy)));
    // status polling is still allowed
    handle.poll_status().await.unwrap();

    claim.goto(Point::new(3.0, 4.0)).await.unwrap();
    assert_eq!(handle.status().wpos, Some(Point::new(3.0, 4.0)));

    drop(claim);
    assert!(!handle.is_claimed());
    handle.goto(1.0, 1.0).await.unwrap();
    assert_eq!(sim.position(), Point::new(1.0, 1.0));
}

#[tokio::test]
async fn test_handle_reports_disconnect() {
    let sim = Simulator::new();
    let config = test_config();
    let driver = GrblDriver::new(&config, Box::new(sim.clone()));
    let (handle, _task) = DeviceHandle::spawn(driver, Duration::ZERO);
    assert!(matches!(handle.goto(1.0, 1.0).await, Err(DeviceError::NotConnected)));
    handle.connect(None, None).await.unwrap();
    let status = handle.disconnect().await.unwrap();
    assert_eq!(status.state, DeviceState::Disconnected);
}
