use penplot_rs::config::{Config, DeviceConfig, PenConfig};
use penplot_rs::device::DeviceState;
use penplot_rs::geometry::{Pattern, Point, Stroke};
use penplot_rs::job::{JobOptions, JobState, Optimize, Progress};
use penplot_rs::simulator::{Fault, FaultKind, Simulator};
use penplot_rs::{Plotter, PlotterError};
use std::time::Duration;

fn test_config() -> Config {
    let mut config = Config::default();
    config.device = DeviceConfig::fast();
    config.servo.settle_up_ms = 0;
    config.servo.settle_down_ms = 0;
    config.pens = vec![PenConfig::baseline(0, 500)];
    config
}

async fn connected_plotter(sim: &Simulator, config: Config) -> Plotter {
    let (plotter, _task) = Plotter::new(config, Box::new(sim.clone()));
    plotter.connect(None, None).await.unwrap();
    sim.clear_log();
    plotter
}

/// A single stroke zig-zagging across the bed, `segments` long.
fn zigzag(segments: usize) -> Pattern {
    let points = (0..=segments)
        .map(|i| Point::new(i as f64, if i % 2 == 0 { 0.0 } else { 5.0 }))
        .collect();
    Pattern::from_strokes(vec![Stroke::new(points, 0)])
}

fn drawn(sim: &Simulator) -> Vec<String> {
    sim.log().into_iter().filter(|l| l.starts_with("G1 ")).collect()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_single_stroke_command_sequence() {
    let sim = Simulator::new();
    let plotter = connected_plotter(&sim, test_config()).await;
    let pattern = Pattern::from_strokes(vec![Stroke::new(
        vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0)],
        0,
    )]);
    plotter.set_pattern(pattern).await.unwrap();

    let started = plotter.start_job(JobOptions::default()).await.unwrap();
    assert_eq!(started.job_state, JobState::Running);
    assert_eq!(started.progress, Progress { current: 0, total: 2 });
    assert!(started.id.is_some());

    let done = plotter.jobs().wait().await;
    assert_eq!(done.job_state, JobState::Completed);
    assert_eq!(done.progress, Progress { current: 2, total: 2 });
    assert!(done.last_status.as_deref().unwrap_or_default().starts_with("Completed 2/2"));
    assert!(done.finished_at.is_some());

    assert_eq!(
        sim.log(),
        vec![
            "M3 S40",
            "G0 X0.000 Y0.000 F3000",
            "M3 S90",
            "G1 X10.000 Y0.000 F500",
            "G1 X10.000 Y10.000 F500",
            "M3 S40",
        ]
    );
    assert_eq!(sim.servo_pwm(), Some(40));
    assert!(!plotter.device().is_claimed());
}

#[tokio::test]
async fn test_pause_and_resume_plot_every_segment_once() {
    let sim = Simulator::new();
    let plotter = connected_plotter(&sim, test_config()).await;
    let pattern = zigzag(12);
    plotter.set_pattern(pattern.clone()).await.unwrap();
    sim.set_motion_time(Duration::from_millis(15));

    plotter.start_job(JobOptions::default()).await.unwrap();
    let jobs = plotter.jobs().clone();
    eventually("first segments", || jobs.status().progress.current >= 2).await;

    let paused = plotter.pause_job().unwrap();
    assert_eq!(paused.job_state, JobState::Paused);
    eventually("pen lifted while paused", || sim.servo_pwm() == Some(40)).await;

    let parked_at = plotter.jobs().status().progress.current;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(plotter.jobs().status().progress.current, parked_at);
    assert_eq!(plotter.jobs().status().job_state, JobState::Paused);

    // pausing twice is not a valid transition
    assert!(matches!(plotter.pause_job(), Err(PlotterError::JobConflict(_))));

    let resumed = plotter.resume_job().unwrap();
    assert_eq!(resumed.job_state, JobState::Running);
    let done = plotter.jobs().wait().await;
    assert_eq!(done.job_state, JobState::Completed);
    assert_eq!(done.progress, Progress { current: 12, total: 12 });

    let expected: Vec<String> = pattern.strokes[0].points[1..]
        .iter()
        .map(|p| format!("G1 X{:.3} Y{:.3} F500", p.x, p.y))
        .collect();
    assert_eq!(drawn(&sim), expected);

    // the pen went up for the pause and came back down on resume
    let log = sim.log();
    let first_draw = log.iter().position(|l| l.starts_with("G1 ")).unwrap();
    let pen_moves: Vec<&String> = log[first_draw..].iter().filter(|l| l.starts_with("M3")).collect();
    assert_eq!(pen_moves, vec!["M3 S40", "M3 S90", "M3 S40"]);
}

#[tokio::test]
async fn test_stop_raises_pen_and_returns_to_idle() {
    let sim = Simulator::new();
    let plotter = connected_plotter(&sim, test_config()).await;
    plotter.set_pattern(zigzag(40)).await.unwrap();
    sim.set_motion_time(Duration::from_millis(10));

    plotter.start_job(JobOptions::default()).await.unwrap();
    let jobs = plotter.jobs().clone();
    eventually("drawing", || jobs.status().progress.current >= 1).await;
    assert_eq!(sim.servo_pwm(), Some(90));

    let stopped = plotter.stop_job().await.unwrap();
    assert_eq!(stopped.job_state, JobState::Idle);
    assert!(stopped.last_status.as_deref().unwrap_or_default().starts_with("Stopped at segment"));
    assert!(stopped.progress.current < 40);
    assert_eq!(sim.servo_pwm(), Some(40));
    assert!(!plotter.device().is_claimed());

    // the device is free for manual control again
    plotter.goto(0.0, 0.0).await.unwrap();
}

#[tokio::test]
async fn test_stop_while_paused() {
    let sim = Simulator::new();
    let plotter = connected_plotter(&sim, test_config()).await;
    plotter.set_pattern(zigzag(20)).await.unwrap();
    sim.set_motion_time(Duration::from_millis(10));

    plotter.start_job(JobOptions::default()).await.unwrap();
    plotter.pause_job().unwrap();
    let stopped = plotter.stop_job().await.unwrap();
    assert_eq!(stopped.job_state, JobState::Idle);
    assert_eq!(sim.servo_pwm(), Some(40));
    assert!(drawn(&sim).len() < 20);
}

#[tokio::test]
async fn test_device_fault_fails_job_with_pen_up() {
    let sim = Simulator::new();
    let plotter = connected_plotter(&sim, test_config()).await;
    plotter.set_pattern(zigzag(5)).await.unwrap();
    sim.inject(Fault::once("G1 X2.000", FaultKind::Error(33)));

    plotter.start_job(JobOptions::default()).await.unwrap();
    let done = plotter.jobs().wait().await;
    assert_eq!(done.job_state, JobState::Failed);
    assert_eq!(done.progress.current, 1);
    assert!(done.last_error.as_deref().unwrap_or_default().contains("error:33"));
    assert!(done.last_status.as_deref().unwrap_or_default().starts_with("Aborted at segment 1/5"));
    assert_eq!(sim.servo_pwm(), Some(40));
    assert_eq!(plotter.device().status().state, DeviceState::Error);

    // a faulted device refuses new jobs until reset
    let err = plotter.start_job(JobOptions::default()).await.unwrap_err();
    assert!(matches!(err, PlotterError::Connection(_)));
    plotter.reset().await.unwrap();
    plotter.start_job(JobOptions::default()).await.unwrap();
    assert_eq!(plotter.jobs().wait().await.job_state, JobState::Completed);
}

#[tokio::test]
async fn test_start_conflicts_while_running() {
    let sim = Simulator::new();
    let plotter = connected_plotter(&sim, test_config()).await;
    plotter.set_pattern(zigzag(20)).await.unwrap();
    sim.set_motion_time(Duration::from_millis(10));

    plotter.start_job(JobOptions::default()).await.unwrap();
    let err = plotter.start_job(JobOptions::default()).await.unwrap_err();
    assert!(matches!(err, PlotterError::JobConflict(_)));
    assert!(matches!(plotter.goto(1.0, 1.0).await, Err(PlotterError::DeviceBusy(_))));
    assert!(matches!(plotter.clear_pattern().await, Err(PlotterError::JobConflict(_))));
    plotter.stop_job().await.unwrap();
}

#[tokio::test]
async fn test_start_requires_connection_and_strokes() {
    let sim = Simulator::new();
    let (plotter, _task) = Plotter::new(test_config(), Box::new(sim.clone()));
    plotter.set_pattern(zigzag(2)).await.unwrap();
    let err = plotter.start_job(JobOptions::default()).await.unwrap_err();
    assert!(matches!(err, PlotterError::Connection(_)));

    plotter.connect(None, None).await.unwrap();
    plotter.clear_pattern().await.unwrap();
    let err = plotter.start_job(JobOptions::default()).await.unwrap_err();
    assert!(matches!(err, PlotterError::Validation(_)));
    assert_eq!(plotter.jobs().status().job_state, JobState::Idle);
}

#[tokio::test]
async fn test_disabled_pen_is_skipped() {
    let sim = Simulator::new();
    let mut config = test_config();
    let mut disabled = PenConfig::baseline(1, 800);
    disabled.enabled = false;
    config.pens.push(disabled);
    let plotter = connected_plotter(&sim, config).await;

    plotter
        .set_pattern(Pattern::from_strokes(vec![
            Stroke::new(vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)], 0),
            Stroke::new(vec![Point::new(0.0, 10.0), Point::new(5.0, 10.0)], 1),
        ]))
        .await
        .unwrap();

    let started = plotter.start_job(JobOptions::default()).await.unwrap();
    assert_eq!(started.progress.total, 1);
    let done = plotter.jobs().wait().await;
    assert_eq!(done.job_state, JobState::Completed);
    assert!(done.last_status.as_deref().unwrap_or_default().contains("Skipped 1 strokes"));
    assert_eq!(drawn(&sim), vec!["G1 X5.000 Y0.000 F500"]);
}

#[tokio::test]
async fn test_options_reorder_and_return_home() {
    let sim = Simulator::new();
    let plotter = connected_plotter(&sim, test_config()).await;
    plotter
        .set_pattern(Pattern::from_strokes(vec![
            Stroke::new(vec![Point::new(100.0, 100.0), Point::new(110.0, 100.0)], 0),
            Stroke::new(vec![Point::new(1.0, 0.0), Point::new(2.0, 0.0)], 0),
        ]))
        .await
        .unwrap();

    let options = JobOptions {
        optimize: Some(Optimize::Nn),
        return_home: true,
        ..JobOptions::default()
    };
    plotter.start_job(options).await.unwrap();
    assert_eq!(plotter.jobs().wait().await.job_state, JobState::Completed);

    assert_eq!(
        sim.motion_log(),
        vec![
            "G0 X1.000 Y0.000 F3000",
            "G1 X2.000 Y0.000 F500",
            "G0 X100.000 Y100.000 F3000",
            "G1 X110.000 Y100.000 F500",
            "G0 X0.000 Y0.000 F3000",
        ]
    );
    // the stored pattern keeps its own order
    assert_eq!(plotter.pattern().await.strokes[0].first(), Some(Point::new(100.0, 100.0)));
}
