// src/job/runner.rs - The worker loop that plots a JobPlan
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use super::plan::JobPlan;
use super::{Control, JobInner, JobState};
use crate::config::ServoCalibration;
use crate::device::driver::PEN_UP;
use crate::device::{DeviceClaim, DeviceError};
use crate::geometry::Point;

enum Exit {
    Completed,
    Stopped,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

struct Run<'a> {
    inner: &'a JobInner,
    claim: &'a DeviceClaim,
    control: watch::Receiver<Control>,
    done: usize,
    pen_up: bool,
    calibration: ServoCalibration,
}

pub(super) async fn run_job(inner: Arc<JobInner>, claim: DeviceClaim, plan: JobPlan, control: watch::Receiver<Control>) {
    let started = Instant::now();
    let (outcome, done, pen_up, calibration) = {
        let mut run = Run {
            inner: &inner,
            claim: &claim,
            control,
            done: 0,
            pen_up: false,
            calibration: inner.servo.clone(),
        };
        let outcome = run.execute(&plan).await;
        (outcome, run.done, run.pen_up, run.calibration)
    };

    // the pen goes up however the loop ended; after a fault the tracked state is not trusted
    let raised = outcome.is_ok() && pen_up;
    if !raised {
        if let Err(e) = claim.pen_up_safe(&calibration).await {
            tracing::error!("Could not raise pen at end of job: {}", e);
        }
    }
    drop(claim);

    let total = plan.total_segments;
    let finished_at = Some(Utc::now());
    match outcome {
        Ok(Exit::Completed) => {
            let mut summary = format!(
                "Completed {}/{} segments in {:.1}s",
                done,
                total,
                started.elapsed().as_secs_f64()
            );
            if !plan.notes.is_empty() {
                summary = format!("{} ({})", summary, plan.notes.join("; "));
            }
            tracing::info!("{}", summary);
            inner.status.send_modify(|s| {
                s.job_state = JobState::Completed;
                s.last_status = Some(summary);
                s.finished_at = finished_at;
            });
        }
        Ok(Exit::Stopped) => {
            let summary = format!("Stopped at segment {}/{}", done, total);
            tracing::info!("{}", summary);
            inner.status.send_modify(|s| {
                s.last_status = Some(summary);
                s.finished_at = finished_at;
            });
        }
        Err(e) => {
            tracing::error!("Job failed at segment {}/{}: {}", done, total, e);
            inner.status.send_modify(|s| {
                s.job_state = JobState::Failed;
                s.last_status = Some(format!("Aborted at segment {}/{}", done, total));
                s.last_error = Some(e.to_string());
                s.finished_at = finished_at;
            });
        }
    }
}

impl Run<'_> {
    async fn execute(&mut self, plan: &JobPlan) -> Result<Exit, DeviceError> {
        for stroke in &plan.strokes {
            if self.checkpoint(None).await? == Flow::Stop {
                return Ok(Exit::Stopped);
            }
            let Some((&first, rest)) = stroke.points.split_first() else {
                continue;
            };
            self.calibration = stroke.pen.calibration(&self.inner.servo);
            let down = stroke.pen.down_pos;

            self.lift().await?;
            self.claim.goto(first).await?;
            self.lower(down).await?;
            for &target in rest {
                self.claim.draw_to(target, stroke.pen.feed_rate).await?;
                self.done += 1;
                let done = self.done;
                self.inner.status.send_modify(|s| s.progress.current = done);
                if self.checkpoint(Some(down)).await? == Flow::Stop {
                    return Ok(Exit::Stopped);
                }
            }
            self.lift().await?;
        }
        if plan.return_home {
            self.lift().await?;
            self.claim.goto(Point::ORIGIN).await?;
        }
        Ok(Exit::Completed)
    }

    /// Segment boundary: honour stop, or park with the pen up while paused.
    /// `resume_down` is the pen position to restore when resuming mid-stroke.
    async fn checkpoint(&mut self, resume_down: Option<f64>) -> Result<Flow, DeviceError> {
        let request = *self.control.borrow_and_update();
        match request {
            Control::Run => return Ok(Flow::Continue),
            Control::Stop => return Ok(Flow::Stop),
            Control::Pause => {}
        }

        tracing::info!("Job paused after segment {}", self.done);
        self.lift().await?;
        let next = match self.control.wait_for(|c| *c != Control::Pause).await {
            Ok(c) => *c,
            Err(_) => Control::Stop,
        };
        if next == Control::Stop {
            return Ok(Flow::Stop);
        }
        tracing::info!("Job resumed at segment {}", self.done);
        if let Some(down) = resume_down {
            self.lower(down).await?;
        }
        Ok(Flow::Continue)
    }

    async fn lift(&mut self) -> Result<(), DeviceError> {
        if !self.pen_up {
            self.claim.set_pen(PEN_UP, &self.calibration).await?;
            self.pen_up = true;
        }
        Ok(())
    }

    async fn lower(&mut self, down: f64) -> Result<(), DeviceError> {
        self.claim.set_pen(down, &self.calibration).await?;
        self.pen_up = false;
        Ok(())
    }
}
