// src/pipeline/control_loop.rs
//
// acquire → extract → decide → actuate, one frame at a time.
//
//   Idle ──run()──► Running ──deadline / cancel──► Stopped
//                      │
//                      └──────────any error──────► Faulted
//
// The motors always get a Stop on the way out; on the fault path it is
// best-effort and its own failure is only logged.

use super::metrics::{LoopMetrics, RunReport};
use crate::actuation::Motors;
use crate::camera::FrameSource;
use crate::detection::LaneSignalExtractor;
use crate::steering::SteeringPolicy;
use crate::types::RunConfig;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const FPS_LOG_PERIOD: Duration = Duration::from_secs(1);
const WARMUP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
    Faulted,
}

/// Cooperative cancellation, checked at the top of every iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ControlLoop<S, M> {
    source: S,
    extractor: LaneSignalExtractor,
    policy: SteeringPolicy,
    motors: M,
    run: RunConfig,
    budget: Duration,
    cancel: CancelToken,
    state: LoopState,
    metrics: LoopMetrics,
}

impl<S: FrameSource, M: Motors> ControlLoop<S, M> {
    pub fn new(
        source: S,
        extractor: LaneSignalExtractor,
        policy: SteeringPolicy,
        motors: M,
        run: RunConfig,
        fps: f64,
        cancel: CancelToken,
    ) -> Self {
        let budget = Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX);

        Self {
            source,
            extractor,
            policy,
            motors,
            run,
            budget,
            cancel,
            state: LoopState::Idle,
            metrics: LoopMetrics::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    pub fn report(&self) -> RunReport {
        self.metrics.report(self.state)
    }

    /// Runs until the configured duration elapses or the token is cancelled.
    /// A loop runs at most once.
    pub fn run(&mut self) -> Result<RunReport> {
        if self.state != LoopState::Idle {
            bail!("control loop already ran (state {:?})", self.state);
        }

        self.metrics = LoopMetrics::new();
        self.transition(LoopState::Running);

        let outcome = self
            .warm_up()
            .and_then(|_| self.drive())
            .and_then(|_| self.motors.stop().context("Final stop failed"));

        match outcome {
            Ok(()) => {
                self.transition(LoopState::Stopped);
                let report = self.report();
                info!(
                    "✓ Run finished: {} frames, {} missed, {:.1} fps",
                    report.frames_processed, report.frames_missed, report.fps
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(stop_err) = self.motors.stop() {
                    error!("Stop after fault also failed: {:#}", stop_err);
                }
                self.transition(LoopState::Faulted);
                error!("Control loop faulted: {:#}", e);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: LoopState) {
        info!("Control loop {:?} → {:?}", self.state, next);
        self.state = next;
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.run.warmup_ms == 0 {
            return Ok(());
        }

        info!(
            "Warm-up: forward at {} for {} ms",
            self.run.warmup_speed, self.run.warmup_ms
        );
        self.motors
            .speed(self.run.warmup_speed, self.run.warmup_speed)
            .context("Warm-up speed failed")?;
        self.motors
            .forward(self.run.warmup_speed)
            .context("Warm-up forward failed")?;

        let until = Instant::now() + Duration::from_millis(self.run.warmup_ms);
        while Instant::now() < until && !self.cancel.is_cancelled() {
            sleep(WARMUP_POLL.min(until.saturating_duration_since(Instant::now())));
        }
        Ok(())
    }

    fn drive(&mut self) -> Result<()> {
        let deadline = self.run.duration_secs.and_then(|secs| {
            let deadline = Duration::try_from_secs_f64(secs.max(0.0))
                .ok()
                .and_then(|d| self.metrics.started_at.checked_add(d));
            if deadline.is_none() {
                warn!("Run duration {} s is out of range, running until cancelled", secs);
            }
            deadline
        });

        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested");
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!("Run duration reached");
                return Ok(());
            }

            let tick = Instant::now();
            self.step()?;
            let elapsed = tick.elapsed();

            self.metrics.iterations += 1;
            if elapsed > self.budget {
                self.metrics.overruns += 1;
                warn!(
                    "Iteration took {:.1} ms, budget {:.1} ms",
                    elapsed.as_secs_f64() * 1000.0,
                    self.budget.as_secs_f64() * 1000.0
                );
            }

            if let Some(fps) = self.metrics.take_window_fps(FPS_LOG_PERIOD) {
                info!(
                    "fps: {:.1} | missed: {} | overruns: {}",
                    fps, self.metrics.frames_missed, self.metrics.overruns
                );
            }
        }
    }

    /// One iteration. A missing frame is counted and skipped.
    fn step(&mut self) -> Result<()> {
        let frame = match self.source.read().context("Frame source failed")? {
            Some(frame) => frame,
            None => {
                self.metrics.frames_missed += 1;
                warn!("No frame ({} missed so far)", self.metrics.frames_missed);
                return Ok(());
            }
        };
        self.metrics.frame_processed();

        let signal = self
            .extractor
            .extract(&frame)
            .context("Lane extraction failed")?;
        if signal.segments == 0 {
            self.metrics.no_line_frames += 1;
        }
        if let Some((left, right)) = &signal.lanes {
            debug!("left lane: {} | right lane: {}", left, right);
        }

        let command = self.policy.decide(signal.angle);
        debug!(
            "angle {} from {} segments → {}",
            signal.angle,
            signal.segments,
            command.as_str()
        );

        self.motors
            .apply(command)
            .with_context(|| format!("Failed to apply {}", command.as_str()))?;
        self.metrics.commands.record(command);
        Ok(())
    }
}
