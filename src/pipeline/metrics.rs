// src/pipeline/metrics.rs
//
// Per-run counters for the control loop, summarised into a RunReport once
// the loop leaves Running.

use super::control_loop::LoopState;
use crate::types::SteeringCommand;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandCounts {
    pub forward: u64,
    pub backward: u64,
    pub left: u64,
    pub right: u64,
    pub stop: u64,
}

impl CommandCounts {
    pub fn record(&mut self, command: SteeringCommand) {
        let counter = match command {
            SteeringCommand::Forward(_) => &mut self.forward,
            SteeringCommand::Backward(_) => &mut self.backward,
            SteeringCommand::TurnLeft(_) => &mut self.left,
            SteeringCommand::TurnRight(_) => &mut self.right,
            SteeringCommand::Stop => &mut self.stop,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u64 {
        self.forward + self.backward + self.left + self.right + self.stop
    }
}

#[derive(Debug, Clone)]
pub struct LoopMetrics {
    pub iterations: u64,
    pub frames_processed: u64,
    pub frames_missed: u64,
    pub commands: CommandCounts,
    pub overruns: u64,
    pub no_line_frames: u64,
    pub started_at: Instant,
    window_start: Instant,
    window_frames: u64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            iterations: 0,
            frames_processed: 0,
            frames_missed: 0,
            commands: CommandCounts::default(),
            overruns: 0,
            no_line_frames: 0,
            started_at: now,
            window_start: now,
            window_frames: 0,
        }
    }

    pub fn frame_processed(&mut self) {
        self.frames_processed += 1;
        self.window_frames += 1;
    }

    pub fn fps(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            self.frames_processed as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Frame rate over the last window, once at least `period` has passed.
    /// Starts a new window when it returns.
    pub fn take_window_fps(&mut self, period: Duration) -> Option<f64> {
        let elapsed = self.window_start.elapsed();
        if elapsed < period {
            return None;
        }
        let fps = self.window_frames as f64 / elapsed.as_secs_f64();
        self.window_start = Instant::now();
        self.window_frames = 0;
        Some(fps)
    }

    pub fn report(&self, final_state: LoopState) -> RunReport {
        RunReport {
            iterations: self.iterations,
            frames_processed: self.frames_processed,
            frames_missed: self.frames_missed,
            commands: self.commands,
            overruns: self.overruns,
            no_line_frames: self.no_line_frames,
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
            final_state,
        }
    }
}

impl Default for LoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub iterations: u64,
    pub frames_processed: u64,
    pub frames_missed: u64,
    pub commands: CommandCounts,
    pub overruns: u64,
    pub no_line_frames: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
    pub final_state: LoopState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_counts() {
        let mut counts = CommandCounts::default();
        counts.record(SteeringCommand::Forward(10));
        counts.record(SteeringCommand::Forward(10));
        counts.record(SteeringCommand::TurnLeft(5));
        counts.record(SteeringCommand::Stop);
        assert_eq!(counts.forward, 2);
        assert_eq!(counts.left, 1);
        assert_eq!(counts.stop, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_window_fps_waits_for_period() {
        let mut metrics = LoopMetrics::new();
        metrics.frame_processed();
        assert!(metrics.take_window_fps(Duration::from_secs(60)).is_none());
        assert!(metrics.take_window_fps(Duration::ZERO).is_some());
        assert_eq!(metrics.frames_processed, 1);
    }

    #[test]
    fn test_report_serializes() {
        let report = LoopMetrics::new().report(LoopState::Stopped);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"final_state\":\"Stopped\""));
    }
}
