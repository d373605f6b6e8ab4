// src/pipeline/mod.rs

pub mod control_loop;
pub mod metrics;
pub mod supervisor;

pub use control_loop::{CancelToken, ControlLoop, LoopState};
pub use metrics::{CommandCounts, LoopMetrics, RunReport};
pub use supervisor::{Outcome, ResetGuard, Supervisor};
