// src/pipeline/supervisor.rs
//
// Brings the board up, runs a job, and resets the board exactly once no
// matter how the job ends: Ok, Err, panic, or a failed init.

use crate::actuation::Hardware;
use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, info, warn};

/// How the supervised job ended. Job failures are reported here, not
/// propagated; only a failed reset is an `Err` from the supervisor.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Failed(anyhow::Error),
    Panicked(String),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Folds the outcome back into a `Result` for callers that want `?`.
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Completed(value) => Ok(value),
            Outcome::Failed(e) => Err(e),
            Outcome::Panicked(msg) => Err(anyhow!("run panicked: {}", msg)),
        }
    }
}

/// Holds the hardware until it has been reset once. Dropping an un-reset
/// guard (e.g. while unwinding) still resets.
pub struct ResetGuard<H: Hardware> {
    hardware: Option<H>,
}

impl<H: Hardware> ResetGuard<H> {
    pub fn new(hardware: H) -> Self {
        Self {
            hardware: Some(hardware),
        }
    }

    pub fn reset(mut self) -> Result<()> {
        match self.hardware.take() {
            Some(mut hardware) => hardware.reset(),
            None => Ok(()),
        }
    }
}

impl<H: Hardware> Drop for ResetGuard<H> {
    fn drop(&mut self) {
        if let Some(mut hardware) = self.hardware.take() {
            warn!("Reset guard dropped without explicit reset, resetting now");
            if let Err(e) = hardware.reset() {
                error!("Hardware reset failed: {:#}", e);
            }
        }
    }
}

pub struct Supervisor<H: Hardware> {
    hardware: H,
}

impl<H: Hardware> Supervisor<H> {
    pub fn new(hardware: H) -> Self {
        Self { hardware }
    }

    pub fn run<T>(self, job: impl FnOnce() -> Result<T>) -> Result<Outcome<T>> {
        let mut hardware = self.hardware;
        let init = hardware.init();
        let guard = ResetGuard::new(hardware);

        let outcome = match init {
            Err(e) => {
                error!("Hardware init failed: {:#}", e);
                Outcome::Failed(e.context("Hardware init failed"))
            }
            Ok(()) => {
                info!("✓ Hardware initialized");
                match panic::catch_unwind(AssertUnwindSafe(job)) {
                    Ok(Ok(value)) => Outcome::Completed(value),
                    Ok(Err(e)) => {
                        error!("Run failed: {:#}", e);
                        Outcome::Failed(e)
                    }
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        error!("Run panicked: {}", msg);
                        Outcome::Panicked(msg)
                    }
                }
            }
        };

        info!("Final reset");
        if let Err(e) = guard.reset() {
            error!("Hardware reset failed: {:#}", e);
            return Err(e).context("Hardware reset failed");
        }
        info!("✓ Hardware reset");

        Ok(outcome)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingHardware {
        inits: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
        fail_init: bool,
        fail_reset: bool,
    }

    impl CountingHardware {
        fn resets(&self) -> usize {
            self.resets.load(Ordering::SeqCst)
        }
    }

    impl Hardware for CountingHardware {
        fn init(&mut self) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                bail!("I2C bus not found");
            }
            Ok(())
        }

        fn reset(&mut self) -> Result<()> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            if self.fail_reset {
                bail!("reset pin stuck");
            }
            Ok(())
        }
    }

    #[test]
    fn test_success_resets_once() {
        let hw = CountingHardware::default();
        let outcome = Supervisor::new(hw.clone()).run(|| Ok(42)).unwrap();
        assert!(matches!(outcome, Outcome::Completed(42)));
        assert_eq!(hw.inits.load(Ordering::SeqCst), 1);
        assert_eq!(hw.resets(), 1);
    }

    #[test]
    fn test_error_is_captured_and_resets_once() {
        let hw = CountingHardware::default();
        let resets = hw.resets.clone();
        let outcome = Supervisor::new(hw.clone())
            .run(|| -> Result<()> {
                // the reset must not have happened before the failure is captured
                assert_eq!(resets.load(Ordering::SeqCst), 0);
                bail!("lane extraction failed")
            })
            .unwrap();

        match outcome {
            Outcome::Failed(e) => assert!(e.to_string().contains("lane extraction")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(hw.resets(), 1);
    }

    #[test]
    fn test_panic_is_captured_and_resets_once() {
        let hw = CountingHardware::default();
        let outcome = Supervisor::new(hw.clone())
            .run(|| -> Result<()> { panic!("index out of bounds") })
            .unwrap();

        match outcome {
            Outcome::Panicked(msg) => assert!(msg.contains("index out of bounds")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(hw.resets(), 1);
    }

    #[test]
    fn test_failed_init_skips_job_but_resets() {
        let hw = CountingHardware {
            fail_init: true,
            ..CountingHardware::default()
        };
        let mut ran = false;
        let outcome = Supervisor::new(hw.clone())
            .run(|| {
                ran = true;
                Ok(())
            })
            .unwrap();

        assert!(!ran);
        assert!(!outcome.is_completed());
        assert!(outcome.into_result().is_err());
        assert_eq!(hw.resets(), 1);
    }

    #[test]
    fn test_reset_failure_is_fatal() {
        let hw = CountingHardware {
            fail_reset: true,
            ..CountingHardware::default()
        };
        assert!(Supervisor::new(hw.clone()).run(|| Ok(())).is_err());
        assert_eq!(hw.resets(), 1);
    }

    #[test]
    fn test_guard_resets_on_drop() {
        let hw = CountingHardware::default();
        drop(ResetGuard::new(hw.clone()));
        assert_eq!(hw.resets(), 1);
    }

    #[test]
    fn test_guard_explicit_reset_does_not_repeat_on_drop() {
        let hw = CountingHardware::default();
        ResetGuard::new(hw.clone()).reset().unwrap();
        assert_eq!(hw.resets(), 1);
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Outcome::Completed(3).into_result().unwrap(), 3);
        let panicked: Outcome<()> = Outcome::Panicked("boom".to_string());
        assert!(panicked.into_result().is_err());
    }
}
