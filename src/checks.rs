// src/checks.rs
//
// Bench self-check for the car: ranger, drive motors, servos. Meant to run
// under the supervisor so the board is reset afterwards.

use crate::actuation::{Motors, RangeSensor, Servo};
use crate::types::{Config, PolicyConfig, SteeringCommand};
use anyhow::{Context, Result};
use serde::Serialize;
use std::thread::sleep;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    /// One entry per sample; `None` where the ranger gave no echo.
    pub distances_cm: Vec<Option<f64>>,
    pub motor_commands: usize,
    pub servos_moved: usize,
}

impl CheckReport {
    pub fn sensor_failures(&self) -> usize {
        self.distances_cm.iter().filter(|d| d.is_none()).count()
    }
}

/// Takes `samples` readings `interval` apart. A missing echo is logged and
/// recorded, not treated as a failure.
pub fn check_sensor<R: RangeSensor + ?Sized>(
    sensor: &mut R,
    samples: usize,
    interval: Duration,
) -> Vec<Option<f64>> {
    let mut distances = Vec::with_capacity(samples);
    for i in 0..samples {
        match sensor.read_cm() {
            Ok(cm) => {
                info!("Distance: {:.1} cm", cm);
                distances.push(Some(cm));
            }
            Err(e) => {
                warn!("Range sample {} failed: {:#}", i + 1, e);
                distances.push(None);
            }
        }
        if i + 1 < samples {
            sleep(interval);
        }
    }
    distances
}

/// forward → left → right → backward → stop at the configured speeds.
pub fn check_motors<M: Motors + ?Sized>(motors: &mut M, policy: &PolicyConfig) -> Result<usize> {
    let sequence = [
        SteeringCommand::Forward(policy.forward_speed),
        SteeringCommand::TurnLeft(policy.left_speed),
        SteeringCommand::TurnRight(policy.right_speed),
        SteeringCommand::Backward(policy.backward_speed),
        SteeringCommand::Stop,
    ];

    for command in sequence {
        info!("Motors: {}", command.as_str());
        motors
            .apply(command)
            .with_context(|| format!("Motor check failed on {}", command.as_str()))?;
    }
    Ok(sequence.len())
}

pub fn check_servos<S: Servo + ?Sized>(servos: &mut [Box<S>], angle: i32) -> Result<usize> {
    for (channel, servo) in servos.iter_mut().enumerate() {
        info!("Servo P{} -> {}°", channel, angle);
        servo
            .angle(angle)
            .with_context(|| format!("Servo P{} check failed", channel))?;
    }
    Ok(servos.len())
}

pub fn run_checks<M, S, R>(
    config: &Config,
    motors: &mut M,
    servos: &mut [Box<S>],
    sensor: &mut R,
) -> Result<CheckReport>
where
    M: Motors + ?Sized,
    S: Servo + ?Sized,
    R: RangeSensor + ?Sized,
{
    info!("Running hardware self-check");

    let distances_cm = check_sensor(
        sensor,
        config.sensor.samples,
        Duration::from_millis(config.sensor.interval_ms),
    );
    let motor_commands = check_motors(motors, &config.policy)?;
    let servos_moved = check_servos(servos, config.servos.check_angle)?;

    let report = CheckReport {
        distances_cm,
        motor_commands,
        servos_moved,
    };
    info!(
        "✓ Self-check done: {} range failures, {} motor commands, {} servos",
        report.sensor_failures(),
        report.motor_commands,
        report.servos_moved
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::{DryRunMotors, DryRunServo};
    use anyhow::bail;

    struct FlakySensor {
        reads: usize,
    }

    impl RangeSensor for FlakySensor {
        fn read_cm(&mut self) -> Result<f64> {
            self.reads += 1;
            if self.reads % 2 == 0 {
                bail!("no echo");
            }
            Ok(42.0)
        }
    }

    struct StuckServo;

    impl Servo for StuckServo {
        fn angle(&mut self, _degrees: i32) -> Result<()> {
            bail!("servo not responding")
        }
    }

    #[derive(Default)]
    struct Recorder {
        speeds: Vec<(i32, i32)>,
    }

    impl Motors for Recorder {
        fn speed(&mut self, left: i32, right: i32) -> Result<()> {
            self.speeds.push((left, right));
            Ok(())
        }
    }

    #[test]
    fn test_sensor_failures_are_recorded() {
        let mut sensor = FlakySensor { reads: 0 };
        let distances = check_sensor(&mut sensor, 5, Duration::ZERO);
        assert_eq!(distances.len(), 5);
        assert_eq!(distances.iter().filter(|d| d.is_none()).count(), 2);
        assert_eq!(distances[0], Some(42.0));
    }

    #[test]
    fn test_motor_sequence() {
        let mut motors = Recorder::default();
        let n = check_motors(&mut motors, &PolicyConfig::default()).unwrap();
        assert_eq!(n, 5);
        assert_eq!(
            motors.speeds,
            vec![(10, 10), (-5, 5), (15, -15), (-20, -20), (0, 0)]
        );
    }

    #[test]
    fn test_stuck_servo_fails_check() {
        let mut servos = vec![Box::new(StuckServo)];
        assert!(check_servos(&mut servos, 90).is_err());
    }

    #[test]
    fn test_full_check_on_dry_run() {
        let mut config = Config::default();
        config.sensor.interval_ms = 0;

        let mut motors = DryRunMotors::default();
        let mut servos: Vec<Box<DryRunServo>> =
            (0..3).map(|c| Box::new(DryRunServo::new(c))).collect();
        let mut sensor = FlakySensor { reads: 0 };

        let report = run_checks(&config, &mut motors, &mut servos, &mut sensor).unwrap();
        assert_eq!(report.distances_cm.len(), 5);
        assert_eq!(report.sensor_failures(), 2);
        assert_eq!(report.motor_commands, 5);
        assert_eq!(report.servos_moved, 3);
        assert!(servos.iter().all(|s| s.current() == 90));
        assert_eq!(motors.speeds(), (0, 0));
    }
}
