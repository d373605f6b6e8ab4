// src/actuation/dry_run.rs

use super::{Hardware, Motors, RangeSensor, Servo};
use anyhow::Result;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct DryRunMotors {
    left: i32,
    right: i32,
}

impl DryRunMotors {
    pub fn speeds(&self) -> (i32, i32) {
        (self.left, self.right)
    }
}

impl Motors for DryRunMotors {
    fn speed(&mut self, left: i32, right: i32) -> Result<()> {
        if (left, right) != (self.left, self.right) {
            debug!("[dry-run] motors L={} R={}", left, right);
        }
        self.left = left;
        self.right = right;
        Ok(())
    }
}

#[derive(Debug)]
pub struct DryRunServo {
    channel: u8,
    angle: i32,
}

impl DryRunServo {
    pub fn new(channel: u8) -> Self {
        Self { channel, angle: 0 }
    }

    pub fn current(&self) -> i32 {
        self.angle
    }
}

impl Servo for DryRunServo {
    fn angle(&mut self, degrees: i32) -> Result<()> {
        self.angle = degrees.clamp(-90, 90);
        debug!("[dry-run] servo P{} -> {}°", self.channel, self.angle);
        Ok(())
    }
}

/// Always reports open road.
#[derive(Debug)]
pub struct DryRunSensor {
    distance_cm: f64,
}

impl Default for DryRunSensor {
    fn default() -> Self {
        Self { distance_cm: 100.0 }
    }
}

impl RangeSensor for DryRunSensor {
    fn read_cm(&mut self) -> Result<f64> {
        Ok(self.distance_cm)
    }
}

#[derive(Debug, Default)]
pub struct DryRunHardware {
    resets: usize,
}

impl DryRunHardware {
    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl Hardware for DryRunHardware {
    fn init(&mut self) -> Result<()> {
        info!("[dry-run] hardware init");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        info!("[dry-run] MCU reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SteeringCommand;

    #[test]
    fn test_motors_track_last_command() {
        let mut motors = DryRunMotors::default();
        motors.apply(SteeringCommand::TurnRight(15)).unwrap();
        assert_eq!(motors.speeds(), (15, -15));
        motors.stop().unwrap();
        motors.stop().unwrap();
        assert_eq!(motors.speeds(), (0, 0));
    }

    #[test]
    fn test_servo_clamps() {
        let mut servo = DryRunServo::new(2);
        servo.angle(120).unwrap();
        assert_eq!(servo.current(), 90);
    }

    #[test]
    fn test_reset_is_repeatable() {
        let mut hw = DryRunHardware::default();
        hw.reset().unwrap();
        hw.reset().unwrap();
        assert_eq!(hw.resets(), 2);
    }
}
