// src/actuation/mod.rs
//
// Actuator and sensor seams. The control loop and the self-checks only see
// these traits; `dry_run` logs, `robot_hat` drives the real board.

pub mod dry_run;
#[cfg(feature = "robot-hat")]
pub mod robot_hat;

use crate::types::{Config, HardwareBackend, SteeringCommand};
use anyhow::Result;
use tracing::info;

pub use dry_run::{DryRunHardware, DryRunMotors, DryRunSensor, DryRunServo};

/// Differential drive. Speeds are percentages, sign selects direction.
///
/// `stop` must be safe to call any number of times.
pub trait Motors {
    fn speed(&mut self, left: i32, right: i32) -> Result<()>;

    fn forward(&mut self, speed: i32) -> Result<()> {
        self.speed(speed, speed)
    }

    fn backward(&mut self, speed: i32) -> Result<()> {
        self.speed(-speed, -speed)
    }

    fn turn_left(&mut self, speed: i32) -> Result<()> {
        self.speed(-speed, speed)
    }

    fn turn_right(&mut self, speed: i32) -> Result<()> {
        self.speed(speed, -speed)
    }

    fn stop(&mut self) -> Result<()> {
        self.speed(0, 0)
    }

    fn apply(&mut self, command: SteeringCommand) -> Result<()> {
        match command {
            SteeringCommand::Forward(s) => self.forward(s),
            SteeringCommand::Backward(s) => self.backward(s),
            SteeringCommand::TurnLeft(s) => self.turn_left(s),
            SteeringCommand::TurnRight(s) => self.turn_right(s),
            SteeringCommand::Stop => self.stop(),
        }
    }
}

impl<M: Motors + ?Sized> Motors for Box<M> {
    fn speed(&mut self, left: i32, right: i32) -> Result<()> {
        (**self).speed(left, right)
    }

    fn forward(&mut self, speed: i32) -> Result<()> {
        (**self).forward(speed)
    }

    fn backward(&mut self, speed: i32) -> Result<()> {
        (**self).backward(speed)
    }

    fn turn_left(&mut self, speed: i32) -> Result<()> {
        (**self).turn_left(speed)
    }

    fn turn_right(&mut self, speed: i32) -> Result<()> {
        (**self).turn_right(speed)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

pub trait Servo {
    /// Degrees in -90..=90.
    fn angle(&mut self, degrees: i32) -> Result<()>;
}

impl<S: Servo + ?Sized> Servo for Box<S> {
    fn angle(&mut self, degrees: i32) -> Result<()> {
        (**self).angle(degrees)
    }
}

pub trait RangeSensor {
    fn read_cm(&mut self) -> Result<f64>;
}

impl<R: RangeSensor + ?Sized> RangeSensor for Box<R> {
    fn read_cm(&mut self) -> Result<f64> {
        (**self).read_cm()
    }
}

/// Board-level lifecycle. `reset` must work after a failed `init`.
pub trait Hardware {
    fn init(&mut self) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
}

impl<H: Hardware + ?Sized> Hardware for Box<H> {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}

pub type BoxedMotors = Box<dyn Motors + Send>;
pub type BoxedServo = Box<dyn Servo + Send>;
pub type BoxedSensor = Box<dyn RangeSensor + Send>;
pub type BoxedHardware = Box<dyn Hardware + Send>;

/// Board lifecycle handle only. Motors and servos are opened after
/// `Hardware::init` has brought the MCU up.
pub fn hardware(config: &Config) -> Result<BoxedHardware> {
    match config.hardware {
        HardwareBackend::DryRun => Ok(Box::new(DryRunHardware::default())),
        HardwareBackend::RobotHat => robot_hat_hardware(),
    }
}

/// Opens motors, servos and range sensor. Servos are moved to their
/// configured start angles.
pub fn open_devices(config: &Config) -> Result<(BoxedMotors, Vec<BoxedServo>, BoxedSensor)> {
    let (motors, mut servos, sensor) = match config.hardware {
        HardwareBackend::DryRun => dry_run_devices(),
        HardwareBackend::RobotHat => robot_hat_devices(config)?,
    };

    for (servo, &angle) in servos.iter_mut().zip(config.servos.init_angles.iter()) {
        servo.angle(angle)?;
    }

    info!("✓ Actuators ready ({:?})", config.hardware);
    Ok((motors, servos, sensor))
}

fn dry_run_devices() -> (BoxedMotors, Vec<BoxedServo>, BoxedSensor) {
    let servos: Vec<BoxedServo> = (0..3)
        .map(|channel| Box::new(DryRunServo::new(channel)) as BoxedServo)
        .collect();
    (
        Box::new(DryRunMotors::default()),
        servos,
        Box::new(DryRunSensor::default()),
    )
}

#[cfg(feature = "robot-hat")]
fn robot_hat_hardware() -> Result<BoxedHardware> {
    Ok(Box::new(robot_hat::RobotHat::new()?))
}

#[cfg(not(feature = "robot-hat"))]
fn robot_hat_hardware() -> Result<BoxedHardware> {
    anyhow::bail!("hardware backend `robot_hat` needs the `robot-hat` cargo feature")
}

#[cfg(feature = "robot-hat")]
fn robot_hat_devices(config: &Config) -> Result<(BoxedMotors, Vec<BoxedServo>, BoxedSensor)> {
    use anyhow::Context;

    let pwm = robot_hat::PwmController::shared().context("PWM controller init failed")?;
    let motors =
        robot_hat::HatMotors::new(pwm.clone(), &config.motors).context("motors init failed")?;
    let mut servos: Vec<BoxedServo> = Vec::with_capacity(3);
    for channel in 0..3u8 {
        let servo = robot_hat::HatServo::new(pwm.clone(), channel)
            .with_context(|| format!("servo P{} init failed", channel))?;
        servos.push(Box::new(servo));
    }
    let sensor = robot_hat::Ultrasonic::new(&config.sensor).context("ultrasonic init failed")?;

    Ok((Box::new(motors), servos, Box::new(sensor)))
}

#[cfg(not(feature = "robot-hat"))]
fn robot_hat_devices(_config: &Config) -> Result<(BoxedMotors, Vec<BoxedServo>, BoxedSensor)> {
    anyhow::bail!("hardware backend `robot_hat` needs the `robot-hat` cargo feature")
}
