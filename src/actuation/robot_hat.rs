// src/actuation/robot_hat.rs
//
// SunFounder Robot HAT on a Raspberry Pi. The HAT MCU exposes a PWM
// controller over I2C; motor direction, MCU reset and the ultrasonic
// ranger are plain GPIO.

use super::{Hardware, Motors, RangeSensor, Servo};
use crate::types::{MotorConfig, SensorConfig};
use anyhow::{bail, Context, Result};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use rppal::i2c::I2c;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// I2C PWM CONTROLLER
// ============================================================================

const I2C_BUS: u8 = 1;
const SLAVE_ADDR: u16 = 0x14;
const REG_PW: u8 = 0x20;
const REG_PSC: u8 = 0x40;
const REG_PER: u8 = 0x44;
const TIMERS: usize = 5;

const RESET_PIN: u8 = 5;

pub struct PwmController {
    bus: I2c,
    /// Last period written per timer, already decremented.
    periods: [u16; TIMERS],
}

pub type SharedPwm = Arc<Mutex<PwmController>>;

static CONTROLLER: Mutex<Option<SharedPwm>> = Mutex::new(None);

impl PwmController {
    /// The process-wide controller. Bus open and handshake happen on first use.
    pub fn shared() -> Result<SharedPwm> {
        open_once(&CONTROLLER, Self::open)
    }

    fn open() -> Result<Self> {
        let mut bus = I2c::with_bus(I2C_BUS).context("Failed to open I2C bus")?;
        // the MCU answers with EREMOTEIO if addressed straight after open
        sleep(Duration::from_secs(1));

        bus.set_slave_address(SLAVE_ADDR)
            .context("Failed to address PWM controller")?;
        for byte in [0x2C, 0x00, 0x00] {
            bus.smbus_send_byte(byte).context("PWM controller handshake failed")?;
        }

        debug!("PWM controller at {:#04x} on bus {}", SLAVE_ADDR, I2C_BUS);
        Ok(Self {
            bus,
            periods: [0; TIMERS],
        })
    }

    fn timer(channel: u8) -> Result<usize> {
        let timer = usize::from(channel / 4);
        if timer >= TIMERS {
            bail!("PWM channel {} out of range", channel);
        }
        Ok(timer)
    }

    pub fn prescaler(&mut self, channel: u8, prescaler: u16) -> Result<()> {
        let timer = Self::timer(channel)?;
        self.bus
            .smbus_write_word(REG_PSC + timer as u8, prescaler.saturating_sub(1).swap_bytes())
            .context("PWM prescaler write failed")?;
        Ok(())
    }

    pub fn period(&mut self, channel: u8, period: u16) -> Result<()> {
        let timer = Self::timer(channel)?;
        self.periods[timer] = period.saturating_sub(1);
        self.bus
            .smbus_write_word(REG_PER + timer as u8, self.periods[timer].swap_bytes())
            .context("PWM period write failed")?;
        Ok(())
    }

    pub fn pulse_width(&mut self, channel: u8, width: u16) -> Result<()> {
        self.bus
            .smbus_write_word(REG_PW + channel, width.swap_bytes())
            .context("PWM pulse width write failed")?;
        Ok(())
    }

    pub fn pulse_width_percent(&mut self, channel: u8, percent: u32) -> Result<()> {
        let timer = Self::timer(channel)?;
        let width = u32::from(self.periods[timer]) * percent.min(100) / 100;
        self.pulse_width(channel, width as u16)
    }
}

fn open_once<T>(
    slot: &Mutex<Option<Arc<Mutex<T>>>>,
    open: impl FnOnce() -> Result<T>,
) -> Result<Arc<Mutex<T>>> {
    let mut slot = slot
        .lock()
        .map_err(|_| anyhow::anyhow!("PWM controller slot poisoned"))?;
    if let Some(existing) = slot.as_ref() {
        return Ok(Arc::clone(existing));
    }
    let opened = Arc::new(Mutex::new(open()?));
    *slot = Some(Arc::clone(&opened));
    Ok(opened)
}

fn with_pwm<T>(pwm: &SharedPwm, f: impl FnOnce(&mut PwmController) -> Result<T>) -> Result<T> {
    let mut guard = pwm
        .lock()
        .map_err(|_| anyhow::anyhow!("PWM controller lock poisoned"))?;
    f(&mut guard)
}

fn output_pin(gpio: &Gpio, pin: u8) -> Result<OutputPin> {
    Ok(gpio
        .get(pin)
        .with_context(|| format!("GPIO {} unavailable", pin))?
        .into_output())
}

// ============================================================================
// BOARD
// ============================================================================

pub struct RobotHat {
    reset_pin: OutputPin,
}

impl RobotHat {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().context("Failed to open GPIO")?;
        Ok(Self {
            reset_pin: output_pin(&gpio, RESET_PIN)?,
        })
    }
}

impl Hardware for RobotHat {
    fn init(&mut self) -> Result<()> {
        self.reset().context("MCU reset failed during init")?;
        PwmController::shared().context("I2C initialization failed")?;
        info!("✓ Robot HAT initialized");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.reset_pin.set_low();
        sleep(Duration::from_millis(1));
        self.reset_pin.set_high();
        sleep(Duration::from_millis(1));
        debug!("MCU reset pulse on GPIO {}", RESET_PIN);
        Ok(())
    }
}

// ============================================================================
// MOTORS
// ============================================================================

const LEFT_PWM: u8 = 13;
const RIGHT_PWM: u8 = 12;
const LEFT_DIR: u8 = 23;
const RIGHT_DIR: u8 = 24;

pub struct HatMotors {
    pwm: SharedPwm,
    left_dir: OutputPin,
    right_dir: OutputPin,
}

impl HatMotors {
    pub fn new(pwm: SharedPwm, config: &MotorConfig) -> Result<Self> {
        let gpio = Gpio::new().context("Failed to open GPIO")?;
        let left_dir = output_pin(&gpio, LEFT_DIR)?;
        let right_dir = output_pin(&gpio, RIGHT_DIR)?;

        with_pwm(&pwm, |ctl| {
            for channel in [LEFT_PWM, RIGHT_PWM] {
                ctl.period(channel, config.period)?;
                ctl.prescaler(channel, config.prescaler)?;
            }
            Ok(())
        })?;

        info!(
            "✓ Motors ready (period={}, prescaler={})",
            config.period, config.prescaler
        );
        Ok(Self {
            pwm,
            left_dir,
            right_dir,
        })
    }

    /// Duty cycle for a signed speed; the motors stall below 50%.
    fn duty(speed: i32) -> u32 {
        match speed.unsigned_abs().min(100) {
            0 => 0,
            s => s / 2 + 50,
        }
    }

    fn level(speed: i32) -> Level {
        if speed > 0 {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Motors for HatMotors {
    fn speed(&mut self, left: i32, right: i32) -> Result<()> {
        // the right motor is mounted mirrored
        let right = -right;
        self.left_dir.write(Self::level(left));
        self.right_dir.write(Self::level(right));
        with_pwm(&self.pwm, |ctl| {
            ctl.pulse_width_percent(LEFT_PWM, Self::duty(left))?;
            ctl.pulse_width_percent(RIGHT_PWM, Self::duty(right))
        })
    }
}

// ============================================================================
// SERVOS
// ============================================================================

const SERVO_PERIOD: u16 = 4095;
const SERVO_PRESCALER: u16 = 351;
const SERVO_FRAME_US: u32 = 20_000;

pub struct HatServo {
    pwm: SharedPwm,
    channel: u8,
}

impl HatServo {
    pub fn new(pwm: SharedPwm, channel: u8) -> Result<Self> {
        with_pwm(&pwm, |ctl| {
            ctl.period(channel, SERVO_PERIOD)?;
            ctl.prescaler(channel, SERVO_PRESCALER)
        })?;
        Ok(Self { pwm, channel })
    }

    /// -90..=90 degrees onto a 500..=2500 µs pulse.
    pub fn pulse_us(degrees: i32) -> u32 {
        let degrees = degrees.clamp(-90, 90);
        (500 + (degrees + 90) * 2000 / 180) as u32
    }
}

impl Servo for HatServo {
    fn angle(&mut self, degrees: i32) -> Result<()> {
        let width = Self::pulse_us(degrees) * u32::from(SERVO_PERIOD) / SERVO_FRAME_US;
        with_pwm(&self.pwm, |ctl| ctl.pulse_width(self.channel, width as u16))
    }
}

// ============================================================================
// ULTRASONIC
// ============================================================================

const SOUND_CM_PER_S: f64 = 34_300.0;
const ATTEMPTS: usize = 3;

pub struct Ultrasonic {
    trig: OutputPin,
    echo: InputPin,
    timeout: Duration,
}

impl Ultrasonic {
    pub fn new(config: &SensorConfig) -> Result<Self> {
        let gpio = Gpio::new().context("Failed to open GPIO")?;
        let trig = output_pin(&gpio, config.trig_pin)?;
        let echo = gpio
            .get(config.echo_pin)
            .with_context(|| format!("GPIO {} unavailable", config.echo_pin))?
            .into_input();

        Ok(Self {
            trig,
            echo,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    fn ping(&mut self) -> Option<f64> {
        self.trig.set_low();
        sleep(Duration::from_millis(10));
        self.trig.set_high();
        sleep(Duration::from_micros(10));
        self.trig.set_low();

        let wait = Instant::now();
        while self.echo.read() == Level::Low {
            if wait.elapsed() > self.timeout {
                return None;
            }
        }

        let pulse_start = Instant::now();
        while self.echo.read() == Level::High {
            if pulse_start.elapsed() > self.timeout {
                return None;
            }
        }

        Some(pulse_start.elapsed().as_secs_f64() * SOUND_CM_PER_S / 2.0)
    }
}

impl RangeSensor for Ultrasonic {
    fn read_cm(&mut self) -> Result<f64> {
        for attempt in 1..=ATTEMPTS {
            if let Some(cm) = self.ping() {
                return Ok(cm);
            }
            warn!("Ultrasonic echo timed out (attempt {}/{})", attempt, ATTEMPTS);
        }
        bail!("ultrasonic ranger gave no echo after {} attempts", ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_cycle() {
        assert_eq!(HatMotors::duty(0), 0);
        assert_eq!(HatMotors::duty(10), 55);
        assert_eq!(HatMotors::duty(-20), 60);
        assert_eq!(HatMotors::duty(100), 100);
        assert_eq!(HatMotors::duty(250), 100);
    }

    #[test]
    fn test_servo_pulse_range() {
        assert_eq!(HatServo::pulse_us(-90), 500);
        assert_eq!(HatServo::pulse_us(0), 1500);
        assert_eq!(HatServo::pulse_us(90), 2500);
        assert_eq!(HatServo::pulse_us(180), 2500);
    }

    #[test]
    fn test_channel_timer() {
        assert_eq!(PwmController::timer(2).unwrap(), 0);
        assert_eq!(PwmController::timer(13).unwrap(), 3);
        assert!(PwmController::timer(20).is_err());
    }

    #[test]
    fn test_controller_opens_once() {
        let slot = Mutex::new(None);
        let mut opens = 0;

        let first = open_once(&slot, || {
            opens += 1;
            Ok(7u8)
        })
        .unwrap();
        let second = open_once(&slot, || -> Result<u8> {
            panic!("controller opened twice")
        })
        .unwrap();

        assert_eq!(opens, 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failed_open_is_retried() {
        let slot = Mutex::new(None);
        assert!(open_once(&slot, || -> Result<u8> { bail!("no I2C bus") }).is_err());
        assert_eq!(*open_once(&slot, || Ok(3u8)).unwrap().lock().unwrap(), 3);
    }
}
