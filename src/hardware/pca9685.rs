//! PCA9685 16-channel PWM driver
//!
//! Translates servo angles into pulse widths and records the last commanded
//! angle per channel.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::RegisterBus;
use crate::{Error, Result};

/// Number of PWM outputs on the chip
pub const CHANNEL_COUNT: u8 = 16;

const MODE1: u8 = 0x00;
const PRESCALE: u8 = 0xFE;
const LED0_ON_L: u8 = 0x06;

const MODE1_SLEEP: u8 = 0x10;
const MODE1_RESTART: u8 = 0x80;

/// Internal oscillator frequency
const OSCILLATOR_HZ: f64 = 25_000_000.0;

/// Counter steps per PWM frame
const STEPS_PER_FRAME: f64 = 4096.0;

/// Pulse width at 0°
const MIN_PULSE_US: f64 = 500.0;

/// Pulse width at 180°
const MAX_PULSE_US: f64 = 2500.0;

/// Oscillator settle time after waking from sleep
const WAKE_DELAY: Duration = Duration::from_millis(5);

/// Clamp an angle into the servo range
#[must_use]
pub fn clamp_angle(angle: f64) -> f64 {
    angle.clamp(0.0, 180.0)
}

/// Counter value at which the pulse for `angle` ends
///
/// `frame_us` is the PWM period (20 000 µs at 50 Hz).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pulse_ticks(angle: f64, frame_us: f64) -> u16 {
    let pulse_us = MIN_PULSE_US + (clamp_angle(angle) / 180.0) * (MAX_PULSE_US - MIN_PULSE_US);
    (pulse_us * STEPS_PER_FRAME / frame_us) as u16
}

/// Actuator driver owning the servo bus
pub struct ServoDriver {
    bus: Box<dyn RegisterBus>,
    frame_us: f64,
    angles: Mutex<[Option<f64>; CHANNEL_COUNT as usize]>,
}

impl ServoDriver {
    /// Reset the chip and program the PWM frame frequency
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if any register access fails
    pub fn new(bus: Box<dyn RegisterBus>, frequency: f64) -> Result<Self> {
        if frequency <= 0.0 {
            return Err(Error::Config(format!("invalid PWM frequency {frequency}")));
        }

        let driver = Self {
            bus,
            frame_us: 1_000_000.0 / frequency,
            angles: Mutex::new([None; CHANNEL_COUNT as usize]),
        };
        driver.bus.write_register(MODE1, 0x00)?;
        driver.set_pwm_frequency(frequency)?;

        tracing::debug!(frequency, "servo driver initialized");
        Ok(driver)
    }

    fn set_pwm_frequency(&self, frequency: f64) -> Result<()> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let prescale = (OSCILLATOR_HZ / STEPS_PER_FRAME / frequency - 1.0 + 0.5).floor() as u8;

        let old_mode = self.bus.read_register(MODE1)?;
        self.bus
            .write_register(MODE1, (old_mode & 0x7F) | MODE1_SLEEP)?;
        self.bus.write_register(PRESCALE, prescale)?;
        self.bus.write_register(MODE1, old_mode)?;
        std::thread::sleep(WAKE_DELAY);
        self.bus.write_register(MODE1, old_mode | MODE1_RESTART)?;

        tracing::trace!(prescale, "pwm prescale programmed");
        Ok(())
    }

    /// Raw on/off counters for one channel; callers hold the angle lock
    fn write_pwm(&self, channel: u8, on: u16, off: u16) -> Result<()> {
        if channel >= CHANNEL_COUNT {
            return Err(Error::Bus(format!("channel {channel} out of range")));
        }

        let base = LED0_ON_L + 4 * channel;
        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        self.bus.write_register(base, on_l)?;
        self.bus.write_register(base + 1, on_h)?;
        self.bus.write_register(base + 2, off_l)?;
        self.bus.write_register(base + 3, off_h)
    }

    /// Move a servo straight to `angle` (clamped to 0..=180)
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if the write fails
    pub fn set_angle_instant(&self, channel: u8, angle: f64) -> Result<()> {
        let angle = clamp_angle(angle);
        let mut angles = self.angles.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_pwm(channel, 0, pulse_ticks(angle, self.frame_us))?;
        angles[usize::from(channel)] = Some(angle);
        Ok(())
    }

    /// Last angle commanded on `channel`, if any
    #[must_use]
    pub fn angle(&self, channel: u8) -> Option<f64> {
        self.angles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(usize::from(channel))
            .copied()
            .flatten()
    }
}
