//! Servo hardware
//!
//! The PWM driver chip sits behind the [`RegisterBus`] seam so the actuator
//! driver can be exercised without an I2C adapter.

mod i2c;
mod pca9685;

pub use i2c::I2cBus;
pub use pca9685::{CHANNEL_COUNT, ServoDriver, clamp_angle, pulse_ticks};

use crate::Result;

/// Byte-wide register access to the PWM driver chip
///
/// Only the actuator driver talks to the bus.
pub trait RegisterBus: Send + Sync {
    /// Write one register
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if the write is not acknowledged
    fn write_register(&self, register: u8, value: u8) -> Result<()>;

    /// Read one register
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if the read fails
    fn read_register(&self, register: u8) -> Result<u8>;
}
