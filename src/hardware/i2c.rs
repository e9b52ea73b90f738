//! Linux I2C character device (`/dev/i2c-N`)

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::RegisterBus;
use crate::{Error, Result};

/// `I2C_SLAVE` ioctl request from `linux/i2c-dev.h`
#[cfg(target_os = "linux")]
const I2C_SLAVE: u64 = 0x0703;

/// An I2C adapter bound to a single slave address
pub struct I2cBus {
    path: PathBuf,
    file: Mutex<File>,
}

impl I2cBus {
    /// Open `/dev/i2c-{bus}` and address `address`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the adapter cannot be opened or addressed
    pub fn open(bus: u8, address: u16) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/i2c-{bus}"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Device(format!("{}: {e}", path.display())))?;

        set_slave_address(&file, address)
            .map_err(|e| Error::Device(format!("{}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), address = format_args!("{address:#04x}"), "i2c bus opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl RegisterBus for I2cBus {
    fn write_register(&self, register: u8, value: u8) -> Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&[register, value]).map_err(|e| {
            Error::Bus(format!(
                "{}: write {register:#04x}={value:#04x}: {e}",
                self.path.display()
            ))
        })
    }

    fn read_register(&self, register: u8) -> Result<u8> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let mut value = [0u8; 1];
        file.write_all(&[register])
            .and_then(|()| file.read_exact(&mut value))
            .map_err(|e| {
                Error::Bus(format!("{}: read {register:#04x}: {e}", self.path.display()))
            })?;
        Ok(value[0])
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_slave_address(file: &File, address: u16) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call;
    // I2C_SLAVE takes the address by value.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            I2C_SLAVE as _,
            libc::c_ulong::from(address),
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_slave_address(_file: &File, _address: u16) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "i2c-dev is only available on Linux",
    ))
}
