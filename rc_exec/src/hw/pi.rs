//! Raspberry Pi hardware bring-up
//!
//! Opens the I2C bus with the PWM controller addressed on it, and requests the motor driver
//! control lines as outputs held low.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use rppal::{
    gpio::{Gpio, OutputPin},
    i2c::I2c,
};

use super::{pwm::RegisterBus, HwError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// I2C bus with a single device addressed on it.
pub struct PiI2cBus {
    i2c: I2c,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PiI2cBus {
    /// Open the given I2C bus (`/dev/i2c-<bus>`) and address the device at `address`.
    pub fn open(bus: u8, address: u16) -> Result<Self, HwError> {
        let mut i2c = I2c::with_bus(bus)
            .map_err(|e| HwError::Bus(format!("cannot open /dev/i2c-{}: {}", bus, e)))?;

        i2c.set_slave_address(address)
            .map_err(|e| HwError::Bus(format!("cannot address device {:#04x}: {}", address, e)))?;

        debug!("Opened /dev/i2c-{} at address {:#04x}", bus, address);

        Ok(Self { i2c })
    }
}

impl RegisterBus for PiI2cBus {
    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), HwError> {
        let written = self.i2c.write(&[reg, value])
            .map_err(|e| HwError::Bus(e.to_string()))?;

        check_count(reg, 2, written)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, HwError> {
        let written = self.i2c.write(&[reg])
            .map_err(|e| HwError::Bus(e.to_string()))?;
        check_count(reg, 1, written)?;

        let mut buf = [0u8; 1];
        let read = self.i2c.read(&mut buf)
            .map_err(|e| HwError::Bus(e.to_string()))?;
        check_count(reg, 1, read)?;

        Ok(buf[0])
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Request the standby, direction A, and direction B lines (BCM numbering) as outputs.
///
/// Each line is set low before it is switched to an output, so there is no window where the
/// driver is enabled or the direction is undefined. The lines are left as low outputs when
/// dropped.
pub fn open_output_lines(
    standby: u8,
    dir_a: u8,
    dir_b: u8
) -> Result<(OutputPin, OutputPin, OutputPin), HwError> {
    let gpio = Gpio::new()
        .map_err(|e| HwError::Line(format!("cannot open GPIO: {}", e)))?;

    let request = |pin: u8| -> Result<OutputPin, HwError> {
        let mut out = gpio.get(pin)
            .map(|p| p.into_output_low())
            .map_err(|e| HwError::Line(format!("cannot request GPIO {}: {}", pin, e)))?;

        // Keep the lines driven low after exit rather than floating back to inputs
        out.set_reset_on_drop(false);

        Ok(out)
    };

    // Standby first so the driver is held off while the direction lines are requested
    let standby = request(standby)?;
    let dir_a = request(dir_a)?;
    let dir_b = request(dir_b)?;

    debug!("Motor driver lines requested as outputs");

    Ok((standby, dir_a, dir_b))
}

fn check_count(reg: u8, expected: usize, actual: usize) -> Result<(), HwError> {
    if actual != expected {
        return Err(HwError::ShortTransfer { reg, expected, actual });
    }
    Ok(())
}
