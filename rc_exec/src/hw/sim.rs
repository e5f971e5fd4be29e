//! Simulated hardware
//!
//! A register file standing in for the PWM controller and in-memory output pins. Used when
//! running away from the car and throughout the tests.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{cell::Cell, convert::Infallible, rc::Rc};
use embedded_hal::digital::v2::OutputPin;
use log::trace;

use super::{pwm::{mode1, reg, RegisterBus}, HwError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of register writes kept by [`SimBus`]. When full the oldest half is dropped so
/// a long simulated run stays in bounded memory.
pub const WRITE_LOG_LEN: usize = 1024;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated PCA9685 register file.
pub struct SimBus {
    regs: [u8; 256],

    /// The most recent register writes in order, at most [`WRITE_LOG_LEN`].
    writes: Vec<(u8, u8)>,

    num_ops: usize,

    /// Number of transfers that succeed before every following one is short.
    fail_after: Option<usize>,
}

/// Simulated digital output pin.
///
/// Clones share the same level so a test can keep a handle to a pin that has been moved into
/// the output bank.
#[derive(Clone, Default)]
pub struct SimPin {
    high: Rc<Cell<bool>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimBus {
    /// Create a new bus with the controller in its power-on state.
    pub fn new() -> Self {
        let mut regs = [0u8; 256];
        regs[reg::MODE1 as usize] = mode1::SLEEP | mode1::ALLCALL;
        regs[reg::PRESCALE as usize] = 0x1e;

        Self {
            regs,
            writes: Vec::with_capacity(WRITE_LOG_LEN),
            num_ops: 0,
            fail_after: None,
        }
    }

    /// Make every transfer after the first `num_ops` short.
    pub fn fail_after(mut self, num_ops: usize) -> Self {
        self.fail_after = Some(num_ops);
        self
    }

    /// Current value of a register.
    pub fn reg(&self, reg: u8) -> u8 {
        self.regs[reg as usize]
    }

    /// The most recent register writes, oldest first.
    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }

    /// The (on, off) ticks currently held for a channel.
    pub fn channel_ticks(&self, channel: u8) -> (u16, u16) {
        let base = (reg::LED0_ON_L + 4 * channel) as usize;
        let on = self.regs[base] as u16 | (self.regs[base + 1] as u16) << 8;
        let off = self.regs[base + 2] as u16 | (self.regs[base + 3] as u16) << 8;
        (on, off)
    }

    fn check_transfer(&mut self, reg: u8, expected: usize) -> Result<(), HwError> {
        self.num_ops += 1;

        match self.fail_after {
            Some(n) if self.num_ops > n => Err(HwError::ShortTransfer {
                reg,
                expected,
                actual: expected - 1,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for SimBus {
    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), HwError> {
        self.check_transfer(reg, 2)?;

        trace!("sim bus write {:#04x} = {:#04x}", reg, value);

        self.regs[reg as usize] = value;

        if self.writes.len() >= WRITE_LOG_LEN {
            self.writes.drain(..WRITE_LOG_LEN / 2);
        }
        self.writes.push((reg, value));
        Ok(())
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, HwError> {
        self.check_transfer(reg, 1)?;
        Ok(self.regs[reg as usize])
    }
}

impl SimPin {
    /// Create a pin starting at the given level.
    pub fn with_level(high: bool) -> Self {
        Self {
            high: Rc::new(Cell::new(high)),
        }
    }

    pub fn is_high(&self) -> bool {
        self.high.get()
    }
}

impl OutputPin for SimPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high.set(true);
        Ok(())
    }
}
