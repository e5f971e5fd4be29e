//! PCA9685 16 channel PWM controller driver
//!
//! The driver works at the register level over any [`RegisterBus`]. Opening the bus, and
//! addressing the device on it, is done by the caller.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{thread, time::Duration};
use log::debug;

use util::maths::{clamp, round_to_u16};
use super::HwError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of PWM channels on the controller.
pub const NUM_CHANNELS: u8 = 16;

/// Largest on/off tick value.
pub const MAX_TICK: u16 = 4095;

/// Number of ticks in one PWM cycle.
pub const RESOLUTION: f64 = 4096.0;

/// Frequency of the controller's internal oscillator.
pub const REF_CLOCK_HZ: f64 = 25_000_000.0;

/// Minimum time between waking the oscillator and issuing any further write.
///
/// The datasheet requires the oscillator to be stable (500 us max) before the restart bit is set,
/// writing earlier gives undefined output timing.
pub const OSC_SETTLE_DELAY: Duration = Duration::from_millis(5);

/// Lowest PWM frequency the controller can produce, prescale 253.
pub const MIN_FREQ_HZ: f64 = 24.0;

/// Highest PWM frequency the controller can produce, prescale 3.
pub const MAX_FREQ_HZ: f64 = 1526.0;

/// Prescale value after power on.
const POWER_ON_PRESCALE: u8 = 0x1e;

/// Register addresses
pub mod reg {
    pub const MODE1: u8 = 0x00;
    pub const MODE2: u8 = 0x01;
    pub const LED0_ON_L: u8 = 0x06;
    pub const PRESCALE: u8 = 0xfe;
}

/// MODE1 register bits
pub mod mode1 {
    pub const ALLCALL: u8 = 0x01;
    pub const SLEEP: u8 = 0x10;
    pub const AI: u8 = 0x20;
    pub const RESTART: u8 = 0x80;
}

/// MODE2 register bits
pub mod mode2 {
    pub const OUTDRV: u8 = 0x04;
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Register level access to a device on a bus.
///
/// Implementations must return [`HwError::ShortTransfer`] if a transfer moves fewer bytes than
/// requested, the device can't be trusted to be in a known state after that.
pub trait RegisterBus {
    /// Write a single register.
    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), HwError>;

    /// Read a single register.
    fn read_reg(&mut self, reg: u8) -> Result<u8, HwError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A PCA9685 on an already opened and addressed bus.
pub struct PwmDevice<B> {
    bus: B,

    /// Nominal length of one PWM cycle.
    ///
    /// Units: microseconds
    period_us: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<B: RegisterBus> PwmDevice<B> {
    /// Take ownership of the device and set up its output modes.
    ///
    /// Outputs are set to totem-pole drive and register auto-increment is enabled. The PWM
    /// frequency is left at the device's current value until [`PwmDevice::configure`] is called.
    pub fn open(mut bus: B) -> Result<Self, HwError> {
        bus.write_reg(reg::MODE2, mode2::OUTDRV)?;
        bus.write_reg(reg::MODE1, mode1::ALLCALL | mode1::AI)?;

        Ok(Self {
            bus,
            period_us: prescale_to_period_us(POWER_ON_PRESCALE),
        })
    }

    /// Set the PWM frequency of all channels.
    ///
    /// The prescaler can only be written while the oscillator is asleep, so the device is put to
    /// sleep, the prescaler written, then the oscillator is woken and restarted after
    /// [`OSC_SETTLE_DELAY`]. This blocks for the settle delay.
    pub fn configure(&mut self, frequency_hz: f64) -> Result<(), HwError> {
        let prescale = prescale_for(frequency_hz)?;

        let old_mode = self.bus.read_reg(reg::MODE1)?;

        // Restart must not be written as 1 while going to sleep
        self.bus.write_reg(reg::MODE1, (old_mode & !mode1::RESTART) | mode1::SLEEP)?;
        self.bus.write_reg(reg::PRESCALE, prescale)?;

        let wake_mode = (old_mode & !mode1::SLEEP) | mode1::AI;
        self.bus.write_reg(reg::MODE1, wake_mode)?;

        thread::sleep(OSC_SETTLE_DELAY);

        self.bus.write_reg(reg::MODE1, wake_mode | mode1::RESTART)?;

        self.period_us = 1e6 / frequency_hz;

        debug!(
            "PWM frequency set to {} Hz (prescale {}, period {:.1} us)",
            frequency_hz, prescale, self.period_us
        );

        Ok(())
    }

    /// Write the on and off ticks of a channel.
    ///
    /// Ticks are clamped to [`MAX_TICK`]. `channel` must be less than [`NUM_CHANNELS`], this is
    /// checked where channels are configured rather than on every write.
    pub fn set_channel(&mut self, channel: u8, on_tick: u16, off_tick: u16) -> Result<(), HwError> {
        debug_assert!(channel < NUM_CHANNELS, "PWM channel {} out of range", channel);

        let on = on_tick.min(MAX_TICK);
        let off = off_tick.min(MAX_TICK);
        let base = reg::LED0_ON_L + 4 * channel;

        self.bus.write_reg(base, (on & 0xff) as u8)?;
        self.bus.write_reg(base + 1, (on >> 8) as u8)?;
        self.bus.write_reg(base + 2, (off & 0xff) as u8)?;
        self.bus.write_reg(base + 3, (off >> 8) as u8)
    }

    /// Set a channel's duty cycle as a fraction of the period. `fraction` is clamped to [0, 1].
    pub fn set_duty(&mut self, channel: u8, fraction: f64) -> Result<(), HwError> {
        let fraction = clamp(&fraction, &0.0, &1.0);
        let off = round_to_u16(fraction * MAX_TICK as f64, MAX_TICK);

        self.set_channel(channel, 0, off)
    }

    /// Set a channel's pulse width given the PWM period.
    pub fn set_pulse_us(
        &mut self,
        channel: u8,
        microseconds: f64,
        period_us: f64
    ) -> Result<(), HwError> {
        let ticks = round_to_u16(microseconds * RESOLUTION / period_us, MAX_TICK);

        self.set_channel(channel, 0, ticks)
    }

    /// Nominal period of the configured PWM frequency.
    pub fn period_us(&self) -> f64 {
        self.period_us
    }

    /// Access the underlying bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compute the prescale register value for the given frequency.
///
/// `prescale = round(REF_CLOCK_HZ / (RESOLUTION * frequency_hz)) - 1`. Frequencies outside
/// [`MIN_FREQ_HZ`, `MAX_FREQ_HZ`] are rejected, the prescaler would saturate and the output
/// period would no longer match the requested one.
pub fn prescale_for(frequency_hz: f64) -> Result<u8, HwError> {
    // Also rejects NaN
    if !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&frequency_hz) {
        return Err(HwError::InvalidFrequency(frequency_hz));
    }

    let prescale = (REF_CLOCK_HZ / (RESOLUTION * frequency_hz)).round() - 1.0;

    Ok(prescale as u8)
}

fn prescale_to_period_us(prescale: u8) -> f64 {
    1e6 * RESOLUTION * (prescale as f64 + 1.0) / REF_CLOCK_HZ
}
