//! # Hardware Module
//!
//! Abstractions over the two hardware buses the car is driven through:
//! - A PCA9685 PWM controller on I2C, driving the steering servo and the motor driver's PWM input.
//! - Discrete digital outputs for the motor driver's standby and direction inputs.
//!
//! Both are generic over a bus/pin type so that the same code runs against the Raspberry Pi
//! peripherals ([`pi`]) or the simulated hardware ([`sim`]).

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// PCA9685 PWM controller driver.
pub mod pwm;

/// Motor driver control lines.
pub mod dout;

/// In-memory hardware used for testing and running off-target.
pub mod sim;

/// Raspberry Pi bring-up of the I2C bus and GPIO lines.
#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
pub mod pi;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A fault on one of the hardware buses.
///
/// Any of these leave the hardware in an unknown state, so they are treated as fatal by the
/// control loop.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HwError {
    #[error(
        "Short transfer on register {reg:#04x}: expected {expected} bytes, transferred {actual}"
    )]
    ShortTransfer {
        reg: u8,
        expected: usize,
        actual: usize
    },

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Output line error: {0}")]
    Line(String),

    #[error("Cannot configure a PWM frequency of {0} Hz")]
    InvalidFrequency(f64),
}
