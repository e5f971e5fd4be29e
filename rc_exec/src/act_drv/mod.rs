//! Actuator driver module
//!
//! Turns steering and power demands into PWM controller and motor driver line writes for the
//! car's two actuators:
//! - Steering servo, positioned by pulse width.
//! - Drive motor, through an H-bridge with a PWM speed input, two direction inputs, and a standby
//!   input gating its power.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use params::*;
pub use state::*;
use crate::hw::HwError;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Full scale of permille demands.
pub const PERMILLE_MAX: i32 = 1000;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur when creating the actuator driver.
#[derive(Debug, thiserror::Error)]
pub enum ActDrvError {
    #[error("PWM channel {0} is out of range, the controller has 16 channels")]
    InvalidChannel(u8),

    #[error("The servo and motor can't share PWM channel {0}")]
    DuplicateChannel(u8),

    #[error("PWM frequency must be positive, found {0} Hz")]
    InvalidPwmFreq(f64),

    #[error("Servo centre pulse ({center} us) must lie between left ({left} us) and right ({right} us)")]
    InvalidServoCalibration {
        center: f64,
        left: f64,
        right: f64
    },

    #[error("Maximum duty must be in (0, 1], found {0}")]
    InvalidMaxDuty(f64),

    #[error("Deadzone must be in [0, 1000) permille, found {0}")]
    InvalidDeadzone(i32),

    #[error("Hardware error: {0}")]
    Hw(#[from] HwError),
}
