//! # RC car library.
//!
//! This library allows the executable, benchmarks and other crates in the workspace to access
//! the items defined inside the RC car crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Actuator driver - converts steering and power demands into servo pulses and motor driver
/// outputs
pub mod act_drv;

/// Control loop - receives commands, applies them and polls the failsafe
pub mod ctrl_loop;

/// Failsafe - disarms the car when commands stop arriving
pub mod failsafe;

/// Hardware - the PWM controller and digital outputs, real and simulated
pub mod hw;

/// Executable parameters
pub mod params;
