//! # Failsafe Module
//!
//! Disarms the drive and centres the steering when commands stop arriving.
//!
//! There is no timer thread, the supervisor is polled from the control loop on every iteration.
//! The worst case delay between the last command and the trip is therefore the timeout plus one
//! receive timeout of the control loop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fmt::Debug,
    time::{Duration, Instant},
};
use embedded_hal::digital::v2::OutputPin;
use log::info;
use serde::Deserialize;

use crate::{
    act_drv::ActDriver,
    hw::{pwm::RegisterBus, HwError},
};
use util::time::duration_to_millis;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Failsafe parameters
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FailsafeParams {
    /// Time without an accepted command after which an armed car is made safe.
    ///
    /// Units: milliseconds
    pub timeout_ms: u64,
}

/// Failsafe supervisor state.
pub struct Failsafe {
    timeout: Duration,

    /// Time the last command was accepted, `None` if none have been yet.
    last_accepted_at: Option<Instant>,

    /// Set when the failsafe has fired, cleared by the next accepted command.
    tripped: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for FailsafeParams {
    fn default() -> Self {
        Self { timeout_ms: 250 }
    }
}

impl Failsafe {
    pub fn new(params: &FailsafeParams) -> Self {
        Self {
            timeout: Duration::from_millis(params.timeout_ms),
            last_accepted_at: None,
            tripped: false,
        }
    }

    /// Record that a command was accepted at `now`.
    pub fn on_accepted(&mut self, now: Instant) {
        self.last_accepted_at = Some(now);
        self.tripped = false;
    }

    /// Check the timeout, making the actuators safe if it has elapsed while armed.
    ///
    /// Returns `true` if the failsafe tripped on this call. Once tripped further calls do nothing
    /// until the next accepted command.
    pub fn poll<B, P>(
        &mut self,
        now: Instant,
        act_drv: &mut ActDriver<B, P>
    ) -> Result<bool, HwError>
    where
        B: RegisterBus,
        P: OutputPin,
        P::Error: Debug
    {
        if self.tripped || !act_drv.is_armed() {
            return Ok(false);
        }

        let since_last = match self.last_accepted_at {
            Some(t) => now.saturating_duration_since(t),
            None => return Ok(false),
        };

        if since_last <= self.timeout {
            return Ok(false);
        }

        self.tripped = true;
        act_drv.force_safe()?;

        info!(
            "FAILSAFE: no commands for {} ms, drive disarmed and steering centred",
            duration_to_millis(since_last)
        );

        Ok(true)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn last_accepted_at(&self) -> Option<Instant> {
        self.last_accepted_at
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        act_drv::Params,
        hw::{dout::DigitalOutputBank, pwm::PwmDevice, sim::{SimBus, SimPin}},
    };

    fn act_drv() -> ActDriver<SimBus, SimPin> {
        let dout = DigitalOutputBank::new(
            SimPin::default(),
            SimPin::default(),
            SimPin::default()
        ).unwrap();
        let pwm = PwmDevice::open(SimBus::new()).unwrap();
        ActDriver::new(pwm, dout, Params::default()).unwrap()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_no_trip_before_first_command() {
        let mut drv = act_drv();
        let mut fs = Failsafe::new(&FailsafeParams::default());

        assert_eq!(fs.poll(Instant::now() + ms(10_000), &mut drv), Ok(false));
        assert!(!fs.is_tripped());
    }

    #[test]
    fn test_trip_after_timeout() {
        let mut drv = act_drv();
        let mut fs = Failsafe::new(&FailsafeParams::default());
        let t0 = Instant::now();

        fs.on_accepted(t0);
        drv.apply(-1000, 500, true).unwrap();

        assert_eq!(fs.poll(t0 + ms(100), &mut drv), Ok(false));
        assert_eq!(fs.poll(t0 + ms(250), &mut drv), Ok(false));
        assert!(drv.is_armed());

        assert_eq!(fs.poll(t0 + ms(251), &mut drv), Ok(true));
        assert!(fs.is_tripped());
        assert!(!drv.is_armed());
        assert_eq!(drv.target().drive_duty, 0.0);
        assert_eq!(drv.target().steer_pulse_us, 1800.0);
        assert!(!drv.dout().states().standby);
    }

    #[test]
    fn test_trip_is_idempotent() {
        let mut drv = act_drv();
        let mut fs = Failsafe::new(&FailsafeParams::default());
        let t0 = Instant::now();

        fs.on_accepted(t0);
        drv.apply(0, 500, true).unwrap();

        assert_eq!(fs.poll(t0 + ms(300), &mut drv), Ok(true));
        let num_writes = drv.pwm().bus().writes().len();

        assert_eq!(fs.poll(t0 + ms(320), &mut drv), Ok(false));
        assert_eq!(fs.poll(t0 + ms(10_000), &mut drv), Ok(false));
        assert_eq!(drv.pwm().bus().writes().len(), num_writes);
    }

    #[test]
    fn test_no_trip_while_disarmed() {
        let mut drv = act_drv();
        let mut fs = Failsafe::new(&FailsafeParams::default());
        let t0 = Instant::now();

        fs.on_accepted(t0);
        drv.apply(500, 500, false).unwrap();

        assert_eq!(fs.poll(t0 + ms(1000), &mut drv), Ok(false));

        // Steering isn't re-centred for an explicitly disarmed car
        assert_eq!(drv.target().steer_pulse_us, 2000.0);
    }

    #[test]
    fn test_new_command_resets_trip() {
        let mut drv = act_drv();
        let mut fs = Failsafe::new(&FailsafeParams::default());
        let t0 = Instant::now();

        fs.on_accepted(t0);
        drv.apply(0, 500, true).unwrap();
        assert_eq!(fs.poll(t0 + ms(300), &mut drv), Ok(true));

        fs.on_accepted(t0 + ms(400));
        drv.apply(0, 500, true).unwrap();
        assert!(!fs.is_tripped());
        assert_eq!(fs.poll(t0 + ms(600), &mut drv), Ok(false));
        assert_eq!(fs.poll(t0 + ms(651), &mut drv), Ok(true));
    }
}
