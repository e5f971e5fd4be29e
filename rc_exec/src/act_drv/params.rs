//! Actuator driver parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// Internal
use super::{ActDrvError, PERMILLE_MAX};
use crate::hw::pwm::{prescale_for, NUM_CHANNELS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Params {

    /// PWM channel the steering servo is connected to
    pub servo_channel: u8,

    /// PWM channel connected to the motor driver's speed input
    pub motor_channel: u8,

    /// PWM frequency used by all channels. Standard hobby servos expect 50 Hz.
    ///
    /// Units: Hz
    pub pwm_freq_hz: f64,

    /// Servo pulse width when steering straight ahead
    ///
    /// Units: microseconds
    pub servo_center_us: f64,

    /// Servo pulse width at full left lock
    ///
    /// Units: microseconds
    pub servo_left_us: f64,

    /// Servo pulse width at full right lock
    ///
    /// Units: microseconds
    pub servo_right_us: f64,

    /// Duty cycle applied at full power. Kept below 1 as a thermal margin on the motor.
    pub max_duty: f64,

    /// Power demands with a magnitude at or below this are treated as zero.
    ///
    /// Units: permille
    pub deadzone_permille: i32,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            servo_channel: 0,
            motor_channel: 4,
            pwm_freq_hz: 50.0,
            servo_center_us: 1800.0,
            servo_left_us: 1400.0,
            servo_right_us: 2200.0,
            max_duty: 0.85,
            deadzone_permille: 30,
        }
    }
}

impl Params {

    /// Determines if the parameters are valid.
    pub fn are_valid(&self) -> Result<(), ActDrvError> {
        for &ch in [self.servo_channel, self.motor_channel].iter() {
            if ch >= NUM_CHANNELS {
                return Err(ActDrvError::InvalidChannel(ch));
            }
        }

        if self.servo_channel == self.motor_channel {
            return Err(ActDrvError::DuplicateChannel(self.servo_channel));
        }

        if prescale_for(self.pwm_freq_hz).is_err() {
            return Err(ActDrvError::InvalidPwmFreq(self.pwm_freq_hz));
        }

        // The centre must sit between the two end stops, whichever way round the servo is
        let lo = self.servo_left_us.min(self.servo_right_us);
        let hi = self.servo_left_us.max(self.servo_right_us);
        if !(lo <= self.servo_center_us && self.servo_center_us <= hi) {
            return Err(ActDrvError::InvalidServoCalibration {
                center: self.servo_center_us,
                left: self.servo_left_us,
                right: self.servo_right_us
            });
        }

        if !(self.max_duty > 0.0 && self.max_duty <= 1.0) {
            return Err(ActDrvError::InvalidMaxDuty(self.max_duty));
        }

        if self.deadzone_permille < 0 || self.deadzone_permille >= PERMILLE_MAX {
            return Err(ActDrvError::InvalidDeadzone(self.deadzone_permille));
        }

        Ok(())
    }
}
