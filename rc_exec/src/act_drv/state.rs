//! Implementations for the actuator driver state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::fmt::Debug;
use embedded_hal::digital::v2::OutputPin;
use log::{info, trace};
use serde::Serialize;

// Internal
use super::{ActDrvError, Params, PERMILLE_MAX};
use crate::hw::{
    dout::{DigitalOutputBank, Line},
    pwm::{PwmDevice, RegisterBus},
    HwError,
};
use util::maths::{clamp, lin_map};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drives the steering servo and the drive motor.
///
/// The driver is the only writer to the PWM controller and the motor driver lines. It starts
/// disarmed, and while disarmed the drive duty is zero and the motor driver is held in standby.
pub struct ActDriver<B, P> {
    params: Params,

    pwm: PwmDevice<B>,
    dout: DigitalOutputBank<P>,

    target: ActTarget,

    /// Last steering demand applied, after clamping.
    steer_pm: i32,
}

/// The outputs currently being applied.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ActTarget {
    /// Steering servo pulse width.
    ///
    /// Units: microseconds
    pub steer_pulse_us: f64,

    /// Drive motor duty cycle, between 0 and `max_duty`.
    pub drive_duty: f64,

    /// Direction of the drive motor. Only meaningful while `drive_duty` is non-zero.
    pub forward: bool,

    /// True if the drive motor may be powered.
    pub armed: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<B, P> ActDriver<B, P>
where
    B: RegisterBus,
    P: OutputPin,
    P::Error: Debug
{
    /// Create the driver from an opened PWM controller and the motor driver lines.
    ///
    /// The PWM frequency is configured and the outputs are set to the disarmed, centred state
    /// before returning.
    pub fn new(
        mut pwm: PwmDevice<B>,
        dout: DigitalOutputBank<P>,
        params: Params
    ) -> Result<Self, ActDrvError> {
        params.are_valid()?;

        pwm.configure(params.pwm_freq_hz)?;

        let mut drv = Self {
            target: ActTarget {
                steer_pulse_us: params.servo_center_us,
                drive_duty: 0.0,
                forward: true,
                armed: false,
            },
            params,
            pwm,
            dout,
            steer_pm: 0,
        };

        drv.write_disarmed()?;
        drv.write_steer(0)?;

        Ok(drv)
    }

    /// Apply a steering and power demand.
    ///
    /// Both demands are clamped to [-1000, 1000] permille. Steering is always applied. If
    /// `enable` is false the drive is disarmed whatever the power demand.
    pub fn apply(&mut self, steer_pm: i32, power_pm: i32, enable: bool) -> Result<(), HwError> {
        let steer_pm = steer_pm.clamp(-PERMILLE_MAX, PERMILLE_MAX);
        let power_pm = power_pm.clamp(-PERMILLE_MAX, PERMILLE_MAX);

        self.write_steer(steer_pm)?;

        if !enable {
            if self.target.armed {
                info!("Drive disarmed");
            }
            return self.write_disarmed();
        }

        if !self.target.armed {
            info!("Drive armed");
        }

        // Mark armed before the standby line is asserted, so that `armed == false` always means
        // the driver is gated off even if a write fails part way through.
        self.target.armed = true;
        self.dout.set(Line::Standby, true)?;

        match power_to_drive(&self.params, power_pm) {
            None => {
                self.write_duty(0.0)?;
                self.write_brake()
            },
            Some((duty, forward)) => {
                // Don't reverse the bridge under load
                if forward != self.target.forward && self.target.drive_duty > 0.0 {
                    self.write_duty(0.0)?;
                }

                self.dout.set(Line::DirA, forward)?;
                self.dout.set(Line::DirB, !forward)?;
                self.target.forward = forward;

                self.write_duty(duty)
            }
        }
    }

    /// Disarm the drive and centre the steering.
    ///
    /// Calling this again without an intervening [`ActDriver::apply`] leaves the outputs
    /// unchanged.
    pub fn force_safe(&mut self) -> Result<(), HwError> {
        self.apply(self.steer_pm, 0, false)?;
        self.write_steer(0)
    }

    /// The outputs currently being applied.
    pub fn target(&self) -> &ActTarget {
        &self.target
    }

    /// True if the drive motor may currently be powered.
    pub fn is_armed(&self) -> bool {
        self.target.armed
    }

    /// The PWM controller.
    pub fn pwm(&self) -> &PwmDevice<B> {
        &self.pwm
    }

    /// The motor driver lines.
    pub fn dout(&self) -> &DigitalOutputBank<P> {
        &self.dout
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Zero the duty, brake, then gate the driver off.
    fn write_disarmed(&mut self) -> Result<(), HwError> {
        self.write_duty(0.0)?;
        self.write_brake()?;
        self.dout.set(Line::Standby, false)?;

        self.target.armed = false;
        Ok(())
    }

    fn write_brake(&mut self) -> Result<(), HwError> {
        self.dout.set(Line::DirA, false)?;
        self.dout.set(Line::DirB, false)
    }

    fn write_duty(&mut self, duty: f64) -> Result<(), HwError> {
        self.pwm.set_duty(self.params.motor_channel, duty)?;
        self.target.drive_duty = duty;
        Ok(())
    }

    fn write_steer(&mut self, steer_pm: i32) -> Result<(), HwError> {
        let pulse_us = steer_to_pulse_us(&self.params, steer_pm);
        let period_us = self.pwm.period_us();

        trace!("Steer {} pm -> {:.1} us", steer_pm, pulse_us);

        self.pwm.set_pulse_us(self.params.servo_channel, pulse_us, period_us)?;
        self.target.steer_pulse_us = pulse_us;
        self.steer_pm = steer_pm;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a steering demand to a servo pulse width.
///
/// Left and right of centre are interpolated separately so that servos whose travel isn't
/// symmetric about centre can be calibrated.
pub fn steer_to_pulse_us(params: &Params, steer_pm: i32) -> f64 {
    let s = steer_pm.clamp(-PERMILLE_MAX, PERMILLE_MAX) as f64 / PERMILLE_MAX as f64;

    let pulse_us = if s < 0.0 {
        lin_map((0.0, -1.0), (params.servo_center_us, params.servo_left_us), s)
    }
    else {
        lin_map((0.0, 1.0), (params.servo_center_us, params.servo_right_us), s)
    };

    clamp(
        &pulse_us,
        &params.servo_left_us.min(params.servo_right_us),
        &params.servo_left_us.max(params.servo_right_us)
    )
}

/// Map a power demand to a drive duty and direction (`true` = forward).
///
/// Returns `None` if the demand is inside the deadzone.
pub fn power_to_drive(params: &Params, power_pm: i32) -> Option<(f64, bool)> {
    let power_pm = power_pm.clamp(-PERMILLE_MAX, PERMILLE_MAX);

    if power_pm.abs() <= params.deadzone_permille {
        return None;
    }

    let duty = (power_pm.abs() as f64 / PERMILLE_MAX as f64) * params.max_duty;

    Some((duty, power_pm > 0))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hw::{
        dout::LineStates,
        sim::{SimBus, SimPin, WRITE_LOG_LEN},
    };

    const SERVO_CH: u8 = 0;
    const MOTOR_CH: u8 = 4;

    struct Rig {
        drv: ActDriver<SimBus, SimPin>,
        stby: SimPin,
    }

    impl Rig {
        fn motor_ticks(&self) -> u16 {
            self.drv.pwm().bus().channel_ticks(MOTOR_CH).1
        }

        fn servo_ticks(&self) -> u16 {
            self.drv.pwm().bus().channel_ticks(SERVO_CH).1
        }

        fn lines(&self) -> LineStates {
            self.drv.dout().states()
        }

        fn assert_disarmed(&self) {
            assert!(!self.drv.is_armed());
            assert_eq!(self.drv.target().drive_duty, 0.0);
            assert_eq!(self.motor_ticks(), 0);
            assert!(!self.stby.is_high());
            assert!(!self.lines().standby);
        }
    }

    fn rig() -> Rig {
        let stby = SimPin::with_level(true);
        let dout = DigitalOutputBank::new(
            stby.clone(),
            SimPin::with_level(true),
            SimPin::with_level(true)
        ).unwrap();
        let pwm = PwmDevice::open(SimBus::new()).unwrap();

        Rig {
            drv: ActDriver::new(pwm, dout, Params::default()).unwrap(),
            stby,
        }
    }

    #[test]
    fn test_new_is_disarmed_and_centred() {
        let r = rig();

        r.assert_disarmed();
        assert_eq!(r.drv.target().steer_pulse_us, 1800.0);
        assert_eq!(r.servo_ticks(), 369);
        assert_eq!(r.lines(), LineStates::default());
    }

    #[test]
    fn test_new_rejects_invalid_channel() {
        let dout = DigitalOutputBank::new(
            SimPin::default(),
            SimPin::default(),
            SimPin::default()
        ).unwrap();
        let pwm = PwmDevice::open(SimBus::new()).unwrap();
        let params = Params { servo_channel: 16, ..Default::default() };

        assert!(matches!(
            ActDriver::new(pwm, dout, params),
            Err(ActDrvError::InvalidChannel(16))
        ));
    }

    #[test]
    fn test_steer_mapping_range() {
        let p = Params::default();

        assert_eq!(steer_to_pulse_us(&p, 0), p.servo_center_us);
        assert_eq!(steer_to_pulse_us(&p, -1000), p.servo_left_us);
        assert_eq!(steer_to_pulse_us(&p, 1000), p.servo_right_us);
        assert_eq!(steer_to_pulse_us(&p, -5000), p.servo_left_us);
        assert_eq!(steer_to_pulse_us(&p, 5000), p.servo_right_us);

        for s in -1000..=1000 {
            let us = steer_to_pulse_us(&p, s);
            assert!(us >= 1400.0 && us <= 2200.0, "steer {} gave {} us", s, us);
        }
    }

    #[test]
    fn test_steer_mapping_asymmetric() {
        let p = Params {
            servo_center_us: 1500.0,
            servo_left_us: 1000.0,
            servo_right_us: 1700.0,
            ..Default::default()
        };

        assert_eq!(steer_to_pulse_us(&p, -500), 1250.0);
        assert_eq!(steer_to_pulse_us(&p, 500), 1600.0);
    }

    #[test]
    fn test_steer_mapping_reversed_servo() {
        let p = Params {
            servo_left_us: 2200.0,
            servo_right_us: 1400.0,
            ..Default::default()
        };

        assert_eq!(steer_to_pulse_us(&p, -1000), 2200.0);
        assert_eq!(steer_to_pulse_us(&p, 1000), 1400.0);
        for s in -1000..=1000 {
            let us = steer_to_pulse_us(&p, s);
            assert!(us >= 1400.0 && us <= 2200.0);
        }
    }

    #[test]
    fn test_power_mapping() {
        let p = Params::default();

        for pw in -30..=30 {
            assert_eq!(power_to_drive(&p, pw), None);
        }

        assert_eq!(power_to_drive(&p, 1000), Some((0.85, true)));
        assert_eq!(power_to_drive(&p, -1000), Some((0.85, false)));
        assert_eq!(power_to_drive(&p, 30_000), Some((0.85, true)));

        let mut last = 0.0;
        for pw in 31..=1000 {
            let (duty, fwd) = power_to_drive(&p, pw).unwrap();
            assert!(fwd);
            assert!(duty > last, "duty not increasing at {}", pw);
            assert!(duty <= p.max_duty);
            last = duty;
        }
    }

    #[test]
    fn test_apply_forward_and_reverse() {
        let mut r = rig();

        r.drv.apply(0, 500, true).unwrap();
        assert!(r.drv.is_armed());
        assert!(r.stby.is_high());
        assert_eq!(r.lines(), LineStates { standby: true, dir_a: true, dir_b: false });
        assert_eq!(r.motor_ticks(), 1740);

        r.drv.apply(0, -500, true).unwrap();
        assert_eq!(r.lines(), LineStates { standby: true, dir_a: false, dir_b: true });
        assert_eq!(r.motor_ticks(), 1740);
        assert!(!r.drv.target().forward);
    }

    #[test]
    fn test_reversing_zeroes_duty_first() {
        let mut r = rig();

        r.drv.apply(0, 500, true).unwrap();
        let writes_before = r.drv.pwm().bus().writes().len();

        r.drv.apply(0, -500, true).unwrap();

        // Servo block, then zero duty block, then the new duty block
        let motor_off_l = crate::hw::pwm::reg::LED0_ON_L + 4 * MOTOR_CH + 2;
        let off_writes: Vec<u8> = r.drv.pwm().bus().writes()[writes_before..]
            .iter()
            .filter(|(reg, _)| *reg == motor_off_l)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(off_writes, vec![0x00, (1740 & 0xff) as u8]);
    }

    #[test]
    fn test_apply_deadzone_brakes() {
        let mut r = rig();

        r.drv.apply(0, 500, true).unwrap();
        r.drv.apply(0, 30, true).unwrap();

        assert!(r.drv.is_armed());
        assert_eq!(r.motor_ticks(), 0);
        assert_eq!(r.drv.target().drive_duty, 0.0);
        assert_eq!(r.lines(), LineStates { standby: true, dir_a: false, dir_b: false });
    }

    #[test]
    fn test_disable_overrides_power() {
        let mut r = rig();

        r.drv.apply(0, 800, true).unwrap();
        r.drv.apply(250, 800, false).unwrap();

        r.assert_disarmed();
        assert_eq!(r.lines(), LineStates::default());

        // Steering still follows the demand while disarmed
        assert_eq!(r.drv.target().steer_pulse_us, 1900.0);
    }

    #[test]
    fn test_disarmed_invariant_over_sequence() {
        let mut r = rig();

        let demands = [
            (0, 900, true),
            (-1000, -700, false),
            (300, 20, true),
            (1000, 1000, true),
            (i32::MIN, i32::MAX, false),
            (-400, -1000, true),
        ];

        for &(s, p, en) in demands.iter() {
            r.drv.apply(s, p, en).unwrap();
            if !r.drv.is_armed() {
                r.assert_disarmed();
            }
            assert!(r.drv.target().drive_duty <= 0.85);

            r.drv.force_safe().unwrap();
            r.assert_disarmed();
        }
    }

    #[test]
    fn test_force_safe_centres_and_is_idempotent() {
        let mut r = rig();

        r.drv.apply(-1000, 500, true).unwrap();
        r.drv.force_safe().unwrap();

        r.assert_disarmed();
        assert_eq!(r.drv.target().steer_pulse_us, 1800.0);
        assert_eq!(r.servo_ticks(), 369);

        let target = *r.drv.target();
        let lines = r.lines();
        let regs: Vec<u8> = (0..=255u8).map(|i| r.drv.pwm().bus().reg(i)).collect();

        r.drv.force_safe().unwrap();
        r.drv.force_safe().unwrap();

        assert_eq!(*r.drv.target(), target);
        assert_eq!(r.lines(), lines);
        let regs_after: Vec<u8> = (0..=255u8).map(|i| r.drv.pwm().bus().reg(i)).collect();
        assert_eq!(regs, regs_after);
    }

    #[test]
    fn test_long_simulated_run_is_bounded() {
        let mut r = rig();

        for i in 0..100_000 {
            let power = if i % 2 == 0 { 600 } else { -600 };
            r.drv.apply(0, power, true).unwrap();
        }

        assert!(r.drv.pwm().bus().writes().len() <= WRITE_LOG_LEN);
        assert!(!r.drv.target().forward);
    }
}
