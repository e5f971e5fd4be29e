//! Digital output bank for the motor driver control lines

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Debug;
use embedded_hal::digital::v2::OutputPin;
use serde::Serialize;

use super::HwError;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The motor driver's standby and direction lines.
///
/// All lines are active high. The bank keeps the last logical state written to each line.
pub struct DigitalOutputBank<P> {
    standby: P,
    dir_a: P,
    dir_b: P,

    states: LineStates,
}

/// Logical state of each line, `true` meaning asserted.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineStates {
    pub standby: bool,
    pub dir_a: bool,
    pub dir_b: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Lines in the bank
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Gates power to the motor driver, asserted = driver enabled.
    Standby,

    /// Direction select input A.
    DirA,

    /// Direction select input B.
    DirB,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<P> DigitalOutputBank<P>
where
    P: OutputPin,
    P::Error: Debug
{
    /// Create the bank from pins already configured as outputs.
    ///
    /// Every line is driven inactive before returning, so the motor driver is gated off with a
    /// defined direction whatever level the pins were handed over at.
    pub fn new(standby: P, dir_a: P, dir_b: P) -> Result<Self, HwError> {
        let mut bank = Self {
            standby,
            dir_a,
            dir_b,
            states: LineStates::default(),
        };

        // Standby first so the driver is off before the direction lines move
        bank.write(Line::Standby, false)?;
        bank.write(Line::DirA, false)?;
        bank.write(Line::DirB, false)?;

        Ok(bank)
    }

    /// Set the state of a single line.
    pub fn set(&mut self, line: Line, asserted: bool) -> Result<(), HwError> {
        if self.get(line) == asserted {
            return Ok(());
        }

        self.write(line, asserted)
    }

    /// Last state written to a line.
    pub fn get(&self, line: Line) -> bool {
        match line {
            Line::Standby => self.states.standby,
            Line::DirA => self.states.dir_a,
            Line::DirB => self.states.dir_b,
        }
    }

    /// State of all lines.
    pub fn states(&self) -> LineStates {
        self.states
    }

    fn write(&mut self, line: Line, asserted: bool) -> Result<(), HwError> {
        let (pin, state) = match line {
            Line::Standby => (&mut self.standby, &mut self.states.standby),
            Line::DirA => (&mut self.dir_a, &mut self.states.dir_a),
            Line::DirB => (&mut self.dir_b, &mut self.states.dir_b),
        };

        match asserted {
            true => pin.set_high(),
            false => pin.set_low(),
        }.map_err(|e| HwError::Line(format!("{:?} line: {:?}", line, e)))?;

        *state = asserted;
        Ok(())
    }
}
