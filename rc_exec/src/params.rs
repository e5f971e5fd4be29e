//! # RC Executable Parameters
//!
//! This module provides the parameters for the RC executable. Every field has a default so a
//! parameter file only needs to contain the values it changes.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::IpAddr;
use serde::Deserialize;

use comms_if::net::NetParams;
use crate::{
    act_drv::{self, ActDrvError},
    failsafe::FailsafeParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct RcExecParams {
    pub net: NetParams,

    pub act: act_drv::Params,

    pub failsafe: FailsafeParams,

    pub hw: HwParams,
}

/// Where the hardware is attached on the Raspberry Pi.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HwParams {
    /// I2C bus the PWM controller is on
    pub i2c_bus: u8,

    /// 7 bit I2C address of the PWM controller
    pub pca9685_address: u16,

    /// BCM number of the motor driver standby line
    pub gpio_stby: u8,

    /// BCM number of the motor driver direction A line
    pub gpio_dir_a: u8,

    /// BCM number of the motor driver direction B line
    pub gpio_dir_b: u8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ParamsError {
    #[error("Invalid actuator parameters: {0}")]
    Act(#[from] ActDrvError),

    #[error("The receive timeout must be greater than zero")]
    ZeroRecvTimeout,

    #[error("The failsafe timeout must be greater than zero")]
    ZeroFailsafeTimeout,

    #[error("The allowed address \"{0}\" is not a valid IP address")]
    InvalidAllowedAddress(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RcExecParams {
    /// Check the parameters can be used to start the car.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        self.act.are_valid()?;

        if self.net.recv_timeout_ms == 0 {
            return Err(ParamsError::ZeroRecvTimeout);
        }

        if self.failsafe.timeout_ms == 0 {
            return Err(ParamsError::ZeroFailsafeTimeout);
        }

        if self.net.allowed_address.parse::<IpAddr>().is_err() {
            return Err(ParamsError::InvalidAllowedAddress(self.net.allowed_address.clone()));
        }

        Ok(())
    }
}

impl Default for HwParams {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            pca9685_address: 0x40,
            gpio_stby: 25,
            gpio_dir_a: 23,
            gpio_dir_b: 24,
        }
    }
}
