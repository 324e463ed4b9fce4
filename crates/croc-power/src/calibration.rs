//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Calibration engine deriving LSB constants and SHUNT_CAL."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Scaling constants derived from a shunt resistor and its full-scale current.
//!
//! The CURRENT register is a 20-bit signed result, so one code is
//! `max_current / 2^19`. SHUNT_CAL tells the device's internal multiplier how
//! to turn shunt voltage into that current code.

use serde::Serialize;

use crate::errors::{PowerError, Result};
use crate::registers::AdcRange;

/// Positive full-scale codes of the 20-bit signed current result.
pub const CURRENT_FULL_SCALE_CODES: f64 = 524_288.0;
/// Internal fixed value used to normalise SHUNT_CAL.
pub const SHUNT_CAL_SCALE: f64 = 13_107.2e6;
/// POWER register LSB as a multiple of the current LSB.
pub const POWER_LSB_MULTIPLIER: f64 = 3.2;
/// ENERGY register LSB as a multiple of the power LSB.
pub const ENERGY_LSB_MULTIPLIER: f64 = 16.0;

fn require_positive(value: f64, what: &str) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PowerError::calibration(format!(
            "{what} must be positive and finite, got {value}"
        )));
    }
    Ok(())
}

/// Amperes per CURRENT code.
pub fn compute_current_lsb(max_current_a: f64) -> Result<f64> {
    require_positive(max_current_a, "max current")?;
    Ok(max_current_a / CURRENT_FULL_SCALE_CODES)
}

/// SHUNT_CAL for the default ±163.84 mV range.
pub fn compute_shunt_cal_register(current_lsb: f64, shunt_ohms: f64) -> Result<u16> {
    compute_shunt_cal_register_for_range(current_lsb, shunt_ohms, AdcRange::Wide)
}

/// SHUNT_CAL for the given ADC range. The narrow range needs the value scaled
/// by four before it is range-checked.
pub fn compute_shunt_cal_register_for_range(
    current_lsb: f64,
    shunt_ohms: f64,
    range: AdcRange,
) -> Result<u16> {
    require_positive(current_lsb, "current LSB")?;
    require_positive(shunt_ohms, "shunt resistance")?;
    let exact = SHUNT_CAL_SCALE * current_lsb * shunt_ohms * range.shunt_cal_multiplier();
    let rounded = exact.round();
    if rounded > f64::from(u16::MAX) {
        return Err(PowerError::calibration(format!(
            "SHUNT_CAL {exact:.1} does not fit 0..=65535 (shunt {shunt_ohms} ohm, lsb {current_lsb:e} A)"
        )));
    }
    Ok(rounded as u16)
}

/// Watts per POWER code.
pub fn compute_power_lsb(current_lsb: f64) -> f64 {
    POWER_LSB_MULTIPLIER * current_lsb
}

/// Joules per ENERGY code.
pub fn compute_energy_lsb(current_lsb: f64) -> f64 {
    ENERGY_LSB_MULTIPLIER * compute_power_lsb(current_lsb)
}

/// Everything the driver needs to scale one device's readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub current_lsb: f64,
    pub power_lsb: f64,
    pub energy_lsb: f64,
    pub shunt_cal: u16,
    pub range: AdcRange,
}

impl Calibration {
    pub fn derive(shunt_ohms: f64, max_current_a: f64, range: AdcRange) -> Result<Self> {
        let current_lsb = compute_current_lsb(max_current_a)?;
        let shunt_cal = compute_shunt_cal_register_for_range(current_lsb, shunt_ohms, range)?;
        Ok(Self {
            current_lsb,
            power_lsb: compute_power_lsb(current_lsb),
            energy_lsb: compute_energy_lsb(current_lsb),
            shunt_cal,
            range,
        })
    }

    /// Coulombs per CHARGE code.
    pub fn charge_lsb(&self) -> f64 {
        self.current_lsb
    }
}
