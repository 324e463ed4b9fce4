//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Per-sensor roster entry with derived calibration."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use croc_common::config::{DeviceSettings, RailRole};
use serde::Serialize;

use crate::calibration::Calibration;
use crate::errors::{PowerError, Result};
use crate::registers::{AdcConfig, AdcRange, Averaging, ConfigFlags};

pub const SOLAR_ADDRESS: u8 = 0x40;
pub const LOAD_ADDRESS: u8 = 0x41;
pub const BATTERY_ADDRESS: u8 = 0x44;
pub const REFERENCE_SHUNT_OHMS: f64 = 0.015;
/// Measured value of the battery rail's shunt.
pub const BATTERY_SHUNT_OHMS: f64 = 0.0177186;
pub const REFERENCE_MAX_CURRENT_A: f64 = 5.0;

/// One physical sensor on the bus. The calibration is derived on construction
/// and only recomputed through [`DeviceConfig::with_shunt`] or
/// [`DeviceConfig::with_adc_range`], which return a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceConfig {
    label: String,
    address: u8,
    shunt_ohms: f64,
    max_current_a: f64,
    role: Option<RailRole>,
    alerts_enabled: bool,
    sample_accumulators: bool,
    adc: AdcConfig,
    calibration: Calibration,
}

impl DeviceConfig {
    pub fn new(
        label: impl Into<String>,
        address: u8,
        shunt_ohms: f64,
        max_current_a: f64,
    ) -> Result<Self> {
        if !(0x08..=0x77).contains(&address) {
            return Err(PowerError::calibration(format!(
                "address 0x{address:02x} is not a usable 7-bit address"
            )));
        }
        let calibration = Calibration::derive(shunt_ohms, max_current_a, AdcRange::Wide)?;
        Ok(Self {
            label: label.into(),
            address,
            shunt_ohms,
            max_current_a,
            role: None,
            alerts_enabled: false,
            sample_accumulators: false,
            adc: AdcConfig::default(),
            calibration,
        })
    }

    pub fn solar() -> Result<Self> {
        Ok(Self::new("solar", SOLAR_ADDRESS, REFERENCE_SHUNT_OHMS, REFERENCE_MAX_CURRENT_A)?
            .with_role(RailRole::Solar))
    }

    pub fn battery() -> Result<Self> {
        Ok(Self::new("battery", BATTERY_ADDRESS, BATTERY_SHUNT_OHMS, REFERENCE_MAX_CURRENT_A)?
            .with_role(RailRole::Battery))
    }

    pub fn load() -> Result<Self> {
        Ok(Self::new("load", LOAD_ADDRESS, REFERENCE_SHUNT_OHMS, REFERENCE_MAX_CURRENT_A)?
            .with_role(RailRole::Load))
    }

    /// The three-rail roster of the field unit, in sweep order.
    pub fn reference_roster() -> Result<Vec<Self>> {
        Ok(vec![Self::solar()?, Self::battery()?, Self::load()?])
    }

    /// Build from a configuration-file entry keyed by `label`.
    pub fn from_settings(label: &str, settings: &DeviceSettings) -> Result<Self> {
        let averaging = Averaging::from_count(settings.averaging).ok_or_else(|| {
            PowerError::calibration(format!(
                "{label}: unsupported averaging count {}",
                settings.averaging
            ))
        })?;
        let range = if settings.narrow_adc_range {
            AdcRange::Narrow
        } else {
            AdcRange::Wide
        };
        let mut device = Self::new(label, settings.address, settings.shunt_ohms, settings.max_current_a)?
            .with_adc_range(range)?
            .with_alerts(settings.enable_alerts)
            .with_accumulators(settings.sample_accumulators);
        device.adc = AdcConfig {
            averaging,
            ..AdcConfig::default().with_conversion_time(settings.conversion_time)
        };
        if let Some(role) = settings.role {
            device = device.with_role(role);
        }
        Ok(device)
    }

    pub fn with_role(mut self, role: RailRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_alerts(mut self, enabled: bool) -> Self {
        self.alerts_enabled = enabled;
        self
    }

    /// Opt in to reading ENERGY and CHARGE on every sweep.
    pub fn with_accumulators(mut self, enabled: bool) -> Self {
        self.sample_accumulators = enabled;
        self
    }

    pub fn with_adc_config(mut self, adc: AdcConfig) -> Self {
        self.adc = adc;
        self
    }

    pub fn with_adc_range(self, range: AdcRange) -> Result<Self> {
        let calibration = Calibration::derive(self.shunt_ohms, self.max_current_a, range)?;
        Ok(Self {
            calibration,
            ..self
        })
    }

    /// Replace the shunt parameters and recompute the calibration.
    pub fn with_shunt(self, shunt_ohms: f64, max_current_a: f64) -> Result<Self> {
        let calibration = Calibration::derive(shunt_ohms, max_current_a, self.calibration.range)?;
        Ok(Self {
            shunt_ohms,
            max_current_a,
            calibration,
            ..self
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn shunt_ohms(&self) -> f64 {
        self.shunt_ohms
    }

    pub fn max_current_a(&self) -> f64 {
        self.max_current_a
    }

    pub fn role(&self) -> Option<RailRole> {
        self.role
    }

    pub fn alerts_enabled(&self) -> bool {
        self.alerts_enabled
    }

    pub fn sample_accumulators(&self) -> bool {
        self.sample_accumulators
    }

    pub fn adc(&self) -> AdcConfig {
        self.adc
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn current_lsb(&self) -> f64 {
        self.calibration.current_lsb
    }

    pub fn shunt_cal(&self) -> u16 {
        self.calibration.shunt_cal
    }

    pub fn range(&self) -> AdcRange {
        self.calibration.range
    }

    /// CONFIG word written during configuration.
    pub fn config_word(&self) -> u16 {
        ConfigFlags::for_range(self.calibration.range).bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_reference_deployment() {
        let roster = DeviceConfig::reference_roster().unwrap();
        let summary: Vec<_> = roster
            .iter()
            .map(|d| (d.label(), d.address(), d.shunt_cal(), d.role()))
            .collect();
        assert_eq!(
            summary,
            [
                ("solar", 0x40, 1875, Some(RailRole::Solar)),
                ("battery", 0x44, 2215, Some(RailRole::Battery)),
                ("load", 0x41, 1875, Some(RailRole::Load)),
            ]
        );
    }

    #[test]
    fn shunt_change_recomputes_calibration() {
        let device = DeviceConfig::solar().unwrap();
        let updated = device.clone().with_shunt(0.030, 5.0).unwrap();
        assert_eq!(updated.shunt_cal(), 3750);
        assert_eq!(device.shunt_cal(), 1875);
        assert_eq!(updated.role(), Some(RailRole::Solar));
    }

    #[test]
    fn narrow_range_sets_config_bit() {
        let device = DeviceConfig::solar()
            .unwrap()
            .with_adc_range(AdcRange::Narrow)
            .unwrap();
        assert_eq!(device.config_word(), ConfigFlags::ADCRANGE.bits());
        assert_eq!(device.shunt_cal(), 7500);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(DeviceConfig::new("x", 0x40, 0.0, 5.0).is_err());
        assert!(DeviceConfig::new("x", 0x40, 0.015, -1.0).is_err());
        assert!(DeviceConfig::new("x", 0x03, 0.015, 5.0).is_err());
    }

    #[test]
    fn settings_carry_timing_and_opt_ins() {
        let mut settings = DeviceSettings::new(0x44, 0.0177186, 5.0).with_role(RailRole::Battery);
        settings.sample_accumulators = true;
        settings.conversion_time = 7;
        settings.averaging = 64;
        let device = DeviceConfig::from_settings("battery", &settings).unwrap();
        assert!(device.sample_accumulators());
        assert_eq!(device.adc().bus_conversion, 7);
        assert_eq!(device.adc().averaging, Averaging::X64);
        assert_eq!(device.role(), Some(RailRole::Battery));

        settings.averaging = 3;
        assert!(DeviceConfig::from_settings("battery", &settings).is_err());
    }
}
