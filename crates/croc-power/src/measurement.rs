//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Per-device measurements, sweep results and derived rail balance."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::time::Duration;

use croc_common::config::RailRole;
use serde::Serialize;

use crate::device::DeviceConfig;
use crate::errors::{Operation, PowerError};

/// Full-scale bus voltage of the sensor.
pub const MAX_BUS_VOLTAGE_V: f64 = 85.0;

/// Why a measurement is invalid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementFault {
    pub operation: Option<Operation>,
    pub message: String,
}

impl From<&PowerError> for MeasurementFault {
    fn from(err: &PowerError) -> Self {
        Self {
            operation: err.operation(),
            message: err.to_string(),
        }
    }
}

/// One device's reading from one sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub label: String,
    pub address: u8,
    pub role: Option<RailRole>,
    /// Monotonic time at which the device was sampled.
    pub timestamp: Duration,
    pub bus_voltage_v: f64,
    pub current_a: f64,
    /// Power computed by the sensor.
    pub power_w: f64,
    /// `bus_voltage_v * current_a`, for cross-checking `power_w`.
    pub power_calc_w: f64,
    pub energy_j: Option<f64>,
    pub charge_c: Option<f64>,
    pub valid: bool,
    pub fault: Option<MeasurementFault>,
}

impl Measurement {
    pub fn valid(
        device: &DeviceConfig,
        timestamp: Duration,
        bus_voltage_v: f64,
        current_a: f64,
        power_w: f64,
    ) -> Self {
        Self {
            label: device.label().to_owned(),
            address: device.address(),
            role: device.role(),
            timestamp,
            bus_voltage_v,
            current_a,
            power_w,
            power_calc_w: bus_voltage_v * current_a,
            energy_j: None,
            charge_c: None,
            valid: true,
            fault: None,
        }
    }

    /// Zero-filled placeholder that keeps the device's slot in the sweep.
    pub fn invalid(device: &DeviceConfig, timestamp: Duration, fault: MeasurementFault) -> Self {
        Self::unavailable(device.label(), device.address(), device.role(), timestamp, fault)
    }

    /// Placeholder for a roster slot with no usable device configuration.
    pub fn unavailable(
        label: &str,
        address: u8,
        role: Option<RailRole>,
        timestamp: Duration,
        fault: MeasurementFault,
    ) -> Self {
        Self {
            label: label.to_owned(),
            address,
            role,
            timestamp,
            bus_voltage_v: 0.0,
            current_a: 0.0,
            power_w: 0.0,
            power_calc_w: 0.0,
            energy_j: None,
            charge_c: None,
            valid: false,
            fault: Some(fault),
        }
    }

    pub fn with_accumulators(mut self, energy_j: f64, charge_c: f64) -> Self {
        self.energy_j = Some(energy_j);
        self.charge_c = Some(charge_c);
        self
    }

    /// Sanity check on a valid reading: finite values and a bus voltage the
    /// sensor can actually report.
    pub fn is_plausible(&self) -> bool {
        let finite = [
            self.bus_voltage_v,
            self.current_a,
            self.power_w,
            self.power_calc_w,
        ]
        .iter()
        .all(|value| value.is_finite());
        finite && (0.0..=MAX_BUS_VOLTAGE_V).contains(&self.bus_voltage_v)
    }
}

/// `solar - battery - load` power, only from valid readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerBalance {
    pub watts: f64,
    pub valid: bool,
    /// Roles without a valid reading.
    pub missing: Vec<RailRole>,
}

impl PowerBalance {
    const ROLES: [RailRole; 3] = [RailRole::Solar, RailRole::Battery, RailRole::Load];

    /// `None` when no roster entry carries a role.
    pub fn from_measurements(measurements: &[Measurement]) -> Option<Self> {
        if measurements.iter().all(|m| m.role.is_none()) {
            return None;
        }
        let power_of = |role: RailRole| {
            measurements
                .iter()
                .find(|m| m.role == Some(role))
                .filter(|m| m.valid)
                .map(|m| m.power_w)
        };
        let mut missing = Vec::new();
        let mut powers = [0.0; 3];
        for (slot, role) in powers.iter_mut().zip(Self::ROLES) {
            match power_of(role) {
                Some(watts) => *slot = watts,
                None => missing.push(role),
            }
        }
        if !missing.is_empty() {
            return Some(Self {
                watts: 0.0,
                valid: false,
                missing,
            });
        }
        let [solar, battery, load] = powers;
        Some(Self {
            watts: solar - battery - load,
            valid: true,
            missing,
        })
    }
}

/// Output of one sweep: one measurement per roster entry, in roster order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResult {
    pub started_at: Duration,
    pub finished_at: Duration,
    pub measurements: Vec<Measurement>,
    pub balance: Option<PowerBalance>,
}

impl SweepResult {
    pub fn new(started_at: Duration, finished_at: Duration, measurements: Vec<Measurement>) -> Self {
        let balance = PowerBalance::from_measurements(&measurements);
        Self {
            started_at,
            finished_at,
            measurements,
            balance,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.measurements.iter().filter(|m| m.valid).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.measurements.len() - self.valid_count()
    }

    pub fn is_complete(&self) -> bool {
        self.invalid_count() == 0
    }

    pub fn duration(&self) -> Duration {
        self.finished_at.saturating_sub(self.started_at)
    }

    pub fn by_role(&self, role: RailRole) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.role == Some(role))
    }

    pub fn invalid(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter().filter(|m| !m.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(device: DeviceConfig, power_w: f64) -> Measurement {
        Measurement::valid(&device, Duration::ZERO, 12.0, power_w / 12.0, power_w)
    }

    fn fault() -> MeasurementFault {
        MeasurementFault {
            operation: Some(Operation::ReadPower),
            message: "nack".into(),
        }
    }

    #[test]
    fn balance_from_three_valid_rails() {
        let measurements = vec![
            reading(DeviceConfig::solar().unwrap(), 10.0),
            reading(DeviceConfig::battery().unwrap(), 4.0),
            reading(DeviceConfig::load().unwrap(), 5.5),
        ];
        let balance = PowerBalance::from_measurements(&measurements).unwrap();
        assert!(balance.valid);
        assert!((balance.watts - 0.5).abs() < 1e-12);
    }

    #[test]
    fn balance_is_invalid_when_any_rail_is_invalid() {
        let battery = DeviceConfig::battery().unwrap();
        let measurements = vec![
            reading(DeviceConfig::solar().unwrap(), 10.0),
            Measurement::invalid(&battery, Duration::ZERO, fault()),
            reading(DeviceConfig::load().unwrap(), 5.5),
        ];
        let balance = PowerBalance::from_measurements(&measurements).unwrap();
        assert!(!balance.valid);
        assert_eq!(balance.watts, 0.0);
        assert_eq!(balance.missing, [RailRole::Battery]);
    }

    #[test]
    fn balance_needs_every_role_present() {
        let measurements = vec![reading(DeviceConfig::solar().unwrap(), 10.0)];
        let balance = PowerBalance::from_measurements(&measurements).unwrap();
        assert_eq!(balance.missing, [RailRole::Battery, RailRole::Load]);

        let unassigned = DeviceConfig::new("aux", 0x45, 0.015, 5.0).unwrap();
        assert!(PowerBalance::from_measurements(&[reading(unassigned, 1.0)]).is_none());
    }

    #[test]
    fn invalid_measurement_is_zero_filled() {
        let device = DeviceConfig::load().unwrap();
        let m = Measurement::invalid(&device, Duration::from_millis(5), fault());
        assert!(!m.valid);
        assert_eq!((m.bus_voltage_v, m.current_a, m.power_w), (0.0, 0.0, 0.0));
        assert_eq!(m.address, 0x41);
        assert_eq!(m.fault.unwrap().operation, Some(Operation::ReadPower));
    }

    #[test]
    fn plausibility_bounds() {
        let device = DeviceConfig::solar().unwrap();
        let mut m = Measurement::valid(&device, Duration::ZERO, 12.0, 1.0, 12.0);
        assert!(m.is_plausible());
        assert_eq!(m.power_calc_w, 12.0);
        m.bus_voltage_v = 90.0;
        assert!(!m.is_plausible());
        m.bus_voltage_v = 12.0;
        m.current_a = f64::NAN;
        assert!(!m.is_plausible());
    }

    #[test]
    fn sweep_counts_and_serializes() {
        let load = DeviceConfig::load().unwrap();
        let result = SweepResult::new(
            Duration::from_millis(100),
            Duration::from_millis(103),
            vec![
                reading(DeviceConfig::solar().unwrap(), 3.0),
                Measurement::invalid(&load, Duration::from_millis(102), fault()),
            ],
        );
        assert_eq!(result.valid_count(), 1);
        assert_eq!(result.invalid_count(), 1);
        assert!(!result.is_complete());
        assert_eq!(result.duration(), Duration::from_millis(3));
        assert_eq!(result.by_role(RailRole::Load).map(|m| m.valid), Some(false));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["measurements"][1]["fault"]["operation"], "read_power");
    }
}
