//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Roster configuration and per-cycle multi-device sweeps."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Measurement orchestrator.
//!
//! [`PowerMonitor`] owns the bus, a settling delay and a clock. Between sweeps
//! its only state is the roster fixed by [`PowerMonitor::configure`]. A device
//! whose calibration cannot be derived, or that fails while being configured,
//! stays in the roster as inactive: it keeps its slot in every sweep but is
//! never addressed again until reconfigured.

use std::collections::HashSet;
use std::time::Duration;

use croc_common::config::{AppConfig, RailRole, SamplingConfig, MIN_SETTLE_DELAY};
use croc_common::time::Clock;
use croc_logging::{power_info, power_warn, LogContext};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use tracing::debug;

use crate::device::DeviceConfig;
use crate::driver::{Ina228Driver, RegisterSnapshot};
use crate::errors::{PowerError, Result};
use crate::measurement::{Measurement, MeasurementFault, SweepResult};

/// One position in the roster handed to [`PowerMonitor::configure`]: the
/// device, or the error that kept its calibration from being derived.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterSlot {
    pub label: String,
    pub address: u8,
    pub role: Option<RailRole>,
    pub device: Result<DeviceConfig>,
}

impl From<DeviceConfig> for RosterSlot {
    fn from(device: DeviceConfig) -> Self {
        Self {
            label: device.label().to_owned(),
            address: device.address(),
            role: device.role(),
            device: Ok(device),
        }
    }
}

#[derive(Debug, Clone)]
struct RosterEntry {
    label: String,
    address: u8,
    role: Option<RailRole>,
    /// `Err` once the device is inactive; sweeps skip it.
    device: std::result::Result<DeviceConfig, MeasurementFault>,
}

impl RosterEntry {
    fn active(&self) -> Option<&DeviceConfig> {
        self.device.as_ref().ok()
    }
}

/// Per-device outcome of [`PowerMonitor::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub label: String,
    pub address: u8,
    pub error: Option<PowerError>,
}

impl DeviceStatus {
    pub fn is_active(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigureReport {
    pub devices: Vec<DeviceStatus>,
}

impl ConfigureReport {
    pub fn active_count(&self) -> usize {
        self.devices.iter().filter(|status| status.is_active()).count()
    }

    pub fn inactive(&self) -> impl Iterator<Item = &DeviceStatus> {
        self.devices.iter().filter(|status| !status.is_active())
    }

    pub fn all_active(&self) -> bool {
        self.active_count() == self.devices.len()
    }
}

/// Advisory identity reading for one roster entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityCheck {
    pub label: String,
    pub address: u8,
    pub result: Result<u16>,
}

impl IdentityCheck {
    pub fn is_known(&self) -> bool {
        self.result.is_ok()
    }
}

/// Build roster slots from the configuration file, in file order. An entry
/// whose calibration fails keeps its slot and carries the error.
pub fn roster_from_config(config: &AppConfig) -> Vec<RosterSlot> {
    config
        .devices
        .iter()
        .map(|(label, settings)| RosterSlot {
            label: label.clone(),
            address: settings.address,
            role: settings.role,
            device: DeviceConfig::from_settings(label, settings),
        })
        .collect()
}

fn check_roster(roster: &[RosterSlot]) -> Result<()> {
    if roster.is_empty() {
        return Err(PowerError::calibration("roster is empty"));
    }
    let mut addresses = HashSet::new();
    let mut roles = HashSet::new();
    for slot in roster {
        if !addresses.insert(slot.address) {
            return Err(PowerError::calibration(format!(
                "address 0x{:02x} appears more than once",
                slot.address
            )));
        }
        if let Some(role) = slot.role {
            if !roles.insert(role) {
                return Err(PowerError::calibration(format!(
                    "role {role} is assigned to more than one device"
                )));
            }
        }
    }
    Ok(())
}

pub struct PowerMonitor<I2C, D, C> {
    driver: Ina228Driver<I2C, C>,
    delay: D,
    clock: C,
    settle_delay: Duration,
    roster: Vec<RosterEntry>,
}

impl<I2C, D, C> PowerMonitor<I2C, D, C>
where
    I2C: I2c,
    D: DelayNs,
    C: Clock + Clone,
{
    /// The clock stamps measurements and times the read budget.
    pub fn new(bus: I2C, delay: D, clock: C) -> Self {
        Self {
            driver: Ina228Driver::with_clock(bus, clock.clone()),
            delay,
            clock,
            settle_delay: MIN_SETTLE_DELAY,
            roster: Vec::new(),
        }
    }

    /// Apply settle delay and read budget from the sampling section.
    pub fn with_sampling(mut self, sampling: &SamplingConfig) -> Self {
        self.settle_delay = sampling.settle_delay.max(MIN_SETTLE_DELAY);
        self.driver = self.driver.with_read_budget(sampling.read_budget);
        self
    }

    /// Wait after reset before the next transaction; never below 10 ms.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle_delay = settle.max(MIN_SETTLE_DELAY);
        self
    }

    pub fn with_read_budget(mut self, budget: Option<Duration>) -> Self {
        self.driver = self.driver.with_read_budget(budget);
        self
    }

    /// Replace the roster and bring every device into its configured state.
    ///
    /// Fails only for roster-level problems (empty roster, duplicate address
    /// or role). A device whose calibration could not be derived, or whose
    /// reset, setup or calibration write fails, is kept as inactive and
    /// reported in the returned [`ConfigureReport`].
    pub fn configure<T>(&mut self, roster: impl IntoIterator<Item = T>) -> Result<ConfigureReport>
    where
        T: Into<RosterSlot>,
    {
        let roster: Vec<RosterSlot> = roster.into_iter().map(Into::into).collect();
        check_roster(&roster)?;
        let mut report = ConfigureReport::default();
        let mut entries = Vec::with_capacity(roster.len());
        for slot in roster {
            let ctx = LogContext::new().with_device(&slot.label, slot.address);
            let outcome = slot.device.and_then(|device| {
                self.driver
                    .configure_device(&device, &mut self.delay, self.settle_delay)
                    .map(|()| device)
            });
            let error = match &outcome {
                Ok(device) => {
                    power_info!(
                        context = ctx,
                        "configured: shunt_cal={} current_lsb={:e} A",
                        device.shunt_cal(),
                        device.current_lsb()
                    );
                    None
                }
                Err(err) => {
                    power_warn!(context = ctx, "marked inactive: {}", err);
                    Some(err.clone())
                }
            };
            report.devices.push(DeviceStatus {
                label: slot.label.clone(),
                address: slot.address,
                error,
            });
            entries.push(RosterEntry {
                label: slot.label,
                address: slot.address,
                role: slot.role,
                device: outcome.map_err(|err| MeasurementFault::from(&err)),
            });
        }
        self.roster = entries;
        Ok(report)
    }

    /// Active devices, in roster order.
    pub fn active_devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.roster.iter().filter_map(RosterEntry::active)
    }

    pub fn is_active(&self, address: u8) -> bool {
        self.roster
            .iter()
            .any(|entry| entry.address == address && entry.active().is_some())
    }

    fn sample(driver: &mut Ina228Driver<I2C, C>, device: &DeviceConfig) -> Result<[f64; 3]> {
        let address = device.address();
        let lsb = device.current_lsb();
        let bus_voltage = driver.read_bus_voltage(address)?;
        let current = driver.read_current(address, lsb)?;
        let power = driver.read_power(address, lsb)?;
        Ok([bus_voltage, current, power])
    }

    fn sample_accumulators(
        driver: &mut Ina228Driver<I2C, C>,
        device: &DeviceConfig,
    ) -> Result<(f64, f64)> {
        let address = device.address();
        let lsb = device.current_lsb();
        Ok((
            driver.read_energy(address, lsb)?,
            driver.read_charge(address, lsb)?,
        ))
    }

    /// Sample every roster entry once, in roster order.
    ///
    /// A failing device yields an invalid, zero-filled measurement carrying
    /// the failed operation; the remaining devices are still read.
    pub fn sweep(&mut self) -> SweepResult {
        let started_at = self.clock.now();
        let mut measurements = Vec::with_capacity(self.roster.len());
        for entry in &self.roster {
            let timestamp = self.clock.now();
            let device = match &entry.device {
                Ok(device) => device,
                Err(fault) => {
                    measurements.push(Measurement::unavailable(
                        &entry.label,
                        entry.address,
                        entry.role,
                        timestamp,
                        fault.clone(),
                    ));
                    continue;
                }
            };
            let reading = Self::sample(&mut self.driver, device).and_then(|[v, i, p]| {
                let measurement = Measurement::valid(device, timestamp, v, i, p);
                if device.sample_accumulators() {
                    let (energy, charge) = Self::sample_accumulators(&mut self.driver, device)?;
                    return Ok(measurement.with_accumulators(energy, charge));
                }
                Ok(measurement)
            });
            let ctx = LogContext::new().with_device(device.label(), device.address());
            let measurement = match reading {
                Ok(measurement) => {
                    if !measurement.is_plausible() {
                        power_warn!(
                            context = ctx,
                            "implausible reading: {:.4} V {:.6} A",
                            measurement.bus_voltage_v,
                            measurement.current_a
                        );
                    }
                    measurement
                }
                Err(err) => {
                    power_warn!(
                        context = ctx,
                        "{} failed: {}",
                        err.operation().map(|op| op.to_string()).unwrap_or_default(),
                        err
                    );
                    Measurement::invalid(device, timestamp, MeasurementFault::from(&err))
                }
            };
            measurements.push(measurement);
        }
        let result = SweepResult::new(started_at, self.clock.now(), measurements);
        debug!(
            valid = result.valid_count(),
            invalid = result.invalid_count(),
            "sweep complete"
        );
        result
    }

    /// Read each device's identity. Unknown IDs are logged and returned, and
    /// never change which devices are swept.
    pub fn verify_identities(&mut self) -> Vec<IdentityCheck> {
        let mut checks = Vec::with_capacity(self.roster.len());
        for entry in &self.roster {
            let result = self.driver.check_identity(entry.address);
            if let Err(err) = &result {
                let ctx = LogContext::new().with_device(&entry.label, entry.address);
                power_warn!(context = ctx, "identity check: {}", err);
            }
            checks.push(IdentityCheck {
                label: entry.label.clone(),
                address: entry.address,
                result,
            });
        }
        checks
    }

    /// Clear ENERGY and CHARGE on every active device. Returns the failures.
    pub fn reset_accumulators(&mut self) -> Vec<PowerError> {
        let mut failures = Vec::new();
        for device in self.roster.iter().filter_map(RosterEntry::active) {
            if let Err(err) = self.driver.reset_accumulators(device.address()) {
                failures.push(err);
            }
        }
        failures
    }

    pub fn is_present(&mut self, address: u8) -> bool {
        self.driver.is_present(address)
    }

    pub fn inspect(&mut self, address: u8) -> Vec<RegisterSnapshot> {
        self.driver.inspect_registers(address)
    }

    pub fn die_temperature(&mut self, address: u8) -> Result<f64> {
        self.driver.read_die_temperature(address)
    }

    /// Put every active device into shutdown mode.
    pub fn power_down(&mut self) -> Vec<PowerError> {
        let mut failures = Vec::new();
        for device in self.roster.iter().filter_map(RosterEntry::active) {
            if let Err(err) = self.driver.enter_power_down(device.address()) {
                failures.push(err);
            }
        }
        failures
    }

    /// Resume each active device in its configured operating mode.
    pub fn power_up(&mut self) -> Vec<PowerError> {
        let mut failures = Vec::new();
        for device in self.roster.iter().filter_map(RosterEntry::active) {
            if let Err(err) = self
                .driver
                .exit_power_down(device.address(), device.adc().mode)
            {
                failures.push(err);
            }
        }
        failures
    }

    pub fn release(self) -> I2C {
        self.driver.release()
    }
}
