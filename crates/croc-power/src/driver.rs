//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Single-device INA228 operations over a blocking I2C bus."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Register-level driver for INA228 sensors sharing one bus.
//!
//! The driver holds no per-device state. Every operation takes the bus address
//! and whatever scaling constant it needs, so one driver serves the whole
//! roster. Reads are `write_read(addr, [reg], buf)`; writes send the register
//! pointer followed by the big-endian 16-bit value. The read budget is
//! measured on the driver's [`Clock`].

use std::time::Duration;

use croc_common::time::{Clock, MonotonicClock};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, I2c};
use strum::IntoEnumIterator;
use tracing::{debug, trace};

use crate::codec::{encode16, RawRegisterValue};
use crate::device::DeviceConfig;
use crate::errors::{Operation, PowerError, Result};
use crate::registers::{
    AdcConfig, AdcRange, ConfigFlags, DiagnosticFlags, OperatingMode, Register,
    BUS_VOLTAGE_LSB_V, DIE_TEMPERATURE_LSB_C, KNOWN_DEVICE_IDS,
};

/// Accepts every device ID the sensor family has shipped with.
pub fn is_known_device_id(id: u16) -> bool {
    KNOWN_DEVICE_IDS.contains(&id)
}

/// Operation recorded when `register` is read.
pub fn read_operation(register: Register) -> Operation {
    match register {
        Register::Config => Operation::ReadConfig,
        Register::AdcConfig => Operation::ReadAdcConfig,
        Register::ShuntCal => Operation::ReadCalibration,
        Register::ShuntVoltage => Operation::ReadShuntVoltage,
        Register::BusVoltage => Operation::ReadBusVoltage,
        Register::DieTemperature => Operation::ReadDieTemperature,
        Register::Current => Operation::ReadCurrent,
        Register::Power => Operation::ReadPower,
        Register::Energy => Operation::ReadEnergy,
        Register::Charge => Operation::ReadCharge,
        Register::DiagAlert => Operation::ReadDiagnostics,
        Register::ManufacturerId => Operation::ReadManufacturerId,
        Register::DeviceId => Operation::ReadDeviceId,
    }
}

/// One entry of a register dump.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSnapshot {
    pub register: Register,
    pub value: Result<RawRegisterValue>,
}

pub struct Ina228Driver<I2C, C = MonotonicClock> {
    bus: I2C,
    clock: C,
    read_budget: Option<Duration>,
}

impl<I2C: I2c> Ina228Driver<I2C> {
    pub fn new(bus: I2C) -> Self {
        Self::with_clock(bus, MonotonicClock::new())
    }
}

impl<I2C: I2c, C: Clock> Ina228Driver<I2C, C> {
    pub fn with_clock(bus: I2C, clock: C) -> Self {
        Self {
            bus,
            clock,
            read_budget: None,
        }
    }

    /// Reads that complete but take longer than `budget` fail with
    /// [`PowerError::MeasurementTimeout`].
    pub fn with_read_budget(mut self, budget: Option<Duration>) -> Self {
        self.read_budget = budget;
        self
    }

    pub fn read_budget(&self) -> Option<Duration> {
        self.read_budget
    }

    pub fn release(self) -> I2C {
        self.bus
    }

    fn read_raw(
        &mut self,
        address: u8,
        register: Register,
        operation: Operation,
    ) -> Result<RawRegisterValue> {
        let mut buf = [0u8; 5];
        let width = register.layout().width;
        let started = self.clock.now();
        self.bus
            .write_read(address, &[register.address()], &mut buf[..width])
            .map_err(|err| PowerError::Communication {
                address,
                operation,
                kind: err.kind(),
            })?;
        let elapsed = self.clock.now().saturating_sub(started);
        if let Some(budget) = self.read_budget {
            if elapsed > budget {
                return Err(PowerError::MeasurementTimeout {
                    address,
                    operation,
                    elapsed,
                    budget,
                });
            }
        }
        let value = RawRegisterValue::from_bytes(register, &buf[..width])?;
        trace!(address, register = %register, raw = value.raw, "register read");
        Ok(value)
    }

    fn read(&mut self, address: u8, register: Register) -> Result<RawRegisterValue> {
        self.read_raw(address, register, read_operation(register))
    }

    fn write(
        &mut self,
        address: u8,
        register: Register,
        value: u16,
        operation: Operation,
    ) -> Result<()> {
        let [msb, lsb] = encode16(value);
        self.bus
            .write(address, &[register.address(), msb, lsb])
            .map_err(|err| PowerError::Communication {
                address,
                operation,
                kind: err.kind(),
            })?;
        trace!(address, register = %register, value, "register write");
        Ok(())
    }

    /// Zero-length write; true when the address acknowledges.
    pub fn is_present(&mut self, address: u8) -> bool {
        self.bus.write(address, &[]).is_ok()
    }

    /// Restore power-on defaults. The caller waits at least 10 ms before the
    /// next transaction to this device.
    pub fn reset(&mut self, address: u8) -> Result<()> {
        self.write(
            address,
            Register::Config,
            ConfigFlags::RST.bits(),
            Operation::Reset,
        )
    }

    pub fn write_config(&mut self, address: u8, config: u16) -> Result<()> {
        self.write(address, Register::Config, config, Operation::WriteConfig)
    }

    /// Clear ENERGY and CHARGE while keeping the other CONFIG bits.
    pub fn reset_accumulators(&mut self, address: u8) -> Result<()> {
        let config = self.read(address, Register::Config)?.raw as u16;
        self.write(
            address,
            Register::Config,
            config | ConfigFlags::RSTACC.bits(),
            Operation::ResetAccumulators,
        )
    }

    pub fn write_adc_config(&mut self, address: u8, adc: &AdcConfig) -> Result<()> {
        self.write(
            address,
            Register::AdcConfig,
            adc.bits(),
            Operation::WriteAdcConfig,
        )
    }

    pub fn write_calibration(&mut self, address: u8, shunt_cal: u16) -> Result<()> {
        self.write(
            address,
            Register::ShuntCal,
            shunt_cal,
            Operation::WriteCalibration,
        )
        .map_err(|err| {
            PowerError::calibration(format!(
                "writing SHUNT_CAL {shunt_cal} to 0x{address:02x}: {err}"
            ))
        })
    }

    pub fn read_calibration(&mut self, address: u8) -> Result<u16> {
        Ok(self.read(address, Register::ShuntCal)?.raw as u16)
    }

    /// Reset, wait `settle`, then write CONFIG, ADC_CONFIG and SHUNT_CAL.
    pub fn configure_device<D: DelayNs>(
        &mut self,
        device: &DeviceConfig,
        delay: &mut D,
        settle: Duration,
    ) -> Result<()> {
        let address = device.address();
        self.reset(address)?;
        delay.delay_us(u32::try_from(settle.as_micros()).unwrap_or(u32::MAX));
        self.write_config(address, device.config_word())?;
        self.write_adc_config(address, &device.adc())?;
        self.write_calibration(address, device.shunt_cal())?;
        debug!(
            address,
            label = device.label(),
            shunt_cal = device.shunt_cal(),
            current_lsb = device.current_lsb(),
            "device configured"
        );
        Ok(())
    }

    pub fn read_bus_voltage(&mut self, address: u8) -> Result<f64> {
        let code = self.read(address, Register::BusVoltage)?.decode();
        Ok(code as f64 * BUS_VOLTAGE_LSB_V)
    }

    pub fn read_shunt_voltage(&mut self, address: u8, range: AdcRange) -> Result<f64> {
        let code = self.read(address, Register::ShuntVoltage)?.decode();
        Ok(code as f64 * range.shunt_voltage_lsb())
    }

    pub fn read_current(&mut self, address: u8, current_lsb: f64) -> Result<f64> {
        let code = self.read(address, Register::Current)?.decode();
        Ok(code as f64 * current_lsb)
    }

    pub fn read_power(&mut self, address: u8, current_lsb: f64) -> Result<f64> {
        let code = self.read(address, Register::Power)?.decode();
        Ok(code as f64 * crate::calibration::compute_power_lsb(current_lsb))
    }

    /// Accumulated energy in joules.
    pub fn read_energy(&mut self, address: u8, current_lsb: f64) -> Result<f64> {
        let code = self.read(address, Register::Energy)?.decode();
        Ok(code as f64 * crate::calibration::compute_energy_lsb(current_lsb))
    }

    /// Accumulated charge in coulombs.
    pub fn read_charge(&mut self, address: u8, current_lsb: f64) -> Result<f64> {
        let code = self.read(address, Register::Charge)?.decode();
        Ok(code as f64 * current_lsb)
    }

    pub fn read_die_temperature(&mut self, address: u8) -> Result<f64> {
        let code = self.read(address, Register::DieTemperature)?.decode();
        Ok(code as f64 * DIE_TEMPERATURE_LSB_C)
    }

    pub fn read_diagnostics(&mut self, address: u8) -> Result<DiagnosticFlags> {
        let raw = self.read(address, Register::DiagAlert)?.raw as u16;
        Ok(DiagnosticFlags::from_bits_retain(raw))
    }

    pub fn read_manufacturer_id(&mut self, address: u8) -> Result<u16> {
        Ok(self.read(address, Register::ManufacturerId)?.raw as u16)
    }

    pub fn read_device_id(&mut self, address: u8) -> Result<u16> {
        Ok(self.read(address, Register::DeviceId)?.raw as u16)
    }

    /// Read the device ID and report an unknown value as
    /// [`PowerError::InvalidDeviceId`]. Callers treat that as advisory.
    pub fn check_identity(&mut self, address: u8) -> Result<u16> {
        let id = self.read_device_id(address)?;
        if !is_known_device_id(id) {
            return Err(PowerError::InvalidDeviceId { address, id });
        }
        Ok(id)
    }

    /// Stop conversions, keeping conversion times and averaging.
    pub fn enter_power_down(&mut self, address: u8) -> Result<()> {
        let current = self.read(address, Register::AdcConfig)?.raw as u16;
        self.write(
            address,
            Register::AdcConfig,
            AdcConfig::with_mode_bits(current, OperatingMode::Shutdown),
            Operation::PowerDown,
        )
    }

    pub fn exit_power_down(&mut self, address: u8, mode: OperatingMode) -> Result<()> {
        let current = self.read(address, Register::AdcConfig)?.raw as u16;
        self.write(
            address,
            Register::AdcConfig,
            AdcConfig::with_mode_bits(current, mode),
            Operation::PowerUp,
        )
    }

    /// Best-effort read of every mapped register.
    pub fn inspect_registers(&mut self, address: u8) -> Vec<RegisterSnapshot> {
        Register::iter()
            .map(|register| RegisterSnapshot {
                register,
                value: self.read(address, register),
            })
            .collect()
    }
}
