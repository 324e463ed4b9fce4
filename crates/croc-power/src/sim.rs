//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "In-process I2C bus with INA228 register files and fault injection."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Simulated sensor bench.
//!
//! [`SimulatedBus`] implements the blocking `embedded_hal` I2C trait and keeps
//! one register file per address. A rail state (bus voltage and current) can
//! be attached to a device; its measurement registers are then regenerated
//! from the programmed SHUNT_CAL and ADC range, the same way the silicon
//! derives them. Clones share state, so a test keeps a handle for fault
//! injection while the driver owns another. Injected latency sleeps, unless
//! the bus was built with [`SimulatedBus::with_clock`], in which case it
//! advances that clock instead.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use croc_common::time::ManualClock;
use embedded_hal::i2c::{
    ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation as I2cOperation,
};
use parking_lot::Mutex;

use crate::calibration::{compute_energy_lsb, compute_power_lsb, SHUNT_CAL_SCALE};
use crate::registers::{
    AdcConfig, AdcRange, ConfigFlags, OperatingMode, Register, BUS_VOLTAGE_LSB_V,
    DIE_TEMPERATURE_LSB_C, TEXAS_INSTRUMENTS_ID,
};

const DEFAULT_DEVICE_ID: u16 = 0x2281;
const DEFAULT_SHUNT_CAL: u64 = 0x1000;
const TWENTY_BIT_MAX: i64 = (1 << 19) - 1;
const FORTY_BIT_MASK: u64 = 0xFF_FFFF_FFFF;

/// Electrical state of the rail a simulated sensor sits on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RailState {
    pub bus_voltage_v: f64,
    /// Positive when flowing through the shunt in the sensing direction.
    pub current_a: f64,
}

#[derive(Debug)]
struct SimDevice {
    shunt_ohms: f64,
    registers: HashMap<Register, u64>,
    pointer: Option<Register>,
    nacks: HashSet<Register>,
    absent: bool,
    latency: Duration,
    rail: Option<RailState>,
    device_id: u16,
    temperature_c: f64,
    energy_j: f64,
    charge_c: f64,
}

fn nack_data() -> ErrorKind {
    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
}

fn shifted_signed(code: f64) -> u64 {
    let code = (code.round() as i64).clamp(-TWENTY_BIT_MAX - 1, TWENTY_BIT_MAX);
    ((code << 4) as u64) & 0xFF_FFFF
}

fn shifted_unsigned(code: f64) -> u64 {
    let code = (code.round() as i64).clamp(0, 0xF_FFFF);
    (code as u64) << 4
}

impl SimDevice {
    fn new(shunt_ohms: f64) -> Self {
        let mut device = Self {
            shunt_ohms,
            registers: HashMap::new(),
            pointer: None,
            nacks: HashSet::new(),
            absent: false,
            latency: Duration::ZERO,
            rail: None,
            device_id: DEFAULT_DEVICE_ID,
            temperature_c: 25.0,
            energy_j: 0.0,
            charge_c: 0.0,
        };
        device.power_on();
        device
    }

    fn get(&self, register: Register) -> u64 {
        self.registers.get(&register).copied().unwrap_or_default()
    }

    fn power_on(&mut self) {
        self.registers.clear();
        self.registers.insert(Register::Config, 0);
        self.registers
            .insert(Register::AdcConfig, u64::from(AdcConfig::default().bits()));
        self.registers.insert(Register::ShuntCal, DEFAULT_SHUNT_CAL);
        self.registers.insert(Register::DiagAlert, 0x0001);
        self.registers
            .insert(Register::ManufacturerId, u64::from(TEXAS_INSTRUMENTS_ID));
        self.registers
            .insert(Register::DeviceId, u64::from(self.device_id));
        self.write_temperature();
        self.energy_j = 0.0;
        self.charge_c = 0.0;
        self.refresh();
    }

    fn write_temperature(&mut self) {
        let code = (self.temperature_c / DIE_TEMPERATURE_LSB_C).round() as i16;
        self.registers
            .insert(Register::DieTemperature, u64::from(code as u16));
    }

    fn range(&self) -> AdcRange {
        if self.get(Register::Config) & u64::from(ConfigFlags::ADCRANGE.bits()) != 0 {
            AdcRange::Narrow
        } else {
            AdcRange::Wide
        }
    }

    /// Current LSB implied by the programmed SHUNT_CAL.
    fn current_lsb(&self) -> Option<f64> {
        let cal = self.get(Register::ShuntCal) as f64;
        if cal == 0.0 || self.shunt_ohms <= 0.0 {
            return None;
        }
        Some(cal / (SHUNT_CAL_SCALE * self.shunt_ohms * self.range().shunt_cal_multiplier()))
    }

    fn converting(&self) -> bool {
        let mode = OperatingMode::from_bits(self.get(Register::AdcConfig) as u16);
        !matches!(mode, Some(OperatingMode::Shutdown) | None)
    }

    fn refresh(&mut self) {
        let Some(rail) = self.rail else {
            return;
        };
        let shunt_v = rail.current_a * self.shunt_ohms;
        let shunt_code = shunt_v / self.range().shunt_voltage_lsb();
        self.registers
            .insert(Register::ShuntVoltage, shifted_signed(shunt_code));
        self.registers.insert(
            Register::BusVoltage,
            shifted_unsigned(rail.bus_voltage_v / BUS_VOLTAGE_LSB_V),
        );
        let (current, power, energy, charge) = match self.current_lsb() {
            Some(lsb) => {
                let power_code = (rail.bus_voltage_v * rail.current_a).abs() / compute_power_lsb(lsb);
                let energy_code = (self.energy_j / compute_energy_lsb(lsb)).round() as u64;
                let charge_code = (self.charge_c / lsb).round() as i64;
                (
                    shifted_signed(rail.current_a / lsb),
                    (power_code.round() as u64).min(0xFF_FFFF),
                    energy_code & FORTY_BIT_MASK,
                    (charge_code as u64) & FORTY_BIT_MASK,
                )
            }
            None => (0, 0, 0, 0),
        };
        self.registers.insert(Register::Current, current);
        self.registers.insert(Register::Power, power);
        self.registers.insert(Register::Energy, energy);
        self.registers.insert(Register::Charge, charge);
    }

    fn apply_write(&mut self, register: Register, value: u16) {
        match register {
            Register::Config => {
                let flags = ConfigFlags::from_bits_retain(value);
                if flags.contains(ConfigFlags::RST) {
                    self.power_on();
                    return;
                }
                if flags.contains(ConfigFlags::RSTACC) {
                    self.energy_j = 0.0;
                    self.charge_c = 0.0;
                }
                let stored = flags - ConfigFlags::RST - ConfigFlags::RSTACC;
                self.registers
                    .insert(Register::Config, u64::from(stored.bits()));
                self.refresh();
            }
            Register::AdcConfig | Register::ShuntCal | Register::DiagAlert => {
                self.registers.insert(register, u64::from(value));
                self.refresh();
            }
            _ => {}
        }
    }

    fn handle_write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        let Some((&pointer, payload)) = bytes.split_first() else {
            return Ok(());
        };
        let register = Register::from_address(pointer).ok_or_else(nack_data)?;
        if self.nacks.contains(&register) {
            return Err(nack_data());
        }
        self.pointer = Some(register);
        if let [msb, lsb, ..] = payload {
            self.apply_write(register, u16::from_be_bytes([*msb, *lsb]));
        }
        Ok(())
    }

    fn handle_read(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind> {
        let register = self.pointer.ok_or(ErrorKind::Other)?;
        if self.nacks.contains(&register) {
            return Err(nack_data());
        }
        let value = self.get(register);
        let width = register.layout().width;
        for (index, byte) in buf.iter_mut().enumerate() {
            *byte = if index < width {
                (value >> (8 * (width - 1 - index))) as u8
            } else {
                0
            };
        }
        Ok(())
    }

    fn advance(&mut self, dt: Duration) {
        let Some(rail) = self.rail else {
            return;
        };
        if !self.converting() || self.current_lsb().is_none() {
            return;
        }
        let seconds = dt.as_secs_f64();
        self.energy_j += (rail.bus_voltage_v * rail.current_a).abs() * seconds;
        self.charge_c += rail.current_a * seconds;
        self.refresh();
    }
}

#[derive(Debug, Default)]
struct BusState {
    devices: BTreeMap<u8, SimDevice>,
    transactions: HashMap<u8, usize>,
    clock: Option<ManualClock>,
}

/// Shared handle to a simulated I2C bus.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    inner: Arc<Mutex<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose transaction latency moves `clock` forward.
    pub fn with_clock(clock: ManualClock) -> Self {
        let bus = Self::default();
        bus.inner.lock().clock = Some(clock);
        bus
    }

    /// Attach a sensor in its power-on state.
    pub fn add_device(&self, address: u8, shunt_ohms: f64) {
        self.inner
            .lock()
            .devices
            .insert(address, SimDevice::new(shunt_ohms));
    }

    fn with_device<R>(&self, address: u8, f: impl FnOnce(&mut SimDevice) -> R) -> Option<R> {
        self.inner.lock().devices.get_mut(&address).map(f)
    }

    /// Stop acknowledging the address, as if the sensor lost power.
    pub fn disconnect(&self, address: u8) {
        self.with_device(address, |device| device.absent = true);
    }

    pub fn reconnect(&self, address: u8) {
        self.with_device(address, |device| device.absent = false);
    }

    /// NACK every access to `register` on this device.
    pub fn nack_register(&self, address: u8, register: Register) {
        self.with_device(address, |device| {
            device.nacks.insert(register);
        });
    }

    pub fn clear_faults(&self, address: u8) {
        self.with_device(address, |device| {
            device.nacks.clear();
            device.absent = false;
            device.latency = Duration::ZERO;
        });
    }

    /// Delay applied to every transaction with this device.
    pub fn set_latency(&self, address: u8, latency: Duration) {
        self.with_device(address, |device| device.latency = latency);
    }

    /// Overwrite a register's raw contents, bypassing write rules.
    pub fn set_register(&self, address: u8, register: Register, raw: u64) {
        self.with_device(address, |device| {
            device.registers.insert(register, raw);
            if register == Register::DeviceId {
                device.device_id = raw as u16;
            }
        });
    }

    pub fn register(&self, address: u8, register: Register) -> Option<u64> {
        self.with_device(address, |device| device.get(register))
    }

    pub fn set_rail(&self, address: u8, bus_voltage_v: f64, current_a: f64) {
        self.with_device(address, |device| {
            device.rail = Some(RailState {
                bus_voltage_v,
                current_a,
            });
            device.refresh();
        });
    }

    pub fn rail(&self, address: u8) -> Option<RailState> {
        self.with_device(address, |device| device.rail).flatten()
    }

    pub fn set_die_temperature(&self, address: u8, celsius: f64) {
        self.with_device(address, |device| {
            device.temperature_c = celsius;
            device.write_temperature();
        });
    }

    /// Integrate energy and charge on every converting device.
    pub fn advance(&self, dt: Duration) {
        for device in self.inner.lock().devices.values_mut() {
            device.advance(dt);
        }
    }

    /// Transactions attempted against `address`, acknowledged or not.
    pub fn transactions(&self, address: u8) -> usize {
        self.inner
            .lock()
            .transactions
            .get(&address)
            .copied()
            .unwrap_or_default()
    }
}

impl ErrorType for SimulatedBus {
    type Error = ErrorKind;
}

impl I2c for SimulatedBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [I2cOperation<'_>],
    ) -> Result<(), Self::Error> {
        let (latency, clock) = {
            let mut state = self.inner.lock();
            *state.transactions.entry(address).or_default() += 1;
            let latency = match state.devices.get(&address) {
                Some(device) if !device.absent => device.latency,
                _ => return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
            };
            (latency, state.clock.clone())
        };
        if !latency.is_zero() {
            match clock {
                Some(clock) => clock.advance(latency),
                None => std::thread::sleep(latency),
            }
        }
        let mut state = self.inner.lock();
        let device = state
            .devices
            .get_mut(&address)
            .ok_or(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))?;
        for operation in operations.iter_mut() {
            match operation {
                I2cOperation::Write(bytes) => device.handle_write(bytes)?,
                I2cOperation::Read(buf) => device.handle_read(buf)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Ina228Driver;

    const LSB: f64 = 5.0 / 524_288.0;

    fn calibrated(address: u8) -> (SimulatedBus, Ina228Driver<SimulatedBus>) {
        let bus = SimulatedBus::new();
        bus.add_device(address, 0.015);
        let mut driver = Ina228Driver::new(bus.clone());
        driver.write_calibration(address, 1875).unwrap();
        (bus, driver)
    }

    #[test]
    fn rail_state_round_trips_through_driver() {
        let (bus, mut driver) = calibrated(0x40);
        bus.set_rail(0x40, 12.0, 1.5);
        let volts = driver.read_bus_voltage(0x40).unwrap();
        let amps = driver.read_current(0x40, LSB).unwrap();
        let watts = driver.read_power(0x40, LSB).unwrap();
        assert!((volts - 12.0).abs() < BUS_VOLTAGE_LSB_V);
        assert!((amps - 1.5).abs() < LSB);
        assert!((watts - 18.0).abs() < 3.2 * LSB * 2.0);
    }

    #[test]
    fn discharge_reads_negative() {
        let (bus, mut driver) = calibrated(0x44);
        bus.set_rail(0x44, 3.7, -0.8);
        assert!((driver.read_current(0x44, LSB).unwrap() + 0.8).abs() < LSB);
        let shunt = driver.read_shunt_voltage(0x44, AdcRange::Wide).unwrap();
        assert!((shunt + 0.012).abs() < 1e-6);
    }

    #[test]
    fn reset_restores_power_on_values() {
        let (bus, mut driver) = calibrated(0x40);
        assert_eq!(bus.register(0x40, Register::ShuntCal), Some(1875));
        driver.reset(0x40).unwrap();
        assert_eq!(bus.register(0x40, Register::ShuntCal), Some(DEFAULT_SHUNT_CAL));
        assert_eq!(bus.register(0x40, Register::Config), Some(0));
    }

    #[test]
    fn accumulators_integrate_and_clear() {
        let (bus, mut driver) = calibrated(0x40);
        bus.set_rail(0x40, 10.0, 2.0);
        bus.advance(Duration::from_secs(10));
        let energy = driver.read_energy(0x40, LSB).unwrap();
        let charge = driver.read_charge(0x40, LSB).unwrap();
        assert!((energy - 200.0).abs() < 0.01);
        assert!((charge - 20.0).abs() < 0.001);

        driver.reset_accumulators(0x40).unwrap();
        assert_eq!(driver.read_energy(0x40, LSB).unwrap(), 0.0);
        assert_eq!(bus.register(0x40, Register::ShuntCal), Some(1875));
    }

    #[test]
    fn shutdown_stops_accumulation() {
        let (bus, mut driver) = calibrated(0x40);
        bus.set_rail(0x40, 10.0, 2.0);
        driver.enter_power_down(0x40).unwrap();
        bus.advance(Duration::from_secs(10));
        assert_eq!(driver.read_energy(0x40, LSB).unwrap(), 0.0);
    }

    #[test]
    fn disconnected_device_nacks_address() {
        let (bus, mut driver) = calibrated(0x40);
        bus.disconnect(0x40);
        assert!(!driver.is_present(0x40));
        bus.reconnect(0x40);
        assert!(driver.is_present(0x40));
    }

    #[test]
    fn transactions_are_counted_per_address() {
        let bus = SimulatedBus::new();
        bus.add_device(0x40, 0.015);
        let mut driver = Ina228Driver::new(bus.clone());
        let _ = driver.read_bus_voltage(0x40);
        let _ = driver.is_present(0x41);
        assert_eq!(bus.transactions(0x40), 1);
        assert_eq!(bus.transactions(0x41), 1);
        assert_eq!(bus.transactions(0x44), 0);
    }
}
