//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "INA228 register map and bitfield definitions."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Register map of the INA228 current/voltage/power monitor.
//!
//! Decoding rules are attached to each register through [`RegisterLayout`] so
//! that sign handling and the 4-bit alignment shift are looked up, never
//! inferred from the value being decoded.

use bitflags::bitflags;
use serde::Serialize;
use strum::{Display, EnumIter};

/// Bus voltage resolution, volts per code.
pub const BUS_VOLTAGE_LSB_V: f64 = 195.3125e-6;
/// Die temperature resolution, degrees Celsius per code.
pub const DIE_TEMPERATURE_LSB_C: f64 = 7.8125e-3;

/// Device ID values seen across silicon revisions (DIEID 0x228, REV 0 or 1).
pub const KNOWN_DEVICE_IDS: [u16; 2] = [0x2280, 0x2281];
/// "TI" in ASCII.
pub const TEXAS_INSTRUMENTS_ID: u16 = 0x5449;

/// Addressable registers, named after their datasheet mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Register {
    Config = 0x00,
    AdcConfig = 0x01,
    ShuntCal = 0x02,
    ShuntVoltage = 0x04,
    BusVoltage = 0x05,
    DieTemperature = 0x06,
    Current = 0x07,
    Power = 0x08,
    Energy = 0x09,
    Charge = 0x0A,
    DiagAlert = 0x0B,
    ManufacturerId = 0x3E,
    DeviceId = 0x3F,
}

/// How the raw integer held by a register must be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Unsigned,
    TwosComplement,
}

/// Static decoding rules for one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    /// Width on the wire, in bytes.
    pub width: usize,
    pub signedness: Signedness,
    /// Whether a 20-bit result sits left-justified and needs `>> 4`.
    pub fixed_shift: bool,
}

impl RegisterLayout {
    const fn new(width: usize, signedness: Signedness, fixed_shift: bool) -> Self {
        Self {
            width,
            signedness,
            fixed_shift,
        }
    }

    pub const fn bits(&self) -> u32 {
        (self.width * 8) as u32
    }
}

impl Register {
    pub const fn address(self) -> u8 {
        self as u8
    }

    /// Decoding table. POWER, ENERGY and CHARGE are never shifted.
    pub const fn layout(self) -> RegisterLayout {
        use Signedness::*;
        match self {
            Register::Config
            | Register::AdcConfig
            | Register::ShuntCal
            | Register::DiagAlert
            | Register::ManufacturerId
            | Register::DeviceId => RegisterLayout::new(2, Unsigned, false),
            Register::DieTemperature => RegisterLayout::new(2, TwosComplement, false),
            Register::ShuntVoltage | Register::Current => RegisterLayout::new(3, TwosComplement, true),
            Register::BusVoltage => RegisterLayout::new(3, Unsigned, true),
            Register::Power => RegisterLayout::new(3, Unsigned, false),
            Register::Energy => RegisterLayout::new(5, Unsigned, false),
            Register::Charge => RegisterLayout::new(5, TwosComplement, false),
        }
    }

    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Register::Config | Register::AdcConfig | Register::ShuntCal | Register::DiagAlert
        )
    }

    pub fn from_address(address: u8) -> Option<Self> {
        use strum::IntoEnumIterator;
        Register::iter().find(|register| register.address() == address)
    }
}

/// Shunt full-scale range, selected by CONFIG.ADCRANGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdcRange {
    /// ±163.84 mV, 312.5 nV per code.
    #[default]
    Wide,
    /// ±40.96 mV, 78.125 nV per code.
    Narrow,
}

impl AdcRange {
    pub const fn shunt_voltage_lsb(self) -> f64 {
        match self {
            AdcRange::Wide => 312.5e-9,
            AdcRange::Narrow => 78.125e-9,
        }
    }

    /// Factor the hardware expects SHUNT_CAL to be scaled by in this range.
    pub const fn shunt_cal_multiplier(self) -> f64 {
        match self {
            AdcRange::Wide => 1.0,
            AdcRange::Narrow => 4.0,
        }
    }
}

bitflags! {
    /// CONFIG register (0x00).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u16 {
        /// Power-on reset of every register. Self-clearing.
        const RST = 1 << 15;
        /// Clears ENERGY and CHARGE.
        const RSTACC = 1 << 14;
        /// Initial conversion delay in 2 ms steps.
        const CONVDLY = 0xFF << 6;
        const TEMPCOMP = 1 << 5;
        const ADCRANGE = 1 << 4;
    }
}

impl ConfigFlags {
    pub fn for_range(range: AdcRange) -> Self {
        match range {
            AdcRange::Wide => ConfigFlags::empty(),
            AdcRange::Narrow => ConfigFlags::ADCRANGE,
        }
    }
}

bitflags! {
    /// DIAG_ALRT register (0x0B).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    pub struct DiagnosticFlags: u16 {
        const ALATCH = 1 << 15;
        const CNVR = 1 << 14;
        const SLOWALERT = 1 << 13;
        const APOL = 1 << 12;
        const ENERGYOF = 1 << 11;
        const CHARGEOF = 1 << 10;
        const MATHOF = 1 << 9;
        const TMPOL = 1 << 7;
        const SHNTOL = 1 << 6;
        const SHNTUL = 1 << 5;
        const BUSOL = 1 << 4;
        const BUSUL = 1 << 3;
        const POL = 1 << 2;
        const CNVRF = 1 << 1;
        /// Cleared when the trim memory failed its checksum.
        const MEMSTAT = 1 << 0;
    }
}

impl DiagnosticFlags {
    /// Conditions that make a reading questionable.
    pub fn faults(self) -> Self {
        let mut faults = self
            & (DiagnosticFlags::ENERGYOF | DiagnosticFlags::CHARGEOF | DiagnosticFlags::MATHOF);
        if !self.contains(DiagnosticFlags::MEMSTAT) {
            faults |= DiagnosticFlags::MEMSTAT;
        }
        faults
    }

    /// Limit comparisons that have tripped.
    pub fn limit_alerts(self) -> Self {
        self & (DiagnosticFlags::TMPOL
            | DiagnosticFlags::SHNTOL
            | DiagnosticFlags::SHNTUL
            | DiagnosticFlags::BUSOL
            | DiagnosticFlags::BUSUL
            | DiagnosticFlags::POL)
    }
}

/// ADC_CONFIG.MODE (bits 15..12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OperatingMode {
    Shutdown = 0x0,
    TriggeredBus = 0x1,
    TriggeredShunt = 0x2,
    TriggeredShuntBus = 0x3,
    TriggeredTemperature = 0x4,
    TriggeredTemperatureBus = 0x5,
    TriggeredTemperatureShunt = 0x6,
    TriggeredAll = 0x7,
    ContinuousBus = 0x9,
    ContinuousShunt = 0xA,
    ContinuousShuntBus = 0xB,
    ContinuousTemperature = 0xC,
    ContinuousTemperatureBus = 0xD,
    ContinuousTemperatureShunt = 0xE,
    #[default]
    ContinuousAll = 0xF,
}

impl OperatingMode {
    pub const fn bits(self) -> u16 {
        (self as u16) << 12
    }

    pub fn from_bits(value: u16) -> Option<Self> {
        use OperatingMode::*;
        let mode = match (value >> 12) & 0xF {
            0x0 | 0x8 => Shutdown,
            0x1 => TriggeredBus,
            0x2 => TriggeredShunt,
            0x3 => TriggeredShuntBus,
            0x4 => TriggeredTemperature,
            0x5 => TriggeredTemperatureBus,
            0x6 => TriggeredTemperatureShunt,
            0x7 => TriggeredAll,
            0x9 => ContinuousBus,
            0xA => ContinuousShunt,
            0xB => ContinuousShuntBus,
            0xC => ContinuousTemperature,
            0xD => ContinuousTemperatureBus,
            0xE => ContinuousTemperatureShunt,
            0xF => ContinuousAll,
            _ => return None,
        };
        Some(mode)
    }
}

/// Sample averaging count, ADC_CONFIG.AVG (bits 2..0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Averaging {
    #[default]
    X1,
    X4,
    X16,
    X64,
    X128,
    X256,
    X512,
    X1024,
}

impl Averaging {
    pub fn from_count(count: u16) -> Option<Self> {
        let averaging = match count {
            1 => Averaging::X1,
            4 => Averaging::X4,
            16 => Averaging::X16,
            64 => Averaging::X64,
            128 => Averaging::X128,
            256 => Averaging::X256,
            512 => Averaging::X512,
            1024 => Averaging::X1024,
            _ => return None,
        };
        Some(averaging)
    }

    const fn code(self) -> u16 {
        self as u16
    }
}

/// ADC_CONFIG register (0x01) contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdcConfig {
    pub mode: OperatingMode,
    /// Conversion-time code 0..=7 (50 µs .. 4120 µs).
    pub bus_conversion: u8,
    pub shunt_conversion: u8,
    pub temperature_conversion: u8,
    pub averaging: Averaging,
}

impl Default for AdcConfig {
    /// Continuous conversion of every channel at 2074 µs, no averaging.
    fn default() -> Self {
        Self {
            mode: OperatingMode::ContinuousAll,
            bus_conversion: 5,
            shunt_conversion: 5,
            temperature_conversion: 5,
            averaging: Averaging::X1,
        }
    }
}

impl AdcConfig {
    pub fn with_conversion_time(mut self, code: u8) -> Self {
        let code = code & 0x7;
        self.bus_conversion = code;
        self.shunt_conversion = code;
        self.temperature_conversion = code;
        self
    }

    pub fn bits(&self) -> u16 {
        self.mode.bits()
            | (u16::from(self.bus_conversion & 0x7) << 9)
            | (u16::from(self.shunt_conversion & 0x7) << 6)
            | (u16::from(self.temperature_conversion & 0x7) << 3)
            | self.averaging.code()
    }

    /// Replace only the MODE field of an existing ADC_CONFIG value.
    pub fn with_mode_bits(current: u16, mode: OperatingMode) -> u16 {
        (current & 0x0FFF) | mode.bits()
    }
}
