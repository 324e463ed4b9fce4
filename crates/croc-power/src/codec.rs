//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Register codec: big-endian assembly, sign extension, fixed shift."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Pure conversions between bus bytes and register integers.
//!
//! All multi-byte registers travel most-significant byte first. Whether a value
//! is sign-extended and whether the 4-bit alignment shift applies is decided by
//! [`Register::layout`], never by the value itself.

use crate::errors::{PowerError, Result};
use crate::registers::{Register, Signedness};

const SIGN_BIT_24: u32 = 1 << 23;
const SIGN_BIT_40: u64 = 1 << 39;
const FIXED_SHIFT: u32 = 4;

fn check_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(PowerError::InvalidLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn assemble(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

pub fn decode16(bytes: &[u8]) -> Result<u16> {
    check_len(bytes, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn decode24(bytes: &[u8]) -> Result<u32> {
    check_len(bytes, 3)?;
    Ok(assemble(bytes) as u32)
}

pub fn decode40(bytes: &[u8]) -> Result<u64> {
    check_len(bytes, 5)?;
    Ok(assemble(bytes))
}

pub fn encode16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Widen a 24-bit two's-complement value. Bit 23 is the sign bit; anything
/// above bit 23 in `raw` is ignored.
pub fn sign_extend24(raw: u32) -> i32 {
    let raw = raw & 0x00FF_FFFF;
    if raw & SIGN_BIT_24 != 0 {
        (raw | 0xFF00_0000) as i32
    } else {
        raw as i32
    }
}

/// Widen a 40-bit two's-complement value (CHARGE).
pub fn sign_extend40(raw: u64) -> i64 {
    let raw = raw & 0xFF_FFFF_FFFF;
    if raw & SIGN_BIT_40 != 0 {
        (raw | 0xFFFF_FF00_0000_0000) as i64
    } else {
        raw as i64
    }
}

/// Drop the four padding bits below a left-justified 20-bit result. The shift
/// is arithmetic, so a sign-extended value keeps its sign.
pub fn apply_fixed_shift(value: i64, requires_shift: bool) -> i64 {
    if requires_shift {
        value >> FIXED_SHIFT
    } else {
        value
    }
}

/// Unsigned register contents as read from the bus, tagged with its register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRegisterValue {
    pub register: Register,
    pub raw: u64,
}

impl RawRegisterValue {
    pub fn new(register: Register, raw: u64) -> Self {
        Self { register, raw }
    }

    pub fn from_bytes(register: Register, bytes: &[u8]) -> Result<Self> {
        let layout = register.layout();
        let raw = match layout.width {
            2 => u64::from(decode16(bytes)?),
            3 => u64::from(decode24(bytes)?),
            _ => decode40(bytes)?,
        };
        Ok(Self { register, raw })
    }

    pub fn bits(&self) -> u32 {
        self.register.layout().bits()
    }

    /// Integer value after the register's sign and shift rules.
    pub fn decode(&self) -> i64 {
        let layout = self.register.layout();
        let widened = match (layout.signedness, layout.width) {
            (Signedness::Unsigned, _) => self.raw as i64,
            (Signedness::TwosComplement, 2) => i64::from(self.raw as u16 as i16),
            (Signedness::TwosComplement, 3) => i64::from(sign_extend24(self.raw as u32)),
            (Signedness::TwosComplement, _) => sign_extend40(self.raw),
        };
        apply_fixed_shift(widened, layout.fixed_shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension_uses_bit_23() {
        assert_eq!(sign_extend24(0x80_0000), -8_388_608);
        assert_eq!(sign_extend24(0x7F_FFFF), 8_388_607);
        assert_eq!(sign_extend24(0x00_0001), 1);
        // bit 19 set alone is positive
        assert_eq!(sign_extend24(0x08_0000), 0x08_0000);
        assert_eq!(sign_extend24(0xFF_FFFF), -1);
    }

    #[test]
    fn forty_bit_sign_extension() {
        assert_eq!(sign_extend40(0xFF_FFFF_FFFF), -1);
        assert_eq!(sign_extend40(0x80_0000_0000), -(1i64 << 39));
        assert_eq!(sign_extend40(0x7F_FFFF_FFFF), (1i64 << 39) - 1);
    }

    #[test]
    fn big_endian_assembly() {
        assert_eq!(decode16(&[0x22, 0x80]).unwrap(), 0x2280);
        assert_eq!(decode24(&[0x0F, 0x42, 0x40]).unwrap(), 0x0F_4240);
        assert_eq!(
            decode40(&[0x01, 0x02, 0x03, 0x04, 0x05]).unwrap(),
            0x01_0203_0405
        );
        assert_eq!(encode16(0x074B), [0x07, 0x4B]);
    }

    #[test]
    fn malformed_length_is_rejected() {
        assert_eq!(
            decode24(&[0x01, 0x02]),
            Err(PowerError::InvalidLength {
                expected: 3,
                actual: 2
            })
        );
        assert!(RawRegisterValue::from_bytes(Register::Energy, &[0; 3]).is_err());
    }

    #[test]
    fn shift_depends_on_register_not_value() {
        let power = RawRegisterValue::new(Register::Power, 0x0F_4240);
        let current = RawRegisterValue::new(Register::Current, 0x0F_4240);
        assert_eq!(power.decode(), 1_000_000);
        assert_eq!(current.decode(), 62_500);
    }

    #[test]
    fn negative_current_keeps_sign_through_shift() {
        let current = RawRegisterValue::new(Register::Current, 0xFF_FFF0);
        assert_eq!(current.decode(), -1);
        let shunt = RawRegisterValue::new(Register::ShuntVoltage, 0x80_0000);
        assert_eq!(shunt.decode(), -524_288);
    }

    #[test]
    fn bus_voltage_is_unsigned_and_shifted() {
        let bus = RawRegisterValue::from_bytes(Register::BusVoltage, &[0xFF, 0xFF, 0xF0]).unwrap();
        assert_eq!(bus.decode(), 0xF_FFFF);
    }

    #[test]
    fn die_temperature_is_signed_sixteen_bit() {
        let cold = RawRegisterValue::new(Register::DieTemperature, 0xFF80);
        assert_eq!(cold.decode(), -128);
        assert_eq!(cold.bits(), 16);
    }

    #[test]
    fn charge_sign_extends_energy_does_not() {
        let charge = RawRegisterValue::new(Register::Charge, 0xFF_FFFF_FFFE);
        let energy = RawRegisterValue::new(Register::Energy, 0xFF_FFFF_FFFE);
        assert_eq!(charge.decode(), -2);
        assert_eq!(energy.decode(), 0xFF_FFFF_FFFE);
    }
}
