//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Error types for the power-sensing subsystem."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::time::Duration;

use embedded_hal::i2c::ErrorKind;
use serde::Serialize;
use strum::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PowerError>;

/// Single-device operation, recorded on every failure so a log line can name
/// what was being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Probe,
    Reset,
    ResetAccumulators,
    WriteConfig,
    WriteAdcConfig,
    WriteCalibration,
    ReadCalibration,
    ReadConfig,
    ReadAdcConfig,
    ReadBusVoltage,
    ReadShuntVoltage,
    ReadCurrent,
    ReadPower,
    ReadEnergy,
    ReadCharge,
    ReadDieTemperature,
    ReadDiagnostics,
    ReadManufacturerId,
    ReadDeviceId,
    PowerDown,
    PowerUp,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PowerError {
    #[error("bus error at 0x{address:02x} during {operation}: {kind}")]
    Communication {
        address: u8,
        operation: Operation,
        kind: ErrorKind,
    },
    #[error("calibration failed: {reason}")]
    CalibrationFailed { reason: String },
    #[error("device at 0x{address:02x} reported unexpected id 0x{id:04x}")]
    InvalidDeviceId { address: u8, id: u16 },
    #[error("{operation} at 0x{address:02x} took {elapsed:?}, budget {budget:?}")]
    MeasurementTimeout {
        address: u8,
        operation: Operation,
        elapsed: Duration,
        budget: Duration,
    },
    #[error("register payload of {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
}

impl PowerError {
    pub(crate) fn calibration(reason: impl Into<String>) -> Self {
        PowerError::CalibrationFailed {
            reason: reason.into(),
        }
    }

    /// Bus address the failure is attributed to, when there is one.
    pub fn address(&self) -> Option<u8> {
        match self {
            PowerError::Communication { address, .. }
            | PowerError::InvalidDeviceId { address, .. }
            | PowerError::MeasurementTimeout { address, .. } => Some(*address),
            PowerError::CalibrationFailed { .. } | PowerError::InvalidLength { .. } => None,
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            PowerError::Communication { operation, .. }
            | PowerError::MeasurementTimeout { operation, .. } => Some(*operation),
            PowerError::InvalidDeviceId { .. } => Some(Operation::ReadDeviceId),
            PowerError::CalibrationFailed { .. } | PowerError::InvalidLength { .. } => None,
        }
    }

    /// True for NACKs and transport faults, as opposed to slow reads.
    pub fn is_communication(&self) -> bool {
        matches!(self, PowerError::Communication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::NoAcknowledgeSource;

    #[test]
    fn communication_error_names_address_and_operation() {
        let err = PowerError::Communication {
            address: 0x44,
            operation: Operation::ReadCurrent,
            kind: ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
        };
        let text = err.to_string();
        assert!(text.contains("0x44"));
        assert!(text.contains("read_current"));
        assert_eq!(err.address(), Some(0x44));
        assert_eq!(err.operation(), Some(Operation::ReadCurrent));
        assert!(err.is_communication());
    }

    #[test]
    fn calibration_error_has_no_address() {
        let err = PowerError::calibration("shunt resistance must be positive");
        assert_eq!(err.address(), None);
        assert!(!err.is_communication());
    }
}
