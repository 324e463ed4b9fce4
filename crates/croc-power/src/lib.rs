//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Multi-channel INA228 power sensing core."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Multi-channel power sensing for the Croc Tracker.
//!
//! Layers, leaf first: [`codec`] turns bus bytes into register integers,
//! [`calibration`] derives scaling constants from shunt parameters,
//! [`driver`] performs single-device operations over an
//! `embedded_hal::i2c::I2c` bus, and [`orchestrator`] sweeps the roster once
//! per sampling period. [`sim`] provides an in-process bench for tests and
//! the daemon's simulation mode.

pub mod calibration;
pub mod codec;
pub mod delay;
pub mod device;
pub mod driver;
pub mod errors;
pub mod measurement;
pub mod orchestrator;
pub mod registers;
pub mod sim;

pub use calibration::Calibration;
pub use delay::{RecordingDelay, StdDelay};
pub use device::DeviceConfig;
pub use driver::{is_known_device_id, Ina228Driver, RegisterSnapshot};
pub use errors::{Operation, PowerError, Result};
pub use measurement::{Measurement, MeasurementFault, PowerBalance, SweepResult};
pub use orchestrator::{
    roster_from_config, ConfigureReport, DeviceStatus, IdentityCheck, PowerMonitor, RosterSlot,
};
pub use registers::{AdcConfig, AdcRange, DiagnosticFlags, OperatingMode, Register};
pub use sim::SimulatedBus;
