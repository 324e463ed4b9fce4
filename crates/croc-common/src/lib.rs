//! ---
//! ct_section: "01-core-functionality"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Shared primitives and utilities for the core runtime."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
//! Core shared primitives for the Croc Tracker power-sensing workspace.
//! This crate exposes configuration loading, tracing initialisation, the
//! injectable clock, and sweep-loop timing statistics.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    AppConfig, DeviceSettings, LoadedAppConfig, LoggingConfig, Mode, RailRole, SamplingConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{JitterReport, SweepJitter};
pub use time::{Clock, ManualClock, MonotonicClock};
