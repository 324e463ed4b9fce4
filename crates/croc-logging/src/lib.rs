//! ---
//! ct_section: "03-logging"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Structured logging context and sweep events."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers layered on `tracing` for the power subsystem.
//!
//! Every event carries the same `device`, `address` and `sweep` fields so the
//! logging collaborator can correlate failures with roster entries.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

/// Context-aware logging macros.
pub mod macros;

/// Initialize a baseline tracing subscriber suitable for tests and bench tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Roster label of the device, e.g. `solar`.
    pub device: Option<&'a str>,
    /// 7-bit bus address of the device.
    pub address: Option<u8>,
    /// Sweep number assigned by the control loop.
    pub sweep: Option<u64>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device label and bus address.
    pub fn with_device(mut self, label: &'a str, address: u8) -> Self {
        self.device = Some(label);
        self.address = Some(address);
        self
    }

    /// Attach a sweep number.
    pub fn with_sweep(mut self, sweep: u64) -> Self {
        self.sweep = Some(sweep);
        self
    }

    /// Address rendered as `0x40`, or empty when unset.
    pub fn address_hex(&self) -> String {
        self.address
            .map(|address| format!("0x{:02x}", address))
            .unwrap_or_default()
    }
}

/// Outcome of one sampling sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every configured device produced a valid measurement.
    Complete,
    /// At least one device failed while others succeeded.
    Partial,
    /// No device produced a valid measurement.
    Failed,
}

impl SweepOutcome {
    /// Classify a sweep from its valid and total device counts.
    pub fn classify(valid: usize, total: usize) -> Self {
        if total > 0 && valid == total {
            SweepOutcome::Complete
        } else if valid > 0 {
            SweepOutcome::Partial
        } else {
            SweepOutcome::Failed
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SweepOutcome::Complete => "complete",
            SweepOutcome::Partial => "partial",
            SweepOutcome::Failed => "failed",
        }
    }
}

/// Emit a standardized sweep-level event. Partial sweeps log at WARN, failed
/// sweeps at ERROR.
pub fn log_sweep_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SweepOutcome,
) {
    let default = LogContext::default();
    let ctx = context.unwrap_or(&default);
    let device = ctx.device.unwrap_or("");
    let address = ctx.address_hex();
    let sweep = ctx.sweep.unwrap_or_default();
    let outcome_str = outcome.as_str();
    match outcome {
        SweepOutcome::Complete => tracing::info!(
            event,
            outcome = outcome_str,
            device,
            address = %address,
            sweep,
            message = %message
        ),
        SweepOutcome::Partial => tracing::warn!(
            event,
            outcome = outcome_str,
            device,
            address = %address,
            sweep,
            message = %message
        ),
        SweepOutcome::Failed => tracing::error!(
            event,
            outcome = outcome_str,
            device,
            address = %address,
            sweep,
            message = %message
        ),
    }
}
