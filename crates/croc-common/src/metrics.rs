//! ---
//! ct_section: "01-core-functionality"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Start-to-start timing of the sweep loop against its sampling period."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::time::{duration_to_micros, jitter_us, Clock};

/// Timing of the sweep loop over a run. Deviations are signed: positive when
/// a sweep started late.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JitterReport {
    pub period_us: u64,
    pub intervals: u64,
    pub mean_abs_us: f64,
    pub std_dev_us: f64,
    pub worst_late_us: i64,
    pub worst_early_us: i64,
    /// Intervals that spanned two periods or more, i.e. a skipped sweep.
    pub overruns: u64,
}

/// Records when each sweep starts, on an injected clock.
#[derive(Debug)]
pub struct SweepJitter<C> {
    period: Duration,
    clock: C,
    last_start: Option<Duration>,
    deviations_us: Vec<i64>,
    overruns: u64,
}

impl<C: Clock> SweepJitter<C> {
    pub fn new(period: Duration, clock: C) -> Self {
        Self {
            period,
            clock,
            last_start: None,
            deviations_us: Vec::new(),
            overruns: 0,
        }
    }

    /// Mark the start of a sweep now. Returns the deviation from the period,
    /// or `None` for the first sweep.
    pub fn mark_start(&mut self) -> Option<i64> {
        let now = self.clock.now();
        self.mark_start_at(now)
    }

    pub fn mark_start_at(&mut self, at: Duration) -> Option<i64> {
        let previous = self.last_start.replace(at)?;
        let interval = at.saturating_sub(previous);
        if interval >= self.period * 2 {
            self.overruns += 1;
        }
        let deviation = jitter_us(interval, self.period);
        self.deviations_us.push(deviation);
        Some(deviation)
    }

    pub fn report(&self) -> Option<JitterReport> {
        let samples = &self.deviations_us;
        if samples.is_empty() {
            return None;
        }
        let count = samples.len() as f64;
        let mean = samples.iter().map(|&us| us as f64).sum::<f64>() / count;
        let variance = match samples.len() {
            1 => 0.0,
            n => {
                samples
                    .iter()
                    .map(|&us| (us as f64 - mean).powi(2))
                    .sum::<f64>()
                    / (n - 1) as f64
            }
        };
        Some(JitterReport {
            period_us: duration_to_micros(self.period),
            intervals: samples.len() as u64,
            mean_abs_us: samples.iter().map(|us| us.unsigned_abs() as f64).sum::<f64>() / count,
            std_dev_us: variance.sqrt(),
            worst_late_us: samples.iter().copied().max().unwrap_or_default().max(0),
            worst_early_us: samples.iter().copied().min().unwrap_or_default().min(0),
            overruns: self.overruns,
        })
    }

    /// Write the report as pretty JSON. Nothing is written before the second
    /// sweep.
    pub fn write_report(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let Some(report) = self.report() else {
            return Ok(());
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &report).map_err(std::io::Error::other)
    }
}
