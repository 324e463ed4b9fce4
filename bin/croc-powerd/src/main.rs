//! ---
//! ct_section: "04-runtime"
//! ct_subsection: "binary"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Binary entrypoint for the power-sensing daemon."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
mod bench;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use croc_common::config::{AppConfig, Mode};
use croc_common::logging::init_tracing;
use croc_common::metrics::SweepJitter;
use croc_common::time::MonotonicClock;
use croc_logging::{log_sweep_event, LogContext, SweepOutcome};
use croc_power::calibration::compute_power_lsb;
use croc_power::{roster_from_config, PowerMonitor, StdDelay, SweepResult};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bench::SimulatedBench;

#[derive(Debug, Parser)]
#[command(author, version, about = "Croc Tracker power-sensing daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", env = "CROC_CONFIG", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[arg(long, default_value_t = 1, help = "Seed for the simulated bench")]
    seed: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Hardware,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Hardware => Mode::Hardware,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Sweep the roster every sampling period")]
    Run {
        #[arg(long, help = "Stop after this many sweeps")]
        sweeps: Option<u64>,
        #[arg(long, help = "Print each sweep as a JSON line on stdout")]
        json: bool,
        #[arg(long, value_name = "FILE", help = "Write loop jitter statistics on exit")]
        timing_report: Option<PathBuf>,
    },
    #[command(about = "Check presence, identity and registers of every device")]
    Probe,
    #[command(about = "Print derived calibration constants without touching the bus")]
    Calibrate,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.sim.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    init_tracing("croc-powerd", &config.logging)?;
    info!(source = %loaded.source.display(), devices = config.devices.len(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run {
        sweeps: None,
        json: false,
        timing_report: None,
    }) {
        Commands::Calibrate => calibrate(&config),
        Commands::Probe => probe(&config, cli.seed),
        Commands::Run {
            sweeps,
            json,
            timing_report,
        } => run(&config, cli.seed, sweeps, json, timing_report).await,
    }
}

fn require_simulation(config: &AppConfig) -> Result<()> {
    if !config.mode.is_simulation() {
        bail!("hardware mode needs the platform I2C bus; run with --mode simulation for the bench");
    }
    Ok(())
}

fn calibrate(config: &AppConfig) -> Result<()> {
    println!(
        "{:<10} {:>7} {:>10} {:>14} {:>10} {:>14}",
        "device", "address", "shunt_ohm", "current_lsb_a", "shunt_cal", "power_lsb_w"
    );
    for slot in roster_from_config(config) {
        let device = match slot.device {
            Ok(device) => device,
            Err(err) => {
                println!("{:<10} {:>#7x} {}", slot.label, slot.address, err);
                continue;
            }
        };
        println!(
            "{:<10} {:>#7x} {:>10.6} {:>14.6e} {:>10} {:>14.6e}",
            device.label(),
            device.address(),
            device.shunt_ohms(),
            device.current_lsb(),
            device.shunt_cal(),
            compute_power_lsb(device.current_lsb())
        );
    }
    Ok(())
}

fn probe(config: &AppConfig, seed: u64) -> Result<()> {
    require_simulation(config)?;
    let bench = SimulatedBench::from_config(config, seed)?;
    let mut monitor = PowerMonitor::new(bench.bus(), StdDelay, MonotonicClock::new())
        .with_sampling(&config.sampling);
    let report = monitor.configure(roster_from_config(config))?;
    for status in report.inactive() {
        warn!(
            device = %status.label,
            address = status.address,
            error = ?status.error,
            "device inactive after configure"
        );
    }
    for identity in monitor.verify_identities() {
        let address = identity.address;
        let present = monitor.is_present(address);
        let id = match &identity.result {
            Ok(id) => format!("0x{id:04x}"),
            Err(err) => err.to_string(),
        };
        let temperature = monitor
            .die_temperature(address)
            .map(|celsius| format!("{celsius:.2} C"))
            .unwrap_or_else(|err| err.to_string());
        println!(
            "{} @ 0x{:02x}: present={} active={} id={} die={}",
            identity.label,
            address,
            present,
            monitor.is_active(address),
            id,
            temperature
        );
        for snapshot in monitor.inspect(address) {
            match snapshot.value {
                Ok(value) => println!(
                    "  {:<16} 0x{:0width$x}",
                    snapshot.register,
                    value.raw,
                    width = value.bits() as usize / 4
                ),
                Err(err) => println!("  {:<16} {}", snapshot.register, err),
            }
        }
    }
    Ok(())
}

async fn run(
    config: &AppConfig,
    seed: u64,
    sweeps: Option<u64>,
    json: bool,
    timing_report: Option<PathBuf>,
) -> Result<()> {
    require_simulation(config)?;
    let period = config.sampling.period;
    let mut bench = SimulatedBench::from_config(config, seed)?;
    let mut monitor = PowerMonitor::new(bench.bus(), StdDelay, MonotonicClock::new())
        .with_sampling(&config.sampling);

    let report = monitor.configure(roster_from_config(config))?;
    for status in report.inactive() {
        warn!(
            device = %status.label,
            address = status.address,
            error = ?status.error,
            "device excluded from sweeps"
        );
    }
    info!(
        active = report.active_count(),
        total = report.devices.len(),
        "roster configured"
    );
    if config.sampling.verify_identity {
        let unknown = monitor
            .verify_identities()
            .iter()
            .filter(|check| !check.is_known())
            .count();
        info!(unknown, "identity check finished");
    }

    let mut jitter = SweepJitter::new(period, MonotonicClock::new());
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence = 0u64;
    info!(
        period_ms = period.as_millis() as u64,
        "sampling started; waiting for termination signal"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(late_us) = jitter.mark_start().filter(|us| *us > 0) {
                    debug!(sweep = sequence + 1, late_us, "sweep started late");
                }
                if sequence > 0 {
                    bench.step(period);
                }
                sequence += 1;
                let result = monitor.sweep();
                report_sweep(sequence, &result);
                if json {
                    println!("{}", serde_json::to_string(&result)?);
                }
                if sweeps.is_some_and(|limit| sequence >= limit) {
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                info!("ctrl-c received; shutting down");
                break;
            }
        }
    }

    let failures = monitor.power_down();
    for err in &failures {
        warn!(error = %err, "power down failed");
    }
    if let Some(report) = jitter.report() {
        info!(
            mean_abs_us = report.mean_abs_us,
            std_dev_us = report.std_dev_us,
            worst_late_us = report.worst_late_us,
            overruns = report.overruns,
            intervals = report.intervals,
            "sweep loop timing"
        );
    }
    if let Some(path) = timing_report {
        jitter
            .write_report(&path)
            .with_context(|| format!("unable to write timing report {}", path.display()))?;
    }
    Ok(())
}

fn report_sweep(sequence: u64, result: &SweepResult) {
    for measurement in &result.measurements {
        let ctx = LogContext::new()
            .with_device(&measurement.label, measurement.address)
            .with_sweep(sequence);
        if measurement.valid {
            info!(
                device = %measurement.label,
                sweep = sequence,
                bus_voltage_v = measurement.bus_voltage_v,
                current_a = measurement.current_a,
                power_w = measurement.power_w,
                power_calc_w = measurement.power_calc_w,
                "measurement"
            );
        } else if let Some(fault) = &measurement.fault {
            log_sweep_event(
                Some(&ctx),
                "sweep.device_invalid",
                &fault.message,
                SweepOutcome::Partial,
            );
        }
    }
    match &result.balance {
        Some(balance) if balance.valid => {
            info!(sweep = sequence, balance_w = balance.watts, "power balance");
        }
        Some(balance) => {
            let missing: Vec<_> = balance.missing.iter().map(ToString::to_string).collect();
            warn!(sweep = sequence, missing = %missing.join(","), "power balance unavailable");
        }
        None => {}
    }
    let outcome = SweepOutcome::classify(result.valid_count(), result.measurements.len());
    let ctx = LogContext::new().with_sweep(sequence);
    let message = format!(
        "{} of {} devices valid in {:?}",
        result.valid_count(),
        result.measurements.len(),
        result.duration()
    );
    log_sweep_event(Some(&ctx), "sweep.finished", &message, outcome);
    if outcome == SweepOutcome::Failed {
        error!(sweep = sequence, "no device produced a valid measurement");
    }
}
