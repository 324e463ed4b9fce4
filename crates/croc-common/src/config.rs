//! ---
//! ct_section: "01-core-functionality"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Shared primitives and utilities for the core runtime."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Lowest and highest 7-bit addresses not reserved by the I2C specification.
const MIN_DEVICE_ADDRESS: u8 = 0x08;
const MAX_DEVICE_ADDRESS: u8 = 0x77;

/// Hardware settling time after a device reset.
pub const MIN_SETTLE_DELAY: Duration = Duration::from_millis(10);

const VALID_AVERAGING: [u16; 8] = [1, 4, 16, 64, 128, 256, 512, 1024];

fn default_mode() -> Mode {
    Mode::Hardware
}

fn default_sampling_period() -> Duration {
    Duration::from_millis(1000)
}

fn default_settle_delay() -> Duration {
    MIN_SETTLE_DELAY
}

fn default_conversion_time() -> u8 {
    5
}

fn default_averaging() -> u16 {
    1
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the power-sensing runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Sensor roster keyed by human label. File order is sweep order.
    #[serde(default)]
    pub devices: IndexMap<String, DeviceSettings>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CROC_CONFIG";

    /// Load configuration from disk, respecting the `CROC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// The three-rail roster fitted to the reference tracker board.
    pub fn reference() -> Self {
        let mut devices = IndexMap::new();
        devices.insert(
            "solar".to_owned(),
            DeviceSettings::new(0x40, 0.015, 5.0).with_role(RailRole::Solar),
        );
        devices.insert(
            "battery".to_owned(),
            DeviceSettings::new(0x44, 0.0177186, 5.0).with_role(RailRole::Battery),
        );
        devices.insert(
            "load".to_owned(),
            DeviceSettings::new(0x41, 0.015, 5.0).with_role(RailRole::Load),
        );
        Self {
            devices,
            ..Self::default()
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(anyhow!("configuration must contain at least one device"));
        }
        self.sampling.validate()?;

        let mut addresses = HashSet::new();
        let mut roles = HashSet::new();
        for (label, device) in &self.devices {
            device.validate(label)?;
            if !addresses.insert(device.address) {
                return Err(anyhow!(
                    "device '{}' reuses bus address 0x{:02x}",
                    label,
                    device.address
                ));
            }
            if let Some(role) = device.role {
                if !roles.insert(role) {
                    return Err(anyhow!(
                        "device '{}' repeats rail role {:?}; roles must be unique",
                        label,
                        role
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            sampling: SamplingConfig::default(),
            devices: IndexMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Where the sensors are read from.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A platform-provided I2C bus.
    #[default]
    Hardware,
    /// The in-process simulated bench.
    Simulation,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardware" => Ok(Mode::Hardware),
            "simulation" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Which power rail a sensor sits on.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RailRole {
    Solar,
    Battery,
    Load,
}

impl std::fmt::Display for RailRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RailRole::Solar => "solar",
            RailRole::Battery => "battery",
            RailRole::Load => "load",
        };
        f.write_str(name)
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingConfig {
    #[serde(default = "default_sampling_period")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub period: Duration,
    #[serde(default = "default_settle_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,
    /// Upper bound on a single register read; slower reads are discarded.
    #[serde(default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub read_budget: Option<Duration>,
    #[serde(default)]
    pub verify_identity: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            period: default_sampling_period(),
            settle_delay: default_settle_delay(),
            read_budget: None,
            verify_identity: false,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(anyhow!("sampling period must be non-zero"));
        }
        if self.settle_delay < MIN_SETTLE_DELAY {
            return Err(anyhow!(
                "settle_delay {:?} is below the {:?} reset settling time",
                self.settle_delay,
                MIN_SETTLE_DELAY
            ));
        }
        if matches!(self.read_budget, Some(budget) if budget.is_zero()) {
            return Err(anyhow!("read_budget must be non-zero when set"));
        }
        Ok(())
    }
}

/// Per-sensor settings as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    pub address: u8,
    pub shunt_ohms: f64,
    pub max_current_a: f64,
    #[serde(default)]
    pub role: Option<RailRole>,
    /// Select the ±40.96 mV shunt range instead of ±163.84 mV.
    #[serde(default)]
    pub narrow_adc_range: bool,
    #[serde(default)]
    pub enable_alerts: bool,
    /// Also read the energy and charge accumulators each sweep.
    #[serde(default)]
    pub sample_accumulators: bool,
    /// Conversion-time code (0..=7) applied to bus, shunt and temperature.
    #[serde(default = "default_conversion_time")]
    pub conversion_time: u8,
    #[serde(default = "default_averaging")]
    pub averaging: u16,
}

impl DeviceSettings {
    pub fn new(address: u8, shunt_ohms: f64, max_current_a: f64) -> Self {
        Self {
            address,
            shunt_ohms,
            max_current_a,
            role: None,
            narrow_adc_range: false,
            enable_alerts: false,
            sample_accumulators: false,
            conversion_time: default_conversion_time(),
            averaging: default_averaging(),
        }
    }

    pub fn with_role(mut self, role: RailRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn validate(&self, label: &str) -> Result<()> {
        if !(MIN_DEVICE_ADDRESS..=MAX_DEVICE_ADDRESS).contains(&self.address) {
            return Err(anyhow!(
                "device '{}' address 0x{:02x} is outside 0x{:02x}..=0x{:02x}",
                label,
                self.address,
                MIN_DEVICE_ADDRESS,
                MAX_DEVICE_ADDRESS
            ));
        }
        if !(self.shunt_ohms.is_finite() && self.shunt_ohms > 0.0) {
            return Err(anyhow!(
                "device '{}' shunt_ohms must be positive (got {})",
                label,
                self.shunt_ohms
            ));
        }
        if !(self.max_current_a.is_finite() && self.max_current_a > 0.0) {
            return Err(anyhow!(
                "device '{}' max_current_a must be positive (got {})",
                label,
                self.max_current_a
            ));
        }
        if self.conversion_time > 7 {
            return Err(anyhow!(
                "device '{}' conversion_time code {} exceeds 7",
                label,
                self.conversion_time
            ));
        }
        if !VALID_AVERAGING.contains(&self.averaging) {
            return Err(anyhow!(
                "device '{}' averaging {} is not one of {:?}",
                label,
                self.averaging,
                VALID_AVERAGING
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_roster_is_valid_and_ordered() {
        let config = AppConfig::reference();
        config.validate().unwrap();
        let labels: Vec<_> = config.devices.keys().map(String::as_str).collect();
        assert_eq!(labels, ["solar", "battery", "load"]);
        assert_eq!(config.devices["battery"].address, 0x44);
    }

    #[test]
    fn parses_hex_addresses_and_millisecond_durations() {
        let config: AppConfig = r#"
            mode = "simulation"

            [sampling]
            period = 500
            read_budget = 20

            [devices.solar]
            address = 0x40
            shunt_ohms = 0.015
            max_current_a = 5.0
            role = "solar"
        "#
        .parse()
        .unwrap();
        assert!(config.mode.is_simulation());
        assert_eq!(config.sampling.period, Duration::from_millis(500));
        assert_eq!(config.sampling.settle_delay, MIN_SETTLE_DELAY);
        assert_eq!(config.sampling.read_budget, Some(Duration::from_millis(20)));
        let solar = &config.devices["solar"];
        assert_eq!(solar.address, 0x40);
        assert_eq!(solar.role, Some(RailRole::Solar));
        assert_eq!(solar.conversion_time, 5);
        assert_eq!(solar.averaging, 1);
    }

    #[test]
    fn rejects_duplicate_addresses() {
        let mut config = AppConfig::reference();
        config.devices["load"].address = 0x40;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reuses bus address"));
    }

    #[test]
    fn rejects_non_positive_shunt() {
        let mut config = AppConfig::reference();
        config.devices["solar"].shunt_ohms = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_settle_delay() {
        let mut config = AppConfig::reference();
        config.sampling.settle_delay = Duration::from_millis(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_repeated_roles() {
        let mut config = AppConfig::reference();
        config.devices["load"].role = Some(RailRole::Solar);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_roster() {
        assert!(AppConfig::default().validate().is_err());
    }
}
