//! ---
//! ct_section: "01-core-functionality"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Tracing subscriber setup for the power-sensing daemon."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "CROC_LOG";
const DEFAULT_DIRECTIVE: &str = "debug";

/// Writer guards must outlive the subscriber or buffered lines are lost.
static GUARDS: OnceCell<(WorkerGuard, WorkerGuard)> = OnceCell::new();

/// Console output format. The log file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Resolve the filter from an explicit `CROC_LOG` directive, then `RUST_LOG`,
/// then `debug`. An unparsable `CROC_LOG` is reported and ignored.
fn build_filter(directive: Option<String>) -> EnvFilter {
    if let Some(directive) = directive {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!(
                "invalid {LOG_ENV} directive '{directive}' ({err}); using {DEFAULT_DIRECTIVE}"
            ),
        }
        return EnvFilter::new(DEFAULT_DIRECTIVE);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Path stem of the rolling log file, `<prefix>.log` with the date appended by
/// the appender.
fn log_file_name(service_name: &str, config: &LoggingConfig) -> PathBuf {
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    PathBuf::from(format!("{prefix}.log"))
}

/// Install the global subscriber: filtered console output in the configured
/// format plus a daily JSON file under [`LoggingConfig::directory`]. A second
/// call leaves the first subscriber in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;

    let file_appender = daily(&config.directory, log_file_name(service_name, config));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = GUARDS.set((file_guard, stdout_guard));

    let console = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .compact()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_writer(file_writer)
        .boxed();

    let _ = tracing_subscriber::registry()
        .with(build_filter(std::env::var(LOG_ENV).ok()))
        .with(console)
        .with(file)
        .try_init();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn explicit_directive_wins() {
        let filter = build_filter(Some("warn".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn malformed_directive_falls_back_to_debug() {
        let filter = build_filter(Some("croc_power=verbose".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn file_prefix_overrides_service_name() {
        let mut config = LoggingConfig::default();
        assert_eq!(
            log_file_name("croc-powerd", &config),
            PathBuf::from("croc-powerd.log")
        );
        config.file_prefix = Some("bench".into());
        assert_eq!(log_file_name("croc-powerd", &config), PathBuf::from("bench.log"));
    }

    #[test]
    fn init_creates_directory_and_tolerates_repeat_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::Pretty,
            file_prefix: None,
        };
        init_tracing("test", &config).unwrap();
        init_tracing("test", &config).unwrap();
        assert!(config.directory.is_dir());
    }

    #[test]
    fn format_names_in_config() {
        let format: LogFormat = serde_json::from_str("\"structured-json\"").unwrap();
        assert_eq!(format, LogFormat::StructuredJson);
    }
}
