//! Tracing Infrastructure
//!
//! Structured logging for the control server, built on `tracing` and
//! `tracing-subscriber`. Events carry fields such as `connection_id` and
//! `recording_id`; the output format is chosen in `[application] log_format`.
//! `RUST_LOG`, when set, takes precedence over `[application] log_level`.
//!
//! # Example
//! ```no_run
//! use stand_daq::{config::Settings, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! logging::init_from_settings(&settings)?;
//! tracing::info!("Control server starting");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored (development)
    Pretty,
    /// One line per event, no colors
    Compact,
    /// One JSON object per event (log shipping)
    Json,
}

impl FromStr for LogFormat {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(DaqError::Configuration(format!(
                "Invalid log format '{other}'. Must be one of: pretty, compact, json"
            ))),
        }
    }
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output layout
    pub format: LogFormat,
    /// Include source file and line in each event
    pub file_and_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_and_line: false,
        }
    }
}

impl LoggingConfig {
    /// Read level and format from the application settings.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let level = Level::from_str(&settings.application.log_level).map_err(|_| {
            DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                settings.application.log_level
            ))
        })?;
        Ok(Self {
            level,
            format: settings.application.log_format.parse()?,
            ..Default::default()
        })
    }
}

/// Install the global subscriber from application settings.
pub fn init_from_settings(settings: &Settings) -> AppResult<()> {
    init(LoggingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// A subscriber that is already installed (tests, embedders) is kept and this
/// returns `Ok(())`.
pub fn init(config: LoggingConfig) -> AppResult<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    let base = fmt::layer()
        .with_file(config.file_and_line)
        .with_line_number(config.file_and_line)
        .with_thread_names(true);
    let layer = match config.format {
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
        LogFormat::Json => base.json().with_filter(filter).boxed(),
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
    Ok(())
}
