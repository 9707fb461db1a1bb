//! Tracing initialisation.
//!
//! Library code only emits `tracing` events. Applications (and demos) call
//! [`init`] once to install a subscriber; the level comes from
//! [`TransportSettings::log_level`] unless `RUST_LOG` is set.
//!
//! # Example
//! ```no_run
//! use tango_transport::config::TransportSettings;
//! use tango_transport::logging::{self, LoggingConfig, OutputFormat};
//!
//! # fn main() -> tango_transport::Result<()> {
//! let settings = TransportSettings::default();
//! let config = LoggingConfig::from_settings(&settings)?.with_format(OutputFormat::Json);
//! logging::init(config)?;
//! # Ok(())
//! # }
//! ```

use crate::config::TransportSettings;
use crate::error::{Result, TransportError};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, coloured (development)
    Pretty,
    /// Single-line, no colours
    Compact,
    /// One JSON object per event (log aggregation)
    Json,
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Maximum level emitted when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include thread names (useful to spot executor threads)
    pub with_thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_thread_names: true,
        }
    }
}

impl LoggingConfig {
    /// Logging at `level` with default formatting.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Derive the level from loaded settings.
    pub fn from_settings(settings: &TransportSettings) -> Result<Self> {
        Ok(Self::new(parse_log_level(&settings.log_level)?))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable thread names
    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.with_thread_names = enabled;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (by an earlier call, a
/// test harness or the host application) this returns `Ok(())`.
pub fn init(config: LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
    };

    // Fails only when a global dispatcher already exists.
    let _ = tracing_subscriber::registry().with(layer).try_init();
    Ok(())
}

/// Parse a level name (`trace|debug|info|warn|error`, any case).
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(TransportError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}
