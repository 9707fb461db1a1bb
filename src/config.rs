//! Transport settings using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `TANGO_TRANSPORT_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! TANGO_TRANSPORT_LOG_LEVEL=debug
//! TANGO_TRANSPORT_CONNECT_TIMEOUT_MS=2000
//! TANGO_TRANSPORT_POLLING__PERIOD_MS=50
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tango_transport::config::TransportSettings;
//!
//! fn main() -> tango_transport::Result<()> {
//!     let settings = TransportSettings::load_from("config/transport.toml")?;
//!     println!("Log level: {}", settings.log_level);
//!     Ok(())
//! }
//! ```

use crate::error::{Result, TransportError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "TANGO_TRANSPORT_";

/// Top-level transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Upper bound on `connect()`, unbounded when absent
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// Sleep between two checks for an asynchronous reply
    #[serde(default = "default_reply_poll_interval")]
    pub reply_poll_interval_us: u64,
    /// Initial polling configuration applied on connect
    #[serde(default)]
    pub polling: PollingSettings,
    /// Whether push events may be used when the endpoint supports them
    #[serde(default = "default_allow_events")]
    pub allow_events: bool,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Polling fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Poll while a callback is registered
    #[serde(default)]
    pub enabled: bool,
    /// Poll period in milliseconds
    #[serde(default = "default_period")]
    pub period_ms: u64,
    /// Absolute change threshold
    #[serde(default)]
    pub abs_change: Option<f64>,
    /// Relative change threshold
    #[serde(default)]
    pub rel_change: Option<f64>,
}

fn default_reply_poll_interval() -> u64 {
    10
}

fn default_allow_events() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_period() -> u64 {
    100
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            period_ms: default_period(),
            abs_change: None,
            rel_change: None,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            reply_poll_interval_us: default_reply_poll_interval(),
            polling: PollingSettings::default(),
            allow_events: default_allow_events(),
            log_level: default_log_level(),
        }
    }
}

impl TransportSettings {
    /// Load settings from a TOML file with environment overrides.
    ///
    /// A missing file is not an error; defaults and the environment apply.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` if extraction fails and
    /// `TransportError::Configuration` if the values are invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::string(toml))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Reply poll interval and polling period are non-zero
    /// - Change thresholds are finite and non-negative
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(TransportError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.reply_poll_interval_us == 0 {
            return Err(TransportError::Configuration(
                "reply_poll_interval_us must be greater than 0".to_string(),
            ));
        }

        if self.polling.period_ms == 0 {
            return Err(TransportError::Configuration(
                "polling.period_ms must be greater than 0".to_string(),
            ));
        }

        for (name, threshold) in [
            ("abs_change", self.polling.abs_change),
            ("rel_change", self.polling.rel_change),
        ] {
            if let Some(value) = threshold {
                if !value.is_finite() || value < 0.0 {
                    return Err(TransportError::Configuration(format!(
                        "Invalid polling.{} {}. Must be a finite, non-negative number",
                        name, value
                    )));
                }
            }
        }

        Ok(())
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Async-reply poll interval as a duration.
    pub fn reply_poll_interval(&self) -> Duration {
        Duration::from_micros(self.reply_poll_interval_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let settings = TransportSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.reply_poll_interval(), Duration::from_micros(10));
        assert!(settings.allow_events);
        assert_eq!(settings.connect_timeout(), None);
    }

    #[test]
    fn test_from_toml_str() {
        let settings = TransportSettings::from_toml_str(
            r#"
            connect_timeout_ms = 1500
            log_level = "debug"

            [polling]
            enabled = true
            period_ms = 20
            abs_change = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(settings.connect_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(settings.log_level, "debug");
        assert!(settings.polling.enabled);
        assert_eq!(settings.polling.period_ms, 20);
        assert_eq!(settings.polling.abs_change, Some(0.5));
        assert_eq!(settings.reply_poll_interval_us, 10);
    }

    #[test]
    fn test_invalid_log_level() {
        let result = TransportSettings::from_toml_str("log_level = \"loud\"");
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut settings = TransportSettings::default();
        settings.polling.rel_change = Some(-1.0);
        assert!(matches!(
            settings.validate(),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = TransportSettings::from_toml_str("[polling]\nperiod_ms = 0");
        assert!(matches!(result, Err(TransportError::Configuration(_))));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = TransportSettings::from_toml_str("polling = 3");
        assert!(matches!(result, Err(TransportError::Config(_))));
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "transport.toml",
                r#"
                log_level = "warn"
                [polling]
                period_ms = 40
                "#,
            )?;
            jail.set_env("TANGO_TRANSPORT_LOG_LEVEL", "trace");
            jail.set_env("TANGO_TRANSPORT_POLLING__ENABLED", "true");

            let settings = TransportSettings::load_from("transport.toml")
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.log_level, "trace");
            assert!(settings.polling.enabled);
            assert_eq!(settings.polling.period_ms, 40);
            Ok(())
        });
    }

    #[test]
    fn test_load_from_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transport.toml");
        std::fs::write(&path, "allow_events = false\nreply_poll_interval_us = 50\n").unwrap();

        let settings = TransportSettings::load_from(&path).unwrap();
        assert!(!settings.allow_events);
        assert_eq!(settings.reply_poll_interval(), Duration::from_micros(50));
    }
}
