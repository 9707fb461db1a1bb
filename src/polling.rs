//! Polling fallback for endpoints that cannot (or may not) push events.
//!
//! A [`PollingConfig`] describes the periodic re-read; [`ChangeFilter`]
//! decides which polled values are delivered to the registered callback.

use crate::client::DevValue;
use crate::config::PollingSettings;
use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default period between two polls.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Periodic re-read configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Whether a poll task runs while a callback is registered
    pub enabled: bool,
    /// Time between two reads
    pub period: Duration,
    /// Deliver when the value moved by at least this much
    pub abs_change: Option<f64>,
    /// Deliver when the value moved by at least this fraction of the old value
    pub rel_change: Option<f64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: DEFAULT_POLL_PERIOD,
            abs_change: None,
            rel_change: None,
        }
    }
}

impl PollingConfig {
    /// Enabled polling at `period`, delivering every read.
    pub fn every(period: Duration) -> Self {
        Self {
            enabled: true,
            period,
            ..Self::default()
        }
    }

    /// Set the absolute-change threshold.
    pub fn with_abs_change(mut self, abs_change: f64) -> Self {
        self.abs_change = Some(abs_change);
        self
    }

    /// Set the relative-change threshold.
    pub fn with_rel_change(mut self, rel_change: f64) -> Self {
        self.rel_change = Some(rel_change);
        self
    }

    /// True when either threshold is set.
    pub fn is_filtered(&self) -> bool {
        self.abs_change.is_some() || self.rel_change.is_some()
    }

    /// Reject a zero period and thresholds that are negative or not finite.
    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(TransportError::Configuration(
                "polling period must be greater than 0".to_string(),
            ));
        }
        for (name, threshold) in [("abs_change", self.abs_change), ("rel_change", self.rel_change)] {
            if let Some(value) = threshold {
                if !value.is_finite() || value < 0.0 {
                    return Err(TransportError::Configuration(format!(
                        "Invalid polling {} {}. Must be a finite, non-negative number",
                        name, value
                    )));
                }
            }
        }
        Ok(())
    }
}

impl From<&PollingSettings> for PollingConfig {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            enabled: settings.enabled,
            period: Duration::from_millis(settings.period_ms),
            abs_change: settings.abs_change,
            rel_change: settings.rel_change,
        }
    }
}

/// Decides whether a polled value is worth delivering.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    abs_change: Option<f64>,
    rel_change: Option<f64>,
    last: Option<DevValue>,
}

impl ChangeFilter {
    /// Filter using the thresholds of `config`.
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            abs_change: config.abs_change,
            rel_change: config.rel_change,
            last: None,
        }
    }

    /// Record `value` and report whether it should be delivered.
    ///
    /// The first value always passes. Without thresholds every value passes.
    pub fn accept(&mut self, value: &DevValue) -> bool {
        let deliver = match &self.last {
            None => true,
            Some(_) if self.abs_change.is_none() && self.rel_change.is_none() => true,
            Some(old) => self.changed(old, value),
        };
        if deliver {
            self.last = Some(value.clone());
        }
        deliver
    }

    fn changed(&self, old: &DevValue, new: &DevValue) -> bool {
        match (old, new) {
            (DevValue::Array(a), DevValue::Array(b)) => {
                a.len() != b.len() || a.iter().zip(b).any(|(x, y)| self.changed(x, y))
            }
            _ => match (old.as_f64(), new.as_f64()) {
                (Some(x), Some(y)) => self.numeric_changed(x, y),
                _ => old != new,
            },
        }
    }

    fn numeric_changed(&self, old: f64, new: f64) -> bool {
        let diff = (new - old).abs();
        if diff == 0.0 {
            return false;
        }
        let abs_hit = self.abs_change.is_some_and(|abs| diff >= abs);
        let rel_hit = self.rel_change.is_some_and(|rel| diff >= rel * old.abs());
        abs_hit || rel_hit
    }
}
