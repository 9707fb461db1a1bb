//! Uniform endpoint proxies
//!
//! An [`EndpointProxy`] wraps one member of a remote device behind a single
//! get/put/subscribe contract. Two implementations exist:
//!
//! - [`AttributeProxy`]: stateful attributes. Reads round-trip to the server,
//!   change events are pushed by the client library, polling is available as
//!   a fallback.
//! - [`CommandProxy`]: remote procedures. The last invocation result is
//!   cached and served as the current value; no events, no polling.
//!
//! Callers hold `Arc<dyn EndpointProxy>` and never branch on the variant.

pub mod attribute;
pub mod command;
mod reply;

pub use attribute::AttributeProxy;
pub use command::CommandProxy;

use crate::client::{AttrQuality, DevValue, DeviceAttribute};
use crate::descriptor::EndpointConfig;
use crate::error::Result;
use crate::polling::PollingConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default sleep between two checks for an asynchronous reply.
pub const REPLY_POLL_INTERVAL: Duration = Duration::from_micros(10);

/// A timestamped value with its quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// The value
    pub value: DevValue,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Quality reported by the server
    pub alarm_severity: AttrQuality,
}

impl Reading {
    /// Reading stamped with `time`.
    pub fn new(value: DevValue, time: DateTime<Utc>, alarm_severity: AttrQuality) -> Self {
        Self {
            value,
            timestamp: epoch_seconds(time),
            alarm_severity,
        }
    }

    /// Reading built from an attribute read or pushed event.
    pub fn from_attribute(attr: &DeviceAttribute) -> Self {
        Self::new(attr.value.clone(), attr.time, attr.quality)
    }
}

/// Seconds since the Unix epoch with microsecond resolution.
pub fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}

/// Callback receiving every delivered reading together with its value.
pub type ReadingCallback = Arc<dyn Fn(Reading, DevValue) + Send + Sync>;

/// Uniform contract over one remote attribute or command.
#[async_trait]
pub trait EndpointProxy: Send + Sync {
    /// Full locator (`<device-path>/<member>`)
    fn locator(&self) -> &str;

    /// Current value.
    async fn get(&self) -> Result<DevValue>;

    /// Last value the server recorded as written.
    async fn get_written_value(&self) -> Result<DevValue>;

    /// Write or invoke.
    ///
    /// With `wait` the call returns once the server acknowledged. Without it
    /// an asynchronous request is issued; if `timeout` is given the reply is
    /// polled until it arrives or the timeout elapses.
    async fn put(&self, value: DevValue, wait: bool, timeout: Option<Duration>) -> Result<()>;

    /// Fetch the endpoint metadata.
    async fn get_config(&self) -> Result<EndpointConfig>;

    /// Current value with timestamp and quality.
    async fn get_reading(&self) -> Result<Reading>;

    /// Whether the endpoint can push change events.
    fn support_events(&self) -> bool;

    /// True while an event subscription handle is held.
    fn has_subscription(&self) -> bool;

    /// True while a callback is registered (by event or polling).
    fn has_callback(&self) -> bool;

    /// Register `callback`, opening the event subscription if none is held.
    ///
    /// Re-registering replaces the stored callback and keeps the handle.
    fn subscribe_callback(&self, callback: ReadingCallback) -> Result<()>;

    /// Release the subscription handle (if any) and clear the callback.
    fn unsubscribe_callback(&self) -> Result<()>;

    /// Replace the polling configuration.
    ///
    /// An invalid configuration is rejected and the current one kept.
    fn set_polling(&self, config: PollingConfig) -> Result<()>;

    /// Current polling configuration.
    fn polling(&self) -> PollingConfig;

    /// Allow or forbid push events for subsequent subscriptions.
    fn allow_events(&self, allow: bool);

    /// Whether push events are currently allowed.
    fn events_allowed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_epoch_seconds() {
        let time = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        assert_eq!(epoch_seconds(time), 1_700_000_000.25);
    }

    #[test]
    fn test_reading_from_attribute() {
        let attr = DeviceAttribute {
            name: "justvalue".into(),
            value: DevValue::Int(5),
            w_value: DevValue::Int(4),
            time: Utc.timestamp_opt(10, 0).unwrap(),
            quality: AttrQuality::Alarm,
        };
        let reading = Reading::from_attribute(&attr);
        assert_eq!(reading.value, DevValue::Int(5));
        assert_eq!(reading.timestamp, 10.0);
        assert_eq!(reading.alarm_severity, AttrQuality::Alarm);
    }
}
