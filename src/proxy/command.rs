//! Command endpoint proxy
//!
//! A command has no value of its own on the server: the only way to produce
//! one is to invoke it. The proxy caches the last invocation result and
//! serves it as the current value, the written value and the reading.

use super::reply::wait_for_reply;
use super::{EndpointProxy, Reading, ReadingCallback, REPLY_POLL_INTERVAL};
use crate::client::{AttrQuality, DevValue, DeviceProxy};
use crate::descriptor::EndpointConfig;
use crate::error::{Result, TransportError};
use crate::executor::ensure_executor;
use crate::polling::PollingConfig;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Proxy over one command of a remote device.
pub struct CommandProxy {
    device: Arc<dyn DeviceProxy>,
    name: String,
    locator: String,
    reply_interval: Duration,
    last_reading: Mutex<Reading>,
}

impl CommandProxy {
    /// Proxy for command `name` of `device`, addressed as `locator`.
    pub fn new(device: Arc<dyn DeviceProxy>, name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
            locator: locator.into(),
            reply_interval: REPLY_POLL_INTERVAL,
            last_reading: Mutex::new(Reading {
                value: DevValue::Void,
                timestamp: 0.0,
                alarm_severity: AttrQuality::Valid,
            }),
        }
    }

    /// Override the sleep between two asynchronous reply checks.
    pub fn with_reply_poll_interval(mut self, interval: Duration) -> Self {
        self.reply_interval = interval;
        self
    }

    /// Command name on the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn client_err(&self, e: crate::client::ClientError) -> TransportError {
        TransportError::client(&self.locator, e)
    }
}

#[async_trait]
impl EndpointProxy for CommandProxy {
    fn locator(&self) -> &str {
        &self.locator
    }

    async fn get(&self) -> Result<DevValue> {
        Ok(self.last_reading.lock().value.clone())
    }

    async fn get_written_value(&self) -> Result<DevValue> {
        self.get().await
    }

    async fn put(&self, value: DevValue, wait: bool, timeout: Option<Duration>) -> Result<()> {
        ensure_executor()?;
        let result = if wait {
            let call = self.device.command_inout(&self.name, value);
            let returned = match timeout {
                Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                    TransportError::Timeout {
                        locator: self.locator.clone(),
                        timeout: limit,
                    }
                })?,
                None => call.await,
            };
            returned.map_err(|e| self.client_err(e))?
        } else {
            let id = self
                .device
                .command_inout_asynch(&self.name, value)
                .await
                .map_err(|e| self.client_err(e))?;
            match timeout {
                Some(limit) => {
                    wait_for_reply(&self.locator, limit, self.reply_interval, || {
                        self.device.command_inout_reply(id)
                    })
                    .await?
                }
                None => DevValue::Void,
            }
        };

        debug!(locator = %self.locator, "Command completed");
        *self.last_reading.lock() = Reading::new(result, Utc::now(), AttrQuality::Valid);
        Ok(())
    }

    async fn get_config(&self) -> Result<EndpointConfig> {
        ensure_executor()?;
        let info = self
            .device
            .get_command_config(&self.name)
            .await
            .map_err(|e| self.client_err(e))?;
        Ok(EndpointConfig::Command(info))
    }

    async fn get_reading(&self) -> Result<Reading> {
        Ok(self.last_reading.lock().clone())
    }

    fn support_events(&self) -> bool {
        false
    }

    fn has_subscription(&self) -> bool {
        false
    }

    fn has_callback(&self) -> bool {
        false
    }

    fn subscribe_callback(&self, _callback: ReadingCallback) -> Result<()> {
        Err(TransportError::EventsUnsupported(self.locator.clone()))
    }

    fn unsubscribe_callback(&self) -> Result<()> {
        Ok(())
    }

    fn set_polling(&self, _config: PollingConfig) -> Result<()> {
        Ok(())
    }

    fn polling(&self) -> PollingConfig {
        PollingConfig::default()
    }

    fn allow_events(&self, _allow: bool) {}

    fn events_allowed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CmdArgType, CommandInfo};
    use crate::mock::MockDevice;

    fn device() -> Arc<MockDevice> {
        Arc::new(MockDevice::new("test/device/1").with_command(
            CommandInfo::new("echo", CmdArgType::DevString, CmdArgType::DevString),
            |arg| Ok(arg),
        ))
    }

    #[tokio::test]
    async fn test_reading_before_and_after_put() {
        let device = device();
        let proxy = CommandProxy::new(device.clone(), "echo", "test/device/1/echo");

        let before = proxy.get_reading().await.unwrap();
        assert!(before.value.is_void());
        assert_eq!(before.timestamp, 0.0);

        proxy.put(DevValue::from("hello"), true, None).await.unwrap();
        let after = proxy.get_reading().await.unwrap();
        assert_eq!(after.value, DevValue::from("hello"));
        assert_eq!(after.alarm_severity, AttrQuality::Valid);
        assert!(after.timestamp > 0.0);
        assert_eq!(proxy.get().await.unwrap(), DevValue::from("hello"));
    }

    #[tokio::test]
    async fn test_async_put_with_timeout_caches_reply() {
        let device = device();
        device.set_reply_delay(2);
        let proxy = CommandProxy::new(device.clone(), "echo", "test/device/1/echo");

        proxy
            .put(DevValue::from("later"), false, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(proxy.get().await.unwrap(), DevValue::from("later"));
    }

    #[tokio::test]
    async fn test_fire_and_forget_put_caches_void() {
        let device = device();
        let proxy = CommandProxy::new(device.clone(), "echo", "test/device/1/echo");
        proxy.put(DevValue::from("x"), true, None).await.unwrap();
        proxy.put(DevValue::from("y"), false, None).await.unwrap();
        assert!(proxy.get().await.unwrap().is_void());
    }

    #[tokio::test]
    async fn test_commands_do_not_subscribe() {
        let device = device();
        let proxy = CommandProxy::new(device, "echo", "test/device/1/echo");
        assert!(!proxy.support_events());
        let result = proxy.subscribe_callback(Arc::new(|_, _| {}));
        assert!(matches!(result, Err(TransportError::EventsUnsupported(_))));
        proxy.set_polling(PollingConfig::every(Duration::from_millis(5))).unwrap();
        assert!(!proxy.polling().enabled);
    }

    #[tokio::test]
    async fn test_config_is_command_metadata() {
        let device = device();
        let proxy = CommandProxy::new(device, "echo", "test/device/1/echo");
        match proxy.get_config().await.unwrap() {
            EndpointConfig::Command(info) => assert_eq!(info.in_type, CmdArgType::DevString),
            other => panic!("unexpected config {:?}", other),
        }
    }
}
