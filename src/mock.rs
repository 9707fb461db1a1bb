//! Mock Device Server
//!
//! In-memory implementations of [`DeviceProxy`] and [`DeviceConnector`] for
//! testing without a running control system.
//!
//! # Available Mocks
//!
//! - `MockDevice` - attributes (value + setpoint), commands backed by
//!   closures, pipes, change events fired on every write, asynchronous
//!   replies that become ready after a configurable number of checks
//! - `MockConnector` - device registry with optional connect latency and
//!   connect failure injection
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = MockConnector::new().with_device(MockDevice::test_device());
//! let mut transport = Transport::new(None, "test/device/1/justvalue", "test/device/1/justvalue", Arc::new(connector));
//! transport.connect().await?;
//! ```

use crate::client::{
    AsyncRequestId, AttrQuality, AttrWriteType, AttributeInfo, ClientError, CmdArgType, CommandInfo,
    DevState, DevValue, DeviceAttribute, DeviceConnector, DeviceProxy, EventCallback, EventData,
    EventId, EventType,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Closure implementing a mock command.
pub type CommandHandler = Arc<dyn Fn(DevValue) -> Result<DevValue, ClientError> + Send + Sync>;

// =============================================================================
// MockDevice - Simulated Device Server
// =============================================================================

struct MockAttribute {
    info: AttributeInfo,
    value: DevValue,
    w_value: DevValue,
    quality: AttrQuality,
}

impl MockAttribute {
    fn reading(&self) -> DeviceAttribute {
        DeviceAttribute {
            name: self.info.name.clone(),
            value: self.value.clone(),
            w_value: self.w_value.clone(),
            time: Utc::now(),
            quality: self.quality,
        }
    }
}

struct PendingReply {
    remaining: u32,
    result: Result<DevValue, ClientError>,
}

#[derive(Default)]
struct DeviceState {
    attributes: BTreeMap<String, MockAttribute>,
    commands: BTreeMap<String, (CommandInfo, CommandHandler)>,
    pipes: Vec<String>,
    subscriptions: HashMap<u64, (String, EventCallback)>,
    pending: HashMap<u64, PendingReply>,
    next_id: u64,
    reply_delay: u32,
    reject_subscriptions: bool,
}

impl DeviceState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn listeners(&self, attr: &str) -> Vec<EventCallback> {
        self.subscriptions
            .values()
            .filter(|(name, _)| name == attr)
            .map(|(_, cb)| cb.clone())
            .collect()
    }
}

fn attr_not_found(device: &str, name: &str) -> ClientError {
    ClientError::dev_failed(
        "API_AttrNotFound",
        format!("Attribute {} not found in {}", name, device),
    )
}

fn cmd_not_found(device: &str, name: &str) -> ClientError {
    ClientError::dev_failed(
        "API_CommandNotFound",
        format!("Command {} not found in {}", name, device),
    )
}

/// In-memory device server
///
/// Writes update both the read value and the setpoint and push a change
/// event to every subscriber of that attribute. [`MockDevice::set_value`]
/// simulates an external change of the read value only.
pub struct MockDevice {
    name: String,
    state: Mutex<DeviceState>,
}

impl MockDevice {
    /// Empty device at `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Device resembling the reference test server at `test/device/1`.
    ///
    /// Attributes: `justvalue` (long, rw), `limitedvalue` (double, rw),
    /// `array` (2x3 double image, rw), `spectrum` (16 doubles, read),
    /// `mode` (enum AUTO/MANUAL/OFF, rw), `State` (read).
    /// Commands: `clear` (void to string), `echo` (string to string).
    /// Pipe: `my_pipe`.
    pub fn test_device() -> Self {
        Self::new("test/device/1")
            .with_attribute(
                AttributeInfo::scalar("justvalue", CmdArgType::DevLong, AttrWriteType::ReadWrite),
                DevValue::Int(0),
            )
            .with_attribute(
                AttributeInfo::scalar("limitedvalue", CmdArgType::DevDouble, AttrWriteType::ReadWrite),
                DevValue::Float(0.0),
            )
            .with_attribute(
                AttributeInfo::image("array", CmdArgType::DevDouble, AttrWriteType::ReadWrite, 3, 2),
                DevValue::from(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]),
            )
            .with_attribute(
                AttributeInfo::spectrum("spectrum", CmdArgType::DevDouble, AttrWriteType::Read, 16),
                DevValue::from(vec![0.0; 16]),
            )
            .with_attribute(
                AttributeInfo::scalar("mode", CmdArgType::DevEnum, AttrWriteType::ReadWrite)
                    .with_enum_labels(["AUTO", "MANUAL", "OFF"]),
                DevValue::Enum(0),
            )
            .with_attribute(
                AttributeInfo::scalar("State", CmdArgType::DevState, AttrWriteType::Read),
                DevValue::State(DevState::On),
            )
            .with_command(
                CommandInfo::new("clear", CmdArgType::DevVoid, CmdArgType::DevString),
                |_| Ok(DevValue::from("Received clear command")),
            )
            .with_command(
                CommandInfo::new("echo", CmdArgType::DevString, CmdArgType::DevString),
                |arg| Ok(arg),
            )
            .with_pipe("my_pipe")
    }

    /// Add an attribute with its initial value (also the initial setpoint).
    pub fn with_attribute(self, info: AttributeInfo, initial: DevValue) -> Self {
        self.state.lock().attributes.insert(
            info.name.clone(),
            MockAttribute {
                info,
                w_value: initial.clone(),
                value: initial,
                quality: AttrQuality::Valid,
            },
        );
        self
    }

    /// Add a command backed by `handler`.
    pub fn with_command<F>(self, info: CommandInfo, handler: F) -> Self
    where
        F: Fn(DevValue) -> Result<DevValue, ClientError> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .commands
            .insert(info.cmd_name.clone(), (info, Arc::new(handler)));
        self
    }

    /// Add a pipe.
    pub fn with_pipe(self, name: impl Into<String>) -> Self {
        self.state.lock().pipes.push(name.into());
        self
    }

    /// Change the read value as if another client or the hardware did.
    ///
    /// Pushes a change event; the setpoint is left untouched.
    pub fn set_value(&self, attr: &str, value: DevValue) {
        let listeners = {
            let mut state = self.state.lock();
            let Some(entry) = state.attributes.get_mut(attr) else {
                return;
            };
            entry.value = value;
            let reading = entry.reading();
            state
                .listeners(attr)
                .into_iter()
                .map(|cb| (cb, reading.clone()))
                .collect::<Vec<_>>()
        };
        for (cb, reading) in listeners {
            cb(change_event(reading));
        }
    }

    /// Set the quality reported with subsequent readings.
    pub fn set_quality(&self, attr: &str, quality: AttrQuality) {
        if let Some(entry) = self.state.lock().attributes.get_mut(attr) {
            entry.quality = quality;
        }
    }

    /// Number of `NotReady` answers before an asynchronous reply is available.
    pub fn set_reply_delay(&self, checks: u32) {
        self.state.lock().reply_delay = checks;
    }

    /// Make `subscribe_event` fail.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.state.lock().reject_subscriptions = reject;
    }

    /// Push an errored event to the subscribers of `attr`.
    pub fn push_error_event(&self, attr: &str, reason: &str) {
        let listeners = self.state.lock().listeners(attr);
        for cb in listeners {
            cb(EventData {
                attr_name: attr.to_string(),
                event: EventType::Change,
                err: true,
                errors: vec![reason.to_string()],
                attr_value: None,
                date: Utc::now(),
            });
        }
    }

    /// Number of live event subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    fn write(&self, attr: &str, value: DevValue) -> Result<(), ClientError> {
        let listeners = {
            let mut state = self.state.lock();
            let entry = state
                .attributes
                .get_mut(attr)
                .ok_or_else(|| attr_not_found(&self.name, attr))?;
            if entry.info.writable == AttrWriteType::Read {
                return Err(ClientError::dev_failed(
                    "API_AttrNotWritable",
                    format!("Attribute {} is not writable", attr),
                ));
            }
            entry.value = value.clone();
            entry.w_value = value;
            let reading = entry.reading();
            state
                .listeners(attr)
                .into_iter()
                .map(|cb| (cb, reading.clone()))
                .collect::<Vec<_>>()
        };
        for (cb, reading) in listeners {
            cb(change_event(reading));
        }
        Ok(())
    }

    fn invoke(&self, cmd: &str, arg: DevValue) -> Result<DevValue, ClientError> {
        let handler = self
            .state
            .lock()
            .commands
            .get(cmd)
            .map(|(_, handler)| handler.clone())
            .ok_or_else(|| cmd_not_found(&self.name, cmd))?;
        handler(arg)
    }

    fn queue_reply(&self, result: Result<DevValue, ClientError>) -> AsyncRequestId {
        let mut state = self.state.lock();
        let id = state.next_id();
        let remaining = state.reply_delay;
        state.pending.insert(id, PendingReply { remaining, result });
        AsyncRequestId(id)
    }

    fn take_reply(&self, id: AsyncRequestId) -> Result<DevValue, ClientError> {
        let mut state = self.state.lock();
        let pending = state.pending.get_mut(&id.0).ok_or_else(|| {
            ClientError::dev_failed("API_BadAsynPollId", format!("Unknown request {}", id.0))
        })?;
        if pending.remaining > 0 {
            pending.remaining -= 1;
            return Err(ClientError::NotReady(id.0));
        }
        state
            .pending
            .remove(&id.0)
            .map(|p| p.result)
            .unwrap_or(Err(ClientError::Cancelled))
    }
}

fn change_event(reading: DeviceAttribute) -> EventData {
    EventData {
        attr_name: reading.name.clone(),
        event: EventType::Change,
        err: false,
        errors: Vec::new(),
        date: reading.time,
        attr_value: Some(reading),
    }
}

#[async_trait]
impl DeviceProxy for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn attribute_list(&self) -> Vec<String> {
        self.state.lock().attributes.keys().cloned().collect()
    }

    fn command_list(&self) -> Vec<String> {
        self.state.lock().commands.keys().cloned().collect()
    }

    fn pipe_list(&self) -> Vec<String> {
        self.state.lock().pipes.clone()
    }

    async fn read_attribute(&self, name: &str) -> Result<DeviceAttribute, ClientError> {
        self.state
            .lock()
            .attributes
            .get(name)
            .map(MockAttribute::reading)
            .ok_or_else(|| attr_not_found(&self.name, name))
    }

    async fn write_attribute(&self, name: &str, value: DevValue) -> Result<(), ClientError> {
        self.write(name, value)
    }

    async fn write_attribute_asynch(
        &self,
        name: &str,
        value: DevValue,
    ) -> Result<AsyncRequestId, ClientError> {
        let result = self.write(name, value).map(|_| DevValue::Void);
        Ok(self.queue_reply(result))
    }

    async fn write_attribute_reply(&self, id: AsyncRequestId) -> Result<(), ClientError> {
        self.take_reply(id).map(|_| ())
    }

    async fn command_inout(&self, name: &str, arg: DevValue) -> Result<DevValue, ClientError> {
        self.invoke(name, arg)
    }

    async fn command_inout_asynch(
        &self,
        name: &str,
        arg: DevValue,
    ) -> Result<AsyncRequestId, ClientError> {
        let result = self.invoke(name, arg);
        Ok(self.queue_reply(result))
    }

    async fn command_inout_reply(&self, id: AsyncRequestId) -> Result<DevValue, ClientError> {
        self.take_reply(id)
    }

    async fn get_attribute_config(&self, name: &str) -> Result<AttributeInfo, ClientError> {
        self.state
            .lock()
            .attributes
            .get(name)
            .map(|a| a.info.clone())
            .ok_or_else(|| attr_not_found(&self.name, name))
    }

    async fn get_command_config(&self, name: &str) -> Result<CommandInfo, ClientError> {
        self.state
            .lock()
            .commands
            .get(name)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| cmd_not_found(&self.name, name))
    }

    fn subscribe_event(
        &self,
        name: &str,
        _event: EventType,
        callback: EventCallback,
    ) -> Result<EventId, ClientError> {
        let mut state = self.state.lock();
        if state.reject_subscriptions {
            return Err(ClientError::dev_failed(
                "API_EventPropertiesNotSet",
                format!("Event properties (abs_change or rel_change) for attribute {} are not set", name),
            ));
        }
        if !state.attributes.contains_key(name) {
            return Err(attr_not_found(&self.name, name));
        }
        let id = state.next_id();
        state.subscriptions.insert(id, (name.to_string(), callback));
        Ok(EventId(id))
    }

    fn unsubscribe_event(&self, id: EventId) -> Result<(), ClientError> {
        self.state
            .lock()
            .subscriptions
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| {
                ClientError::dev_failed("API_EventNotFound", format!("Unknown event id {}", id.0))
            })
    }
}

// =============================================================================
// MockConnector - Device Registry
// =============================================================================

/// Registry of mock devices keyed by path
#[derive(Default)]
pub struct MockConnector {
    devices: Mutex<HashMap<String, Arc<MockDevice>>>,
    connect_delay: Option<Duration>,
    fail_with: Option<String>,
    connects: AtomicUsize,
}

impl MockConnector {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under its own name.
    pub fn with_device(self, device: impl Into<Arc<MockDevice>>) -> Self {
        let device = device.into();
        self.devices.lock().insert(device.name.clone(), device);
        self
    }

    /// Delay every connect by `delay`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Fail every connect with `reason`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }

    /// Registered device at `path`.
    pub fn device(&self, path: &str) -> Option<Arc<MockDevice>> {
        self.devices.lock().get(path).cloned()
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn connect(&self, device_path: &str) -> Result<Arc<dyn DeviceProxy>, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            sleep(delay).await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(ClientError::ConnectionFailed {
                device: device_path.to_string(),
                reason: reason.clone(),
            });
        }
        let device = self.device(device_path).ok_or_else(|| ClientError::ConnectionFailed {
            device: device_path.to_string(),
            reason: "device not defined in the database".to_string(),
        })?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_updates_value_and_setpoint() {
        let device = MockDevice::test_device();
        device
            .write_attribute("justvalue", DevValue::Int(4))
            .await
            .unwrap();
        device.set_value("justvalue", DevValue::Int(9));

        let attr = device.read_attribute("justvalue").await.unwrap();
        assert_eq!(attr.value, DevValue::Int(9));
        assert_eq!(attr.w_value, DevValue::Int(4));
    }

    #[tokio::test]
    async fn test_read_only_attribute_rejects_write() {
        let device = MockDevice::test_device();
        let err = device
            .write_attribute("State", DevValue::State(DevState::Off))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DevFailed { ref reason, .. } if reason == "API_AttrNotWritable"));
    }

    #[tokio::test]
    async fn test_async_reply_becomes_ready() {
        let device = MockDevice::test_device();
        device.set_reply_delay(2);
        let id = device
            .command_inout_asynch("echo", DevValue::from("hi"))
            .await
            .unwrap();
        assert_eq!(device.command_inout_reply(id).await, Err(ClientError::NotReady(id.0)));
        assert_eq!(device.command_inout_reply(id).await, Err(ClientError::NotReady(id.0)));
        assert_eq!(device.command_inout_reply(id).await, Ok(DevValue::from("hi")));
    }

    #[tokio::test]
    async fn test_events_fire_on_write() {
        let device = MockDevice::test_device();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = device
            .subscribe_event(
                "justvalue",
                EventType::Change,
                Arc::new(move |event: EventData| sink.lock().push(event)),
            )
            .unwrap();

        device.write_attribute("justvalue", DevValue::Int(1)).await.unwrap();
        device.unsubscribe_event(id).unwrap();
        device.write_attribute("justvalue", DevValue::Int(2)).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].attr_value.as_ref().map(|a| a.value.clone()),
            Some(DevValue::Int(1))
        );
    }

    #[tokio::test]
    async fn test_connector_registry() {
        let connector = MockConnector::new().with_device(MockDevice::test_device());
        assert!(connector.connect("test/device/1").await.is_ok());
        assert!(connector.connect("test/device/2").await.is_err());
        assert_eq!(connector.connect_count(), 2);

        let failing = MockConnector::new()
            .with_device(MockDevice::test_device())
            .failing("database unreachable");
        assert!(matches!(
            failing.connect("test/device/1").await,
            Err(ClientError::ConnectionFailed { .. })
        ));
    }
}
