//! Device-server client boundary
//!
//! The wire protocol of the control system lives in an external client
//! library. This module fixes the call surface the transport layer consumes
//! from that library, and the metadata/value types that cross it:
//!
//! - [`DeviceConnector`] - connect to a device by path
//! - [`DeviceProxy`] - member listing, attribute read/write (sync and
//!   async-with-reply), command invocation, metadata, change events
//! - [`CmdArgType`], [`AttrDataFormat`], [`AttrWriteType`] - remote type metadata
//! - [`DevValue`] - dynamically typed value as carried on the wire
//!
//! Implementations of the traits are provided by bindings to a real client
//! library, or by [`crate::mock::MockDevice`] for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Client errors
// =============================================================================

/// Errors raised by the client library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The reply to an asynchronous request is not available yet.
    #[error("Reply for asynchronous request {0} is not yet available")]
    NotReady(u64),

    /// The device server reported a failure.
    #[error("{reason}: {description}")]
    DevFailed {
        /// Short error reason (e.g. `API_AttrNotWritable`)
        reason: String,
        /// Human-readable description
        description: String,
    },

    /// The device could not be reached.
    #[error("Connection to '{device}' failed: {reason}")]
    ConnectionFailed {
        /// Device path
        device: String,
        /// Failure cause
        reason: String,
    },

    /// The operation was cancelled before completion.
    #[error("Operation cancelled")]
    Cancelled,

    /// The client library gave up waiting for the server.
    #[error("Operation timed out")]
    Timeout,
}

impl ClientError {
    /// Shorthand for a server-side failure.
    pub fn dev_failed(reason: impl Into<String>, description: impl Into<String>) -> Self {
        Self::DevFailed {
            reason: reason.into(),
            description: description.into(),
        }
    }
}

// =============================================================================
// Remote type metadata
// =============================================================================

/// Wire-level primitive type tag declared by the device server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CmdArgType {
    DevVoid = 0,
    DevBoolean = 1,
    DevShort = 2,
    DevLong = 3,
    DevFloat = 4,
    DevDouble = 5,
    DevUShort = 6,
    DevULong = 7,
    DevString = 8,
    DevVarCharArray = 9,
    DevVarShortArray = 10,
    DevVarLongArray = 11,
    DevVarFloatArray = 12,
    DevVarDoubleArray = 13,
    DevVarUShortArray = 14,
    DevVarULongArray = 15,
    DevVarStringArray = 16,
    DevVarLongStringArray = 17,
    DevVarDoubleStringArray = 18,
    DevState = 19,
    ConstDevString = 20,
    DevVarBooleanArray = 21,
    DevUChar = 22,
    DevLong64 = 23,
    DevULong64 = 24,
    DevVarLong64Array = 25,
    DevVarULong64Array = 26,
    DevInt = 27,
    DevEncoded = 28,
    DevEnum = 29,
    DevPipeBlob = 30,
    DevVarStateArray = 31,
}

impl CmdArgType {
    /// Every tag the server protocol defines, in wire order.
    pub const ALL: [CmdArgType; 32] = [
        CmdArgType::DevVoid,
        CmdArgType::DevBoolean,
        CmdArgType::DevShort,
        CmdArgType::DevLong,
        CmdArgType::DevFloat,
        CmdArgType::DevDouble,
        CmdArgType::DevUShort,
        CmdArgType::DevULong,
        CmdArgType::DevString,
        CmdArgType::DevVarCharArray,
        CmdArgType::DevVarShortArray,
        CmdArgType::DevVarLongArray,
        CmdArgType::DevVarFloatArray,
        CmdArgType::DevVarDoubleArray,
        CmdArgType::DevVarUShortArray,
        CmdArgType::DevVarULongArray,
        CmdArgType::DevVarStringArray,
        CmdArgType::DevVarLongStringArray,
        CmdArgType::DevVarDoubleStringArray,
        CmdArgType::DevState,
        CmdArgType::ConstDevString,
        CmdArgType::DevVarBooleanArray,
        CmdArgType::DevUChar,
        CmdArgType::DevLong64,
        CmdArgType::DevULong64,
        CmdArgType::DevVarLong64Array,
        CmdArgType::DevVarULong64Array,
        CmdArgType::DevInt,
        CmdArgType::DevEncoded,
        CmdArgType::DevEnum,
        CmdArgType::DevPipeBlob,
        CmdArgType::DevVarStateArray,
    ];
}

impl fmt::Display for CmdArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Dimensionality of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrDataFormat {
    /// Single value
    Scalar,
    /// 1-D array bounded by `max_dim_x`
    Spectrum,
    /// 2-D array bounded by `max_dim_y` rows of `max_dim_x` columns
    Image,
}

/// Access mode of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum AttrWriteType {
    Read,
    ReadWithWrite,
    Write,
    ReadWrite,
}

/// Quality flag attached to every attribute reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum AttrQuality {
    #[default]
    Valid,
    Invalid,
    Alarm,
    Changing,
    Warning,
}

/// Device state as reported by the `State` attribute/command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum DevState {
    On,
    Off,
    Close,
    Open,
    Insert,
    Extract,
    Moving,
    Standby,
    Fault,
    Init,
    Running,
    Alarm,
    Disable,
    Unknown,
}

impl DevState {
    /// All states in server enumeration order.
    pub const ALL: [DevState; 14] = [
        DevState::On,
        DevState::Off,
        DevState::Close,
        DevState::Open,
        DevState::Insert,
        DevState::Extract,
        DevState::Moving,
        DevState::Standby,
        DevState::Fault,
        DevState::Init,
        DevState::Running,
        DevState::Alarm,
        DevState::Disable,
        DevState::Unknown,
    ];

    /// Upper-case name used by the server.
    pub fn name(&self) -> &'static str {
        match self {
            DevState::On => "ON",
            DevState::Off => "OFF",
            DevState::Close => "CLOSE",
            DevState::Open => "OPEN",
            DevState::Insert => "INSERT",
            DevState::Extract => "EXTRACT",
            DevState::Moving => "MOVING",
            DevState::Standby => "STANDBY",
            DevState::Fault => "FAULT",
            DevState::Init => "INIT",
            DevState::Running => "RUNNING",
            DevState::Alarm => "ALARM",
            DevState::Disable => "DISABLE",
            DevState::Unknown => "UNKNOWN",
        }
    }

    /// The fixed, global list of state names.
    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|s| s.name().to_string()).collect()
    }

    /// Look a state up by its server name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for DevState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Attribute metadata returned by `get_attribute_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeInfo {
    /// Attribute name
    pub name: String,
    /// Access mode
    pub writable: AttrWriteType,
    /// Scalar, spectrum or image
    pub data_format: AttrDataFormat,
    /// Element type
    pub data_type: CmdArgType,
    /// Column bound (spectrum length, image width)
    pub max_dim_x: usize,
    /// Row bound (image height, 0 otherwise)
    pub max_dim_y: usize,
    /// Labels of an enumerated attribute, empty otherwise
    #[serde(default)]
    pub enum_labels: Vec<String>,
    /// Physical unit, if declared
    #[serde(default)]
    pub unit: Option<String>,
}

impl AttributeInfo {
    /// Scalar attribute with the given element type.
    pub fn scalar(name: impl Into<String>, data_type: CmdArgType, writable: AttrWriteType) -> Self {
        Self {
            name: name.into(),
            writable,
            data_format: AttrDataFormat::Scalar,
            data_type,
            max_dim_x: 1,
            max_dim_y: 0,
            enum_labels: Vec::new(),
            unit: None,
        }
    }

    /// 1-D attribute bounded by `max_x` elements.
    pub fn spectrum(
        name: impl Into<String>,
        data_type: CmdArgType,
        writable: AttrWriteType,
        max_x: usize,
    ) -> Self {
        Self {
            data_format: AttrDataFormat::Spectrum,
            max_dim_x: max_x,
            ..Self::scalar(name, data_type, writable)
        }
    }

    /// 2-D attribute of `max_y` rows by `max_x` columns.
    pub fn image(
        name: impl Into<String>,
        data_type: CmdArgType,
        writable: AttrWriteType,
        max_x: usize,
        max_y: usize,
    ) -> Self {
        Self {
            data_format: AttrDataFormat::Image,
            max_dim_x: max_x,
            max_dim_y: max_y,
            ..Self::scalar(name, data_type, writable)
        }
    }

    /// Attach enumeration labels.
    pub fn with_enum_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

/// Command metadata returned by `get_command_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Command name
    pub cmd_name: String,
    /// Argument type
    pub in_type: CmdArgType,
    /// Return type
    pub out_type: CmdArgType,
}

impl CommandInfo {
    /// Command metadata with the given argument/return types.
    pub fn new(name: impl Into<String>, in_type: CmdArgType, out_type: CmdArgType) -> Self {
        Self {
            cmd_name: name.into(),
            in_type,
            out_type,
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// A value as carried on the wire.
///
/// Arrays nest: a spectrum is `Array` of scalars, an image is `Array` of
/// row `Array`s.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevValue {
    /// No value (void commands, commands never invoked)
    #[default]
    Void,
    /// Boolean
    Bool(bool),
    /// Any integer width
    Int(i64),
    /// Any float width
    Float(f64),
    /// Text
    String(String),
    /// Device state
    State(DevState),
    /// Index into the attribute's enum labels
    Enum(i16),
    /// Encoded binary blob with its format string
    Encoded {
        /// Encoding format (e.g. `"jpeg"`)
        format: String,
        /// Raw bytes
        data: Vec<u8>,
    },
    /// Spectrum or image rows
    Array(Vec<DevValue>),
}

impl DevValue {
    /// True for [`DevValue::Void`].
    pub fn is_void(&self) -> bool {
        matches!(self, DevValue::Void)
    }

    /// Numeric view of a scalar; booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DevValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            DevValue::Int(i) => Some(*i as f64),
            DevValue::Float(x) => Some(*x),
            DevValue::Enum(i) => Some(f64::from(*i)),
            _ => None,
        }
    }

    /// Integer view of a scalar.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DevValue::Bool(b) => Some(i64::from(*b)),
            DevValue::Int(i) => Some(*i),
            DevValue::Enum(i) => Some(i64::from(*i)),
            _ => None,
        }
    }

    /// Elements of an array value.
    pub fn as_array(&self) -> Option<&[DevValue]> {
        match self {
            DevValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for DevValue {
    fn from(v: bool) -> Self {
        DevValue::Bool(v)
    }
}

impl From<i64> for DevValue {
    fn from(v: i64) -> Self {
        DevValue::Int(v)
    }
}

impl From<i32> for DevValue {
    fn from(v: i32) -> Self {
        DevValue::Int(i64::from(v))
    }
}

impl From<f64> for DevValue {
    fn from(v: f64) -> Self {
        DevValue::Float(v)
    }
}

impl From<&str> for DevValue {
    fn from(v: &str) -> Self {
        DevValue::String(v.to_string())
    }
}

impl From<String> for DevValue {
    fn from(v: String) -> Self {
        DevValue::String(v)
    }
}

impl From<DevState> for DevValue {
    fn from(v: DevState) -> Self {
        DevValue::State(v)
    }
}

impl<T: Into<DevValue>> From<Vec<T>> for DevValue {
    fn from(items: Vec<T>) -> Self {
        DevValue::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Result of reading an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAttribute {
    /// Attribute name
    pub name: String,
    /// Last read value
    pub value: DevValue,
    /// Last value recorded by the server as written (setpoint)
    pub w_value: DevValue,
    /// Server timestamp of the reading
    pub time: DateTime<Utc>,
    /// Quality flag
    pub quality: AttrQuality,
}

// =============================================================================
// Events
// =============================================================================

/// Kinds of server-pushed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Value changed beyond the server-side thresholds
    Change,
    /// Periodic push
    Periodic,
}

/// A pushed notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    /// Attribute the event belongs to
    pub attr_name: String,
    /// Event kind
    pub event: EventType,
    /// Set when the server could not produce a value
    pub err: bool,
    /// Error stack when `err` is set
    pub errors: Vec<String>,
    /// The pushed reading, absent for errored events
    pub attr_value: Option<DeviceAttribute>,
    /// Notification date
    pub date: DateTime<Utc>,
}

/// Identifier of a live event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

/// Identifier of an asynchronous request awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncRequestId(pub u64);

/// Callback invoked by the client library on its own notification thread.
pub type EventCallback = Arc<dyn Fn(EventData) + Send + Sync>;

// =============================================================================
// Client traits
// =============================================================================

/// Connection to one device on the control system.
#[async_trait]
pub trait DeviceProxy: Send + Sync {
    /// Device path (e.g. `"test/device/1"`)
    fn name(&self) -> &str;

    /// Names of the device's attributes.
    fn attribute_list(&self) -> Vec<String>;

    /// Names of the device's commands.
    fn command_list(&self) -> Vec<String>;

    /// Names of the device's pipes.
    fn pipe_list(&self) -> Vec<String>;

    /// Read an attribute.
    async fn read_attribute(&self, name: &str) -> Result<DeviceAttribute, ClientError>;

    /// Write an attribute and wait for the acknowledgement.
    async fn write_attribute(&self, name: &str, value: DevValue) -> Result<(), ClientError>;

    /// Issue a write without waiting for it.
    async fn write_attribute_asynch(
        &self,
        name: &str,
        value: DevValue,
    ) -> Result<AsyncRequestId, ClientError>;

    /// Check for the reply of an asynchronous write.
    ///
    /// Fails with [`ClientError::NotReady`] while the reply is outstanding.
    async fn write_attribute_reply(&self, id: AsyncRequestId) -> Result<(), ClientError>;

    /// Invoke a command and wait for its result.
    async fn command_inout(&self, name: &str, arg: DevValue) -> Result<DevValue, ClientError>;

    /// Invoke a command without waiting for it.
    async fn command_inout_asynch(
        &self,
        name: &str,
        arg: DevValue,
    ) -> Result<AsyncRequestId, ClientError>;

    /// Check for the result of an asynchronous command.
    ///
    /// Fails with [`ClientError::NotReady`] while the reply is outstanding.
    async fn command_inout_reply(&self, id: AsyncRequestId) -> Result<DevValue, ClientError>;

    /// Fetch attribute metadata.
    async fn get_attribute_config(&self, name: &str) -> Result<AttributeInfo, ClientError>;

    /// Fetch command metadata.
    async fn get_command_config(&self, name: &str) -> Result<CommandInfo, ClientError>;

    /// Open a push subscription. `callback` runs on the library's notification thread.
    fn subscribe_event(
        &self,
        name: &str,
        event: EventType,
        callback: EventCallback,
    ) -> Result<EventId, ClientError>;

    /// Release a push subscription.
    fn unsubscribe_event(&self, id: EventId) -> Result<(), ClientError>;
}

/// Creates device connections by path.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Connect to the device at `device_path`.
    async fn connect(&self, device_path: &str) -> Result<Arc<dyn DeviceProxy>, ClientError>;
}
