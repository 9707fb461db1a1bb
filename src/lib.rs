//! Client-side transport for control-system devices.
//!
//! This library turns a locator string such as `sys/motor/1/position` into a
//! typed, subscribable signal backend. It resolves the locator against the
//! remote device, infers a descriptor from the server metadata, and routes
//! reads, writes and change notifications through an endpoint proxy.
//!
//! ## Layers
//!
//! - [`client`]: the boundary to the device client library (traits and wire types)
//! - [`type_mapper`]: remote type tags to generic kinds
//! - [`descriptor`]: signal descriptors and expected-type checking
//! - [`resolver`]: locator to attribute or command proxy
//! - [`proxy`]: attribute and command endpoint proxies
//! - [`transport`]: the connection state machine the signal layer talks to
//!
//! Ambient modules: [`config`] (figment settings), [`logging`] (tracing
//! subscriber setup), [`executor`] (shared background runtime) and [`mock`]
//! (in-memory devices for tests and demos).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tango_transport::mock::{MockConnector, MockDevice};
//! use tango_transport::Transport;
//!
//! # async fn run() -> tango_transport::Result<()> {
//! let connector = Arc::new(MockConnector::new().with_device(MockDevice::test_device()));
//! let mut transport = Transport::for_type::<i64>(
//!     "test/device/1/justvalue",
//!     "test/device/1/justvalue",
//!     connector,
//! );
//! transport.connect().await?;
//! transport.put_as(7i64, true, None).await?;
//! assert_eq!(transport.get_value_as::<i64>().await?, 7);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod datatype;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod logging;
pub mod mock;
pub mod polling;
pub mod proxy;
pub mod resolver;
pub mod transport;
pub mod type_mapper;

pub use client::{DevState, DevValue, DeviceConnector, DeviceProxy};
pub use config::TransportSettings;
pub use datatype::SignalDatatype;
pub use descriptor::{build_descriptor, Descriptor, EndpointConfig, ExpectedType};
pub use error::{Result, TransportError};
pub use polling::PollingConfig;
pub use proxy::{AttributeProxy, CommandProxy, EndpointProxy, Reading, ReadingCallback};
pub use resolver::resolve;
pub use transport::{Access, ConnectionState, Transport};
pub use type_mapper::{map_type, Dtype, TypeInfo};
