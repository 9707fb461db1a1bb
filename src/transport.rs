//! Signal transport over one or two remote endpoints.
//!
//! A [`Transport`] binds a read locator and a write locator (often the
//! same) to endpoint proxies, and exposes one typed read/write/subscribe
//! surface to the signal layer above.
//!
//! ## Connection state machine
//!
//! ```text
//! Unconnected -> Connecting -> Connected
//!                          \-> Failed
//! ```
//!
//! `connect()` may be called again from any state; there is no automatic
//! reconnect. Every other operation requires `Connected`. A connect future
//! dropped before it completes leaves the transport `Failed`.
//!
//! ## Routing
//!
//! - `put`, `get_value`, `get_written_value`: write side
//! - `get_reading`, `set_callback`, polling: read side
//!
//! `get_value` reads the write-side endpoint: it answers
//! "what is the commanded value", and differs from the read side only when
//! the two locators differ.

use crate::client::{AttrWriteType, DevValue, DeviceConnector, DeviceProxy};
use crate::config::TransportSettings;
use crate::datatype::SignalDatatype;
use crate::descriptor::{build_descriptor, Descriptor, EndpointConfig, ExpectedType};
use crate::error::{Result, TransportError};
use crate::executor::ensure_executor;
use crate::polling::PollingConfig;
use crate::proxy::{EndpointProxy, Reading, ReadingCallback};
use crate::resolver::resolve;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// `connect()` never called
    Unconnected,
    /// `connect()` in progress
    Connecting,
    /// Proxies resolved and descriptor cached
    Connected,
    /// Last `connect()` failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Access mode inferred from the endpoint metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// Read-only
    #[serde(rename = "R")]
    Read,
    /// Write-only
    #[serde(rename = "W")]
    Write,
    /// Readable and writable
    #[serde(rename = "RW")]
    ReadWrite,
    /// Executable (command)
    #[serde(rename = "X")]
    Execute,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Access::Read => "R",
            Access::Write => "W",
            Access::ReadWrite => "RW",
            Access::Execute => "X",
        };
        f.write_str(label)
    }
}

type Connected = (String, Arc<dyn EndpointProxy>, EndpointConfig);
type Prepared = (
    HashMap<String, Arc<dyn EndpointProxy>>,
    Vec<(String, EndpointConfig)>,
    Descriptor,
);

/// Holds the state at `Connecting` for one attempt; dropping it unfinished
/// marks the transport `Failed`.
struct ConnectAttempt<'a> {
    state: &'a Mutex<ConnectionState>,
    finished: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn start(state: &'a Mutex<ConnectionState>) -> Self {
        *state.lock() = ConnectionState::Connecting;
        Self { state, finished: false }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state.lock() = ConnectionState::Failed;
        }
    }
}

/// Uniform read/write/subscribe surface over remote endpoints.
pub struct Transport {
    expected: Option<ExpectedType>,
    read_locator: String,
    write_locator: String,
    connector: Arc<dyn DeviceConnector>,
    device: Option<Arc<dyn DeviceProxy>>,
    settings: TransportSettings,
    polling: PollingConfig,
    allow_events: bool,
    cancel: CancellationToken,
    state: Mutex<ConnectionState>,
    proxies: HashMap<String, Arc<dyn EndpointProxy>>,
    configs: Vec<(String, EndpointConfig)>,
    descriptor: Option<Descriptor>,
}

impl Transport {
    /// Transport reading `read_locator` and writing `write_locator`.
    ///
    /// `expected` is checked against the server metadata on connect.
    pub fn new(
        expected: Option<ExpectedType>,
        read_locator: impl Into<String>,
        write_locator: impl Into<String>,
        connector: Arc<dyn DeviceConnector>,
    ) -> Self {
        let settings = TransportSettings::default();
        Self {
            expected,
            read_locator: read_locator.into(),
            write_locator: write_locator.into(),
            connector,
            device: None,
            polling: PollingConfig::from(&settings.polling),
            allow_events: settings.allow_events,
            settings,
            cancel: CancellationToken::new(),
            state: Mutex::new(ConnectionState::Unconnected),
            proxies: HashMap::new(),
            configs: Vec::new(),
            descriptor: None,
        }
    }

    /// Transport whose expected type is derived from `T`.
    pub fn for_type<T: SignalDatatype>(
        read_locator: impl Into<String>,
        write_locator: impl Into<String>,
        connector: Arc<dyn DeviceConnector>,
    ) -> Self {
        Self::new(Some(T::expected_type()), read_locator, write_locator, connector)
    }

    /// Reuse an existing device connection instead of connecting by path.
    pub fn with_device(mut self, device: Arc<dyn DeviceProxy>) -> Self {
        self.device = Some(device);
        self
    }

    /// Apply loaded settings (timeouts, initial polling, events).
    pub fn with_settings(mut self, settings: TransportSettings) -> Self {
        self.polling = PollingConfig::from(&settings.polling);
        self.allow_events = settings.allow_events;
        self.settings = settings;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The read locator.
    pub fn source(&self) -> &str {
        &self.read_locator
    }

    /// The write locator.
    pub fn write_locator(&self) -> &str {
        &self.write_locator
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Token that aborts an in-flight `connect()` when cancelled.
    ///
    /// A cancelled connect replaces the token; fetch a new handle for the
    /// next attempt.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Metadata fetched on connect, read side first.
    pub fn configs(&self) -> &[(String, EndpointConfig)] {
        &self.configs
    }

    /// Current polling configuration.
    pub fn polling(&self) -> PollingConfig {
        self.polling
    }

    /// Whether push events may be used.
    pub fn events_allowed(&self) -> bool {
        self.allow_events
    }

    /// True when readings can be cached from pushed events.
    pub fn is_cachable(&self) -> bool {
        self.allow_events
            && self
                .proxies
                .get(&self.read_locator)
                .is_some_and(|proxy| proxy.support_events())
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Resolve both locators, fetch their metadata and build the descriptor.
    ///
    /// Distinct locators connect concurrently and fail as a whole. Client
    /// failures, cancellation and an elapsed connect timeout are reported as
    /// [`TransportError::NotConnected`] for the read locator; resolution and
    /// typing errors are returned as they are.
    pub async fn connect(&mut self) -> Result<()> {
        debug!(source = %self.read_locator, "Connecting transport");

        let outcome = {
            let attempt = ConnectAttempt::start(&self.state);
            let outcome = self.prepare().await;
            attempt.finish();
            outcome
        };
        let (proxies, configs, descriptor) = match outcome {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail(e)),
        };

        info!(
            source = %self.read_locator,
            dtype = %descriptor.dtype,
            shape = ?descriptor.shape,
            "Transport connected"
        );
        self.proxies = proxies;
        self.configs = configs;
        self.descriptor = Some(descriptor);
        *self.state.get_mut() = ConnectionState::Connected;
        Ok(())
    }

    async fn prepare(&self) -> Result<Prepared> {
        let endpoints = self.establish().await?;

        let configs: Vec<(String, EndpointConfig)> = endpoints
            .iter()
            .map(|(locator, _, config)| (locator.clone(), config.clone()))
            .collect();
        let descriptor = build_descriptor(self.expected.as_ref(), &self.read_locator, &configs)?;

        let proxies: HashMap<String, Arc<dyn EndpointProxy>> = endpoints
            .into_iter()
            .map(|(locator, proxy, _)| (locator, proxy))
            .collect();
        if let Some(read) = proxies.get(&self.read_locator) {
            read.allow_events(self.allow_events);
            read.set_polling(self.polling)?;
        }
        Ok((proxies, configs, descriptor))
    }

    fn fail(&mut self, err: TransportError) -> TransportError {
        warn!(source = %self.read_locator, error = %err, "Transport failed to connect");
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        *self.state.get_mut() = ConnectionState::Failed;
        err
    }

    async fn establish(&self) -> Result<Vec<Connected>> {
        ensure_executor()?;

        let mut locators = vec![self.read_locator.as_str()];
        if self.write_locator != self.read_locator {
            locators.push(self.write_locator.as_str());
        }
        let work = try_join_all(locators.into_iter().map(|locator| self.connect_endpoint(locator)));

        let bounded = async {
            match self.settings.connect_timeout() {
                Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
                    Err(TransportError::not_connected(
                        &self.read_locator,
                        format!("connect timed out after {:?}", limit),
                    ))
                }),
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::not_connected(
                &self.read_locator,
                "connect cancelled",
            )),
            result = bounded => result,
        }
    }

    async fn connect_endpoint(&self, locator: &str) -> Result<Connected> {
        let reply_interval = self.settings.reply_poll_interval();
        let proxy = resolve(locator, self.device.clone(), self.connector.as_ref(), reply_interval)
            .await
            .map_err(|e| self.connect_error(e))?;
        let config = proxy.get_config().await.map_err(|e| self.connect_error(e))?;
        Ok((locator.to_string(), proxy, config))
    }

    fn connect_error(&self, err: TransportError) -> TransportError {
        match err {
            TransportError::Client { source, .. } => {
                TransportError::not_connected(&self.read_locator, source)
            }
            other => other,
        }
    }

    fn proxy(&self, locator: &str) -> Result<&Arc<dyn EndpointProxy>> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(TransportError::not_connected(
                &self.read_locator,
                format!("transport is {}", state),
            ));
        }
        self.proxies
            .get(locator)
            .ok_or_else(|| TransportError::not_connected(locator, "no proxy for locator"))
    }

    fn read_proxy(&self) -> Result<&Arc<dyn EndpointProxy>> {
        self.proxy(&self.read_locator)
    }

    fn write_proxy(&self) -> Result<&Arc<dyn EndpointProxy>> {
        self.proxy(&self.write_locator)
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Write (or invoke) on the write side.
    pub async fn put(
        &self,
        value: impl Into<DevValue>,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.write_proxy()?.put(value.into(), wait, timeout).await
    }

    /// [`Transport::put`] for a typed value.
    pub async fn put_as<T: SignalDatatype>(
        &self,
        value: T,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.write_proxy()?.put(value.into_value(), wait, timeout).await
    }

    /// Current value of the write-side endpoint.
    pub async fn get_value(&self) -> Result<DevValue> {
        self.write_proxy()?.get().await
    }

    /// [`Transport::get_value`] converted to `T`.
    pub async fn get_value_as<T: SignalDatatype>(&self) -> Result<T> {
        let value = self.get_value().await?;
        T::from_value(&value).ok_or_else(|| {
            TransportError::mismatch(
                &self.write_locator,
                format!("returned {:?}, expected {}", value, T::expected_type()),
            )
        })
    }

    /// Last value the server recorded as written.
    pub async fn get_written_value(&self) -> Result<DevValue> {
        self.write_proxy()?.get_written_value().await
    }

    /// Fresh reading from the read side.
    pub async fn get_reading(&self) -> Result<Reading> {
        self.read_proxy()?.get_reading().await
    }

    /// Descriptor built on connect.
    pub fn get_descriptor(&self) -> Result<Descriptor> {
        self.read_proxy()?;
        self.descriptor.clone().ok_or_else(|| {
            TransportError::not_connected(&self.read_locator, "descriptor not built")
        })
    }

    /// Access mode inferred from the fetched metadata.
    pub fn access(&self) -> Result<Access> {
        self.read_proxy()?;
        let config = |locator: &str| {
            self.configs
                .iter()
                .find(|(l, _)| l == locator)
                .map(|(_, config)| config)
                .ok_or_else(|| TransportError::not_connected(locator, "no config for locator"))
        };

        match (config(&self.read_locator)?, config(&self.write_locator)?) {
            (EndpointConfig::Command(_), _) | (_, EndpointConfig::Command(_)) => Ok(Access::Execute),
            (EndpointConfig::Attribute(read), EndpointConfig::Attribute(write)) => {
                let readable = read.writable != AttrWriteType::Write;
                let writable = write.writable != AttrWriteType::Read;
                Ok(match (readable, writable) {
                    (true, true) => Access::ReadWrite,
                    (false, true) => Access::Write,
                    _ => Access::Read,
                })
            }
        }
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Register (`Some`) or clear (`None`) the reading callback.
    ///
    /// Callers must serialize calls on one transport: the already-subscribed
    /// check and the registration are not atomic across tasks.
    pub fn set_callback(&self, callback: Option<ReadingCallback>) -> Result<()> {
        let proxy = self.read_proxy()?;
        if !proxy.support_events() {
            return Err(TransportError::EventsUnsupported(self.read_locator.clone()));
        }

        match callback {
            Some(callback) => {
                if proxy.has_subscription() || proxy.has_callback() {
                    return Err(TransportError::AlreadySubscribed(self.read_locator.clone()));
                }
                proxy.subscribe_callback(callback).map_err(|e| {
                    warn!(source = %self.read_locator, error = %e, "Subscription rejected");
                    TransportError::SubscriptionRejected {
                        locator: self.read_locator.clone(),
                        cause: e.to_string(),
                    }
                })
            }
            None => proxy.unsubscribe_callback(),
        }
    }

    /// Replace the polling configuration of the read side.
    ///
    /// Before connect the configuration is stored and applied on connect.
    /// A zero period or an invalid threshold is rejected with
    /// [`TransportError::Configuration`] and the current configuration kept.
    pub fn set_polling(&mut self, config: PollingConfig) -> Result<()> {
        config.validate()?;
        if let Some(proxy) = self.proxies.get(&self.read_locator) {
            proxy.set_polling(config)?;
        }
        self.polling = config;
        Ok(())
    }

    /// Allow or forbid push events for subsequent `set_callback` calls.
    pub fn allow_events(&mut self, allow: bool) {
        self.allow_events = allow;
        if let Some(proxy) = self.proxies.get(&self.read_locator) {
            proxy.allow_events(allow);
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("read_locator", &self.read_locator)
            .field("write_locator", &self.write_locator)
            .field("state", &self.state())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
