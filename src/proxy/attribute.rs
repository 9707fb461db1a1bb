//! Attribute endpoint proxy
//!
//! Reads always round-trip to the server. Subscriptions combine two
//! delivery paths feeding the same stored callback:
//!
//! - **Events**: the client library invokes a notification closure on its
//!   own thread; the closure only forwards into a channel, and a delivery
//!   task on the client executor calls the user callback in order.
//! - **Polling**: a periodic task re-reads the attribute and delivers values
//!   that pass the [`ChangeFilter`]. Runs when polling is enabled, or
//!   whenever push events are not allowed.
//!
//! Both tasks stop on [`EndpointProxy::unsubscribe_callback`]; the polling
//! task also stops when polling is disabled. Callbacks run under a
//! (reentrant) delivery gate that is also taken when a task is cancelled, so
//! once cancellation returns the callback is never invoked again by that
//! task.

use super::reply::wait_for_reply;
use super::{EndpointProxy, Reading, ReadingCallback, REPLY_POLL_INTERVAL};
use crate::client::{DevValue, DeviceProxy, EventCallback, EventData, EventId, EventType};
use crate::descriptor::EndpointConfig;
use crate::error::{Result, TransportError};
use crate::executor::{ensure_executor, ClientExecutor};
use crate::polling::{ChangeFilter, PollingConfig};
use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type CallbackSlot = Arc<Mutex<Option<ReadingCallback>>>;
type DeliveryGate = Arc<ReentrantMutex<()>>;

/// A background task with its cancellation token.
struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn stop(self, gate: &ReentrantMutex<()>) {
        let _gate = gate.lock();
        self.token.cancel();
        self.handle.abort();
    }
}

/// Shared between a proxy and its background tasks.
#[derive(Clone)]
struct Delivery {
    locator: String,
    callback: CallbackSlot,
    gate: DeliveryGate,
    token: CancellationToken,
}

impl Delivery {
    /// Invoke the current callback unless cancelled. Returns false once cancelled.
    fn deliver(&self, reading: Reading, value: DevValue) -> bool {
        let _gate = self.gate.lock();
        if self.token.is_cancelled() {
            return false;
        }
        let current = self.callback.lock().clone();
        if let Some(cb) = current {
            cb(reading, value);
        }
        true
    }
}

struct SubscriptionState {
    event_id: Option<EventId>,
    delivery: Option<Worker>,
    poller: Option<Worker>,
    polling: PollingConfig,
    allow_events: bool,
}

impl SubscriptionState {
    fn wants_polling(&self) -> bool {
        self.polling.enabled || !self.allow_events
    }
}

/// Proxy over one attribute of a remote device.
pub struct AttributeProxy {
    device: Arc<dyn DeviceProxy>,
    name: String,
    locator: String,
    reply_interval: Duration,
    callback: CallbackSlot,
    gate: DeliveryGate,
    state: Mutex<SubscriptionState>,
}

impl AttributeProxy {
    /// Proxy for attribute `name` of `device`, addressed as `locator`.
    pub fn new(device: Arc<dyn DeviceProxy>, name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
            locator: locator.into(),
            reply_interval: REPLY_POLL_INTERVAL,
            callback: Arc::new(Mutex::new(None)),
            gate: Arc::new(ReentrantMutex::new(())),
            state: Mutex::new(SubscriptionState {
                event_id: None,
                delivery: None,
                poller: None,
                polling: PollingConfig::default(),
                allow_events: true,
            }),
        }
    }

    /// Override the sleep between two asynchronous reply checks.
    pub fn with_reply_poll_interval(mut self, interval: Duration) -> Self {
        self.reply_interval = interval;
        self
    }

    /// Attribute name on the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the polling task runs.
    pub fn is_polling(&self) -> bool {
        self.state.lock().poller.is_some()
    }

    fn client_err(&self, e: crate::client::ClientError) -> TransportError {
        TransportError::client(&self.locator, e)
    }

    fn delivery(&self) -> Delivery {
        Delivery {
            locator: self.locator.clone(),
            callback: self.callback.clone(),
            gate: self.gate.clone(),
            token: CancellationToken::new(),
        }
    }

    fn stop_poller(&self, poller: Option<Worker>) {
        if let Some(poller) = poller {
            poller.stop(&self.gate);
            debug!(locator = %self.locator, "Stopped polling");
        }
    }

    fn open_event_subscription(
        &self,
        executor: &ClientExecutor,
        state: &mut SubscriptionState,
    ) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let notify: EventCallback = Arc::new(move |event: EventData| {
            // receiver gone means the subscription is being torn down
            let _ = tx.send(event);
        });

        let id = self
            .device
            .subscribe_event(&self.name, EventType::Change, notify)
            .map_err(|e| self.client_err(e))?;

        let delivery = self.delivery();
        let token = delivery.token.clone();
        let handle = executor.spawn(deliver_events(rx, delivery));
        state.event_id = Some(id);
        state.delivery = Some(Worker { token, handle });
        debug!(locator = %self.locator, event_id = id.0, "Opened change event subscription");
        Ok(())
    }

    fn start_polling(&self, executor: &ClientExecutor, state: &mut SubscriptionState) {
        let delivery = self.delivery();
        let token = delivery.token.clone();
        let handle = executor.spawn(poll_attribute(
            self.device.clone(),
            self.name.clone(),
            state.polling,
            delivery,
        ));
        state.poller = Some(Worker { token, handle });
        debug!(
            locator = %self.locator,
            period_ms = state.polling.period.as_millis() as u64,
            filtered = state.polling.is_filtered(),
            "Started polling"
        );
    }

    /// Stop both tasks and close the event subscription.
    ///
    /// Workers are stopped outside the state lock: a running callback may
    /// query the proxy while the gate is held.
    fn release(&self) -> Result<()> {
        let (poller, delivery, event_id) = {
            let mut state = self.state.lock();
            (state.poller.take(), state.delivery.take(), state.event_id.take())
        };
        self.stop_poller(poller);
        if let Some(delivery) = delivery {
            delivery.stop(&self.gate);
        }
        if let Some(id) = event_id {
            self.device
                .unsubscribe_event(id)
                .map_err(|e| self.client_err(e))?;
            debug!(locator = %self.locator, event_id = id.0, "Closed change event subscription");
        }
        Ok(())
    }
}

#[async_trait]
impl EndpointProxy for AttributeProxy {
    fn locator(&self) -> &str {
        &self.locator
    }

    async fn get(&self) -> Result<DevValue> {
        ensure_executor()?;
        let attr = self
            .device
            .read_attribute(&self.name)
            .await
            .map_err(|e| self.client_err(e))?;
        Ok(attr.value)
    }

    async fn get_written_value(&self) -> Result<DevValue> {
        ensure_executor()?;
        let attr = self
            .device
            .read_attribute(&self.name)
            .await
            .map_err(|e| self.client_err(e))?;
        Ok(attr.w_value)
    }

    async fn put(&self, value: DevValue, wait: bool, timeout: Option<Duration>) -> Result<()> {
        ensure_executor()?;
        if wait {
            let write = self.device.write_attribute(&self.name, value);
            let written = match timeout {
                Some(limit) => tokio::time::timeout(limit, write).await.map_err(|_| {
                    TransportError::Timeout {
                        locator: self.locator.clone(),
                        timeout: limit,
                    }
                })?,
                None => write.await,
            };
            written.map_err(|e| self.client_err(e))
        } else {
            let id = self
                .device
                .write_attribute_asynch(&self.name, value)
                .await
                .map_err(|e| self.client_err(e))?;
            if let Some(limit) = timeout {
                wait_for_reply(&self.locator, limit, self.reply_interval, || {
                    self.device.write_attribute_reply(id)
                })
                .await?;
            }
            Ok(())
        }
    }

    async fn get_config(&self) -> Result<EndpointConfig> {
        ensure_executor()?;
        let info = self
            .device
            .get_attribute_config(&self.name)
            .await
            .map_err(|e| self.client_err(e))?;
        Ok(EndpointConfig::Attribute(info))
    }

    async fn get_reading(&self) -> Result<Reading> {
        ensure_executor()?;
        let attr = self
            .device
            .read_attribute(&self.name)
            .await
            .map_err(|e| self.client_err(e))?;
        Ok(Reading::from_attribute(&attr))
    }

    fn support_events(&self) -> bool {
        true
    }

    fn has_subscription(&self) -> bool {
        self.state.lock().event_id.is_some()
    }

    fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    fn subscribe_callback(&self, callback: ReadingCallback) -> Result<()> {
        let executor = ensure_executor()?;
        let previous = self.callback.lock().replace(callback);

        let mut state = self.state.lock();
        if state.allow_events && state.event_id.is_none() {
            if let Err(e) = self.open_event_subscription(executor, &mut state) {
                *self.callback.lock() = previous;
                return Err(e);
            }
        }
        if state.wants_polling() && state.poller.is_none() {
            self.start_polling(executor, &mut state);
        }
        Ok(())
    }

    fn unsubscribe_callback(&self) -> Result<()> {
        self.callback.lock().take();
        self.release()
    }

    fn set_polling(&self, config: PollingConfig) -> Result<()> {
        config.validate()?;
        let poller = {
            let mut state = self.state.lock();
            state.polling = config;
            state.poller.take()
        };
        self.stop_poller(poller);

        let mut state = self.state.lock();
        if state.wants_polling() && state.poller.is_none() && self.has_callback() {
            match ensure_executor() {
                Ok(executor) => self.start_polling(executor, &mut state),
                Err(e) => warn!(locator = %self.locator, error = %e, "Cannot start polling"),
            }
        }
        Ok(())
    }

    fn polling(&self) -> PollingConfig {
        self.state.lock().polling
    }

    fn allow_events(&self, allow: bool) {
        self.state.lock().allow_events = allow;
    }

    fn events_allowed(&self) -> bool {
        self.state.lock().allow_events
    }
}

impl Drop for AttributeProxy {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(worker) = state.poller.take() {
            worker.stop(&self.gate);
        }
        if let Some(worker) = state.delivery.take() {
            worker.stop(&self.gate);
        }
        if let Some(id) = state.event_id.take() {
            if let Err(e) = self.device.unsubscribe_event(id) {
                warn!(locator = %self.locator, error = %e, "Failed to release subscription on drop");
            }
        }
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn deliver_events(mut events: mpsc::UnboundedReceiver<EventData>, delivery: Delivery) {
    loop {
        let event = tokio::select! {
            _ = delivery.token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if event.err {
            warn!(locator = %delivery.locator, errors = ?event.errors, "Dropping errored change event");
            continue;
        }
        let Some(attr) = event.attr_value else {
            continue;
        };

        let reading = Reading::new(attr.value.clone(), event.date, attr.quality);
        if !delivery.deliver(reading, attr.value) {
            break;
        }
    }
}

async fn poll_attribute(
    device: Arc<dyn DeviceProxy>,
    name: String,
    config: PollingConfig,
    delivery: Delivery,
) {
    let mut filter = ChangeFilter::new(&config);
    let mut interval = tokio::time::interval(config.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = delivery.token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let read = tokio::select! {
            _ = delivery.token.cancelled() => break,
            read = device.read_attribute(&name) => read,
        };

        match read {
            Ok(attr) => {
                if !filter.accept(&attr.value) {
                    continue;
                }
                let reading = Reading::from_attribute(&attr);
                if !delivery.deliver(reading, attr.value) {
                    break;
                }
            }
            Err(e) => warn!(locator = %delivery.locator, error = %e, "Poll read failed"),
        }
    }
}
