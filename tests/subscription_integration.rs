//! Callback registration and command readings through a transport.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tango_transport::client::{AttrQuality, DevValue};
use tango_transport::mock::{MockConnector, MockDevice};
use tango_transport::{Access, ConnectionState, ReadingCallback, Transport, TransportError};

const JUSTVALUE: &str = "test/device/1/justvalue";

fn setup(locator: &str) -> (Transport, Arc<MockDevice>) {
    let device = Arc::new(MockDevice::test_device());
    let connector = Arc::new(MockConnector::new().with_device(device.clone()));
    (Transport::new(None, locator, locator, connector), device)
}

fn recorder() -> (ReadingCallback, Arc<Mutex<Vec<DevValue>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ReadingCallback = Arc::new(move |_reading, value| sink.lock().push(value));
    (callback, seen)
}

async fn wait_for(seen: &Mutex<Vec<DevValue>>, count: usize) {
    for _ in 0..100 {
        if seen.lock().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_set_callback_twice_is_rejected() -> Result<()> {
    let (mut transport, device) = setup(JUSTVALUE);
    transport.connect().await?;

    let (first, seen) = recorder();
    transport.set_callback(Some(first))?;
    assert_eq!(device.subscription_count(), 1);

    let (second, _) = recorder();
    let err = transport.set_callback(Some(second)).unwrap_err();
    assert!(matches!(err, TransportError::AlreadySubscribed(_)));

    transport.put(3i64, true, None).await?;
    wait_for(&seen, 1).await;
    assert_eq!(*seen.lock(), vec![DevValue::Int(3)]);
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_then_resubscribe() -> Result<()> {
    let (mut transport, device) = setup(JUSTVALUE);
    transport.connect().await?;

    let (first, first_seen) = recorder();
    transport.set_callback(Some(first))?;
    transport.set_callback(None)?;
    assert_eq!(device.subscription_count(), 0);

    // Changes while unsubscribed reach nobody.
    device.set_value("justvalue", DevValue::Int(1));

    let (second, second_seen) = recorder();
    transport.set_callback(Some(second))?;
    device.set_value("justvalue", DevValue::Int(2));
    wait_for(&second_seen, 1).await;

    assert!(first_seen.lock().is_empty());
    assert_eq!(*second_seen.lock(), vec![DevValue::Int(2)]);
    transport.set_callback(None)?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_subscription_is_reported_once() -> Result<()> {
    let (mut transport, device) = setup(JUSTVALUE);
    transport.connect().await?;
    device.reject_subscriptions(true);

    let (callback, _) = recorder();
    let err = transport.set_callback(Some(callback)).unwrap_err();
    assert!(matches!(err, TransportError::SubscriptionRejected { .. }));
    assert!(err.to_string().contains("non-cached"));

    device.reject_subscriptions(false);
    let (callback, _) = recorder();
    transport.set_callback(Some(callback))?;
    assert_eq!(device.subscription_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_reading_carries_quality() -> Result<()> {
    let (mut transport, device) = setup(JUSTVALUE);
    transport.connect().await?;
    device.set_quality("justvalue", AttrQuality::Alarm);
    let reading = transport.get_reading().await?;
    assert_eq!(reading.alarm_severity, AttrQuality::Alarm);
    assert!(reading.timestamp > 0.0);
    Ok(())
}

#[tokio::test]
async fn test_command_reading_lifecycle() -> Result<()> {
    let (mut transport, _device) = setup("test/device/1/clear");
    transport.connect().await?;
    assert_eq!(transport.access()?, Access::Execute);

    let before = transport.get_reading().await?;
    assert!(before.value.is_void());

    transport.put(DevValue::Void, true, None).await?;
    let after = transport.get_reading().await?;
    assert_eq!(after.value, DevValue::from("Received clear command"));
    assert_eq!(after.alarm_severity, AttrQuality::Valid);
    Ok(())
}

#[tokio::test]
async fn test_command_rejects_callbacks() -> Result<()> {
    let (mut transport, _device) = setup("test/device/1/echo");
    transport.connect().await?;

    let (callback, _) = recorder();
    let err = transport.set_callback(Some(callback)).unwrap_err();
    assert!(matches!(err, TransportError::EventsUnsupported(_)));
    assert_eq!(err.to_string(), "test/device/1/echo does not support events");
    assert_eq!(transport.state(), ConnectionState::Connected);
    assert!(matches!(
        transport.set_callback(None),
        Err(TransportError::EventsUnsupported(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_set_callback_requires_connect() {
    let (transport, _device) = setup(JUSTVALUE);
    let (callback, _) = recorder();
    assert!(matches!(
        transport.set_callback(Some(callback)),
        Err(TransportError::NotConnected { .. })
    ));
}
