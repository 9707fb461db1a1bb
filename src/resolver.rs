//! Locator resolution.
//!
//! A locator `<device-path>/<member>` is split at its last `/`. The member
//! is looked up in the device's attribute list, then its command list, then
//! its pipe list; the first match wins. Names compare exactly, as listed by
//! the server.

use crate::client::{DeviceConnector, DeviceProxy};
use crate::error::{Result, TransportError};
use crate::proxy::{AttributeProxy, CommandProxy, EndpointProxy};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Split a locator into `(device_path, member)`.
pub fn split_locator(locator: &str) -> Result<(&str, &str)> {
    match locator.rsplit_once('/') {
        Some((device, member)) if !device.is_empty() && !member.is_empty() => Ok((device, member)),
        _ => Err(TransportError::InvalidLocator(locator.to_string())),
    }
}

/// Resolve `locator` into an endpoint proxy.
///
/// Uses `existing` when given, otherwise connects to the device through
/// `connector`. Fails with [`TransportError::NotFound`] for absent members
/// and [`TransportError::Unsupported`] for pipes.
pub async fn resolve(
    locator: &str,
    existing: Option<Arc<dyn DeviceProxy>>,
    connector: &dyn DeviceConnector,
    reply_interval: Duration,
) -> Result<Arc<dyn EndpointProxy>> {
    let (device_path, member) = split_locator(locator)?;

    let device = match existing {
        Some(device) => device,
        None => connector
            .connect(device_path)
            .await
            .map_err(|e| TransportError::client(locator, e))?,
    };

    if device.attribute_list().iter().any(|name| name == member) {
        debug!(locator, kind = "attribute", "Resolved locator");
        let proxy = AttributeProxy::new(device, member, locator).with_reply_poll_interval(reply_interval);
        return Ok(Arc::new(proxy));
    }
    if device.command_list().iter().any(|name| name == member) {
        debug!(locator, kind = "command", "Resolved locator");
        let proxy = CommandProxy::new(device, member, locator).with_reply_poll_interval(reply_interval);
        return Ok(Arc::new(proxy));
    }
    if device.pipe_list().iter().any(|name| name == member) {
        return Err(TransportError::Unsupported {
            locator: locator.to_string(),
            what: "pipes".to_string(),
        });
    }

    Err(TransportError::NotFound {
        member: member.to_string(),
        device: device.name().to_string(),
    })
}
