//! Custom error types for the transport layer.
//!
//! This module defines the primary error type, `TransportError`. Using the
//! `thiserror` crate, it gives one consistent taxonomy for everything that can
//! go wrong between a locator string and a remote endpoint.
//!
//! ## Error Hierarchy
//!
//! - **Connection**: `NotConnected` covers every connect-time failure,
//!   including a cancelled or timed-out connect. Fatal to the transport until
//!   `connect()` is attempted again.
//! - **Resolution**: `InvalidLocator`, `NotFound` and `Unsupported` (pipes).
//!   Configuration mistakes; never retried.
//! - **Typing**: `UnsupportedType` and `TypeMismatch`, raised while building
//!   the descriptor at connect time.
//! - **Subscription**: `AlreadySubscribed`, `EventsUnsupported` and
//!   `SubscriptionRejected`. Caller errors.
//! - **I/O**: `Client` wraps a failure reported by the client library;
//!   `Timeout` is an asynchronous put whose reply did not arrive in time.
//! - **Settings**: `Config` (figment load failure) and `Configuration`
//!   (semantic validation).
//!
//! Every variant raised for an endpoint carries its locator.

use crate::client::{ClientError, CmdArgType};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the transport error type.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Primary error type for the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connecting (resolution, config fetch) failed or was cancelled.
    #[error("{locator} is not connected: {cause}")]
    NotConnected {
        /// Read-side locator of the transport
        locator: String,
        /// Human-readable cause
        cause: String,
    },

    /// Locator does not have the `<device-path>/<member>` form.
    #[error("Invalid locator '{0}': expected <device-path>/<member-name>")]
    InvalidLocator(String),

    /// Member is neither an attribute nor a command of the device.
    #[error("{member} cannot be found in {device}")]
    NotFound {
        /// Member name
        member: String,
        /// Device path
        device: String,
    },

    /// Member exists but is of a kind the transport does not handle.
    #[error("{locator}: {what} are not supported")]
    Unsupported {
        /// Offending locator
        locator: String,
        /// What is unsupported (e.g. "pipes")
        what: String,
    },

    /// Remote type tag has no generic mapping.
    #[error("Unknown remote type {0}")]
    UnsupportedType(CmdArgType),

    /// Expected and inferred descriptors disagree.
    #[error("{locator} {message}")]
    TypeMismatch {
        /// Offending locator
        locator: String,
        /// What disagreed
        message: String,
    },

    /// A callback is already registered on the read-side endpoint.
    #[error("Cannot set a callback on {0} when one is already set")]
    AlreadySubscribed(String),

    /// The read-side endpoint cannot push events.
    #[error("{0} does not support events")]
    EventsUnsupported(String),

    /// The server refused the event subscription.
    #[error("Cannot set event for {locator}. This signal should be used only as non-cached! ({cause})")]
    SubscriptionRejected {
        /// Offending locator
        locator: String,
        /// Rejection reported by the client library
        cause: String,
    },

    /// An asynchronous put did not complete in time.
    #[error("{locator}: no reply within {timeout:?}")]
    Timeout {
        /// Offending locator
        locator: String,
        /// Caller-specified bound
        timeout: Duration,
    },

    /// The client library reported a failure for this endpoint.
    #[error("{locator}: {source}")]
    Client {
        /// Offending locator
        locator: String,
        /// Underlying library error
        #[source]
        source: ClientError,
    },

    /// No tokio runtime is available to drive notifications.
    #[error("No async runtime available for event delivery: {0}")]
    NoRuntime(String),

    /// Settings file or environment could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings loaded but are semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Wrap a client-library failure for `locator`.
    pub fn client(locator: impl Into<String>, source: ClientError) -> Self {
        Self::Client {
            locator: locator.into(),
            source,
        }
    }

    /// Build a [`TransportError::TypeMismatch`].
    pub fn mismatch(locator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            locator: locator.into(),
            message: message.into(),
        }
    }

    /// Build a [`TransportError::NotConnected`].
    pub fn not_connected(locator: impl Into<String>, cause: impl ToString) -> Self {
        Self::NotConnected {
            locator: locator.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<figment::Error> for TransportError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::NotFound {
            member: "nonexistent".into(),
            device: "test/device/1".into(),
        };
        assert_eq!(err.to_string(), "nonexistent cannot be found in test/device/1");
    }

    #[test]
    fn test_subscription_rejected_mentions_uncached() {
        let err = TransportError::SubscriptionRejected {
            locator: "test/device/1/justvalue".into(),
            cause: "event not configured".into(),
        };
        assert!(err.to_string().contains("non-cached"));
        assert!(err.to_string().contains("test/device/1/justvalue"));
    }

    #[test]
    fn test_client_error_source_is_kept() {
        let err = TransportError::client("a/b/c", ClientError::Timeout);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Operation timed out"));
    }
}
