//! Bounded wait for the reply of an asynchronous request.

use crate::client::ClientError;
use crate::error::{Result, TransportError};
use std::future::Future;
use std::time::Duration;
use tracing::trace;

/// Poll `check` until it yields a reply or `timeout` elapses.
///
/// Only [`ClientError::NotReady`] is retried, after sleeping `interval`.
/// Any other failure is returned immediately. The deadline also bounds a
/// `check` that never resolves; very large timeouts wait indefinitely.
pub(crate) async fn wait_for_reply<T, F, Fut>(
    locator: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ClientError>>,
{
    let poll = async {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match check().await {
                Ok(reply) => return Ok(reply),
                Err(ClientError::NotReady(id)) => {
                    trace!(locator, request = id, attempts, "Reply not ready yet");
                }
                Err(e) => return Err(TransportError::client(locator, e)),
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .unwrap_or_else(|_| {
            Err(TransportError::Timeout {
                locator: locator.to_string(),
                timeout,
            })
        })
}
