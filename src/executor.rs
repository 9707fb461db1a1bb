//! Process-wide execution context for client notifications.
//!
//! Server-pushed events arrive on the client library's own notification
//! thread, and polling tasks must outlive the task that registered them.
//! Both run on one dedicated runtime owned by [`ClientExecutor`], created
//! lazily on first use and never torn down.
//!
//! Every calling context (thread) attaches to the executor exactly once via
//! [`ensure_executor`]; later calls on the same thread are a flag check.

use crate::error::{Result, TransportError};
use once_cell::sync::OnceCell;
use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

static EXECUTOR: OnceCell<ClientExecutor> = OnceCell::new();

thread_local! {
    static ATTACHED: Cell<bool> = const { Cell::new(false) };
}

/// Dedicated runtime driving event delivery and polling tasks.
pub struct ClientExecutor {
    runtime: Runtime,
    attached: AtomicUsize,
}

impl ClientExecutor {
    fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("client-executor")
            .enable_all()
            .build()
            .map_err(|e| TransportError::NoRuntime(e.to_string()))?;
        debug!("Created client executor runtime");
        Ok(Self {
            runtime,
            attached: AtomicUsize::new(0),
        })
    }

    /// Spawn a task on the executor runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Handle to the executor runtime.
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Number of distinct contexts that have attached so far.
    pub fn attached_contexts(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}

/// The executor, created on first call.
pub fn global() -> Result<&'static ClientExecutor> {
    EXECUTOR.get_or_try_init(ClientExecutor::new)
}

/// Make sure the calling context is attached to the executor.
///
/// Installs the executor if absent. Attaching happens at most once per
/// thread; the returned reference is the same process-wide instance.
pub fn ensure_executor() -> Result<&'static ClientExecutor> {
    let executor = global()?;
    ATTACHED.with(|attached| {
        if !attached.get() {
            attached.set(true);
            let count = executor.attached.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                thread = ?std::thread::current().name(),
                contexts = count,
                "Attached context to client executor"
            );
        }
    });
    Ok(executor)
}

/// Whether the calling thread has attached.
pub fn is_attached() -> bool {
    ATTACHED.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_attach_once_per_context() {
        let executor = ensure_executor().unwrap();
        let before = executor.attached_contexts();
        assert!(is_attached());

        // other test threads may attach concurrently, so only lower bounds hold
        std::thread::spawn(|| {
            assert!(!is_attached());
            ensure_executor().unwrap();
            assert!(is_attached());
            ensure_executor().unwrap();
        })
        .join()
        .unwrap();
        assert!(executor.attached_contexts() >= before + 1);
        assert!(is_attached());
    }

    #[test]
    #[serial]
    fn test_executor_is_a_singleton() {
        let a = global().unwrap() as *const ClientExecutor;
        let b = ensure_executor().unwrap() as *const ClientExecutor;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_spawn_runs_on_executor() {
        let executor = ensure_executor().unwrap();
        let name = executor
            .spawn(async { std::thread::current().name().map(str::to_string) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("client-executor"));
    }
}
