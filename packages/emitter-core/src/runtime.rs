//! Task spawning abstraction for runtime independence.
//!
//! Session drain tasks and the idle sweeper are started through a
//! [`TaskSpawner`] rather than calling `tokio::spawn` directly, so an
//! embedding broker can route them onto its own runtime handle.

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Implementations must let the task run to completion even if the spawner
/// itself is dropped: a session drain task owns its transport and is the
/// only place that transport gets closed.
///
/// # Example
///
/// ```ignore
/// let spawner = TokioSpawner::current();
/// let handle = SessionHandle::spawn(id, client, transport, &config, &spawner);
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    ///
    /// The spawner does not provide a way to cancel or join the spawned
    /// task; callers signal shutdown through their own cancellation tokens.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner for the standalone server and general use.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn tokio_spawner_runs_task_after_spawner_is_dropped() {
        let (tx, rx) = oneshot::channel();
        {
            let spawner = TokioSpawner::current();
            spawner.spawn(async move {
                let _ = tx.send(7u8);
            });
        }

        assert_eq!(rx.await.unwrap(), 7);
    }
}
