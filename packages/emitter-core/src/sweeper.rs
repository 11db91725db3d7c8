//! Background removal of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::runtime::TaskSpawner;
use crate::session::SessionRegistry;

/// Periodically removes sessions that have been idle longer than `max_idle`,
/// along with entries whose stream already failed.
pub struct IdleSweeper {
    registry: Arc<SessionRegistry>,
    max_idle: Duration,
    interval: Duration,
    /// Token to signal the sweep loop to stop.
    cancel_token: CancellationToken,
}

impl IdleSweeper {
    pub fn new(registry: Arc<SessionRegistry>, max_idle: Duration, interval: Duration) -> Self {
        Self {
            registry,
            max_idle,
            interval,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Builds a sweeper from the registry's own config.
    ///
    /// Returns `None` when idle expiry is disabled (`idle_timeout_secs = 0`).
    pub fn from_config(registry: Arc<SessionRegistry>) -> Option<Self> {
        let config = registry.config();
        let max_idle = config.idle_timeout()?;
        let interval = config.sweep_interval();
        Some(Self::new(registry, max_idle, interval))
    }

    /// Starts the sweep loop on `spawner`. Calling it more than once starts
    /// independent loops sharing the same stop signal.
    pub fn start<S: TaskSpawner + ?Sized>(&self, spawner: &S) {
        let registry = Arc::clone(&self.registry);
        let cancel_token = self.cancel_token.clone();
        let max_idle = self.max_idle;
        let period = self.interval;

        log::info!(
            "[IdleSweeper] Started (max idle: {:?}, every {:?})",
            max_idle,
            period
        );

        spawner.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        log::info!("[IdleSweeper] Shutting down sweep loop");
                        break;
                    }
                    _ = interval.tick() => {}
                }

                let removed = registry.sweep_idle(max_idle);
                if !removed.is_empty() {
                    log::info!("[IdleSweeper] Removed {} idle session(s)", removed.len());
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for IdleSweeper {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
