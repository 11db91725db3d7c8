//! Emitter configuration types.
//!
//! [`EmitterConfig`] groups the per-session queueing parameters and the
//! idle-session policy. All fields have sensible defaults and are validated
//! before any session is created.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What a send does when the session queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressureMode {
    /// Wait for a free queue slot (bounded by the caller's deadline, if any).
    #[default]
    Block,
    /// Return [`EmitError::Backpressure`](crate::EmitError::Backpressure) immediately.
    FailFast,
}

/// Configuration for session queues and idle sweeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Capacity of each session's outbound queue.
    pub queue_capacity: usize,

    /// Behavior when a session queue is full.
    pub backpressure: BackpressureMode,

    /// Upper bound for a single transport write (milliseconds).
    /// A write exceeding it is a fatal send failure.
    pub write_timeout_ms: u64,

    /// Sessions with no activity for this long are removed (seconds).
    /// 0 disables idle sweeping.
    pub idle_timeout_secs: u64,

    /// Interval between idle sweeps (seconds).
    pub sweep_interval_secs: u64,

    /// Capacity of the session lifecycle event channel.
    pub event_channel_capacity: usize,
}

impl EmitterConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError(
                "queue_capacity must be >= 1 (mpsc::channel panics on 0)".to_string(),
            ));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError("write_timeout_ms must be >= 1".to_string()));
        }
        if self.idle_timeout_secs > 0 && self.sweep_interval_secs == 0 {
            return Err(ConfigError(
                "sweep_interval_secs must be >= 1 when idle sweeping is enabled".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Returns the idle timeout, or `None` if sweeping is disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            backpressure: BackpressureMode::Block,
            write_timeout_ms: 5_000,
            idle_timeout_secs: 120,
            sweep_interval_secs: 1,
            event_channel_capacity: 100,
        }
    }
}
