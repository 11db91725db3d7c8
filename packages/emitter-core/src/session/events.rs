//! Session lifecycle events.
//!
//! The registry broadcasts a [`SessionEvent`] whenever a session enters or
//! leaves it. Observers (admin endpoints, metrics exporters, log sinks)
//! subscribe through [`SessionRegistry::subscribe`](super::SessionRegistry::subscribe).

use serde::Serialize;

use super::client::{ClientInfo, SessionId};

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    /// A write to the client failed.
    SendFailed,
    /// The client closed its connection.
    Disconnected,
    /// No activity within the idle timeout.
    IdleTimeout,
    /// Rejected by an operator (e.g. bulk rejection of a subsystem).
    Rejected,
    /// Server shutting down.
    Shutdown,
    /// A dead entry was replaced by a new registration under the same id.
    Replaced,
}

/// Session lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A session was registered.
    Registered {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        client: ClientInfo,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A session was removed.
    Removed {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        reason: RemovalReason,
        /// Messages successfully written over the session's lifetime.
        sent: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Registered { session_id, .. } | Self::Removed { session_id, .. } => session_id,
        }
    }
}
