//! Centralized error types for the emitter core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Separates transport failures (what the wire reported) from emit
//!   failures (what the caller of `send_stream_resp` observes)
//! - Gives every error a machine-readable code for logs and responses

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Failure reported by a [`Transport`](crate::transport::Transport) write.
///
/// Every variant is fatal for the session that owns the transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The remote peer went away (reset, broken pipe).
    #[error("peer is gone: {0}")]
    PeerGone(String),

    /// The stream was already closed locally or by the peer.
    #[error("stream closed")]
    Closed,

    /// A write did not complete within the configured write timeout.
    #[error("write timed out after {0}ms")]
    WriteTimeout(u64),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::PeerGone(_) => "peer_gone",
            Self::Closed => "stream_closed",
            Self::WriteTimeout(_) => "write_timeout",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => Self::PeerGone(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Error returned to producers calling into the emitter.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum EmitError {
    /// Target session is not registered (never was, or already removed).
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Session queue is full and the backpressure mode is fail-fast.
    #[error("Session {0} is backpressured (queue full)")]
    Backpressure(String),

    /// Caller deadline expired (or was cancelled) while waiting to enqueue.
    ///
    /// Nothing was written for this call.
    #[error("Timed out waiting to enqueue for session {0}")]
    Timeout(String),

    /// The transport failed; the session is being torn down.
    #[error("Send to session {session_id} failed: {reason}")]
    SendFailed {
        /// Session whose stream failed.
        session_id: String,
        /// Transport-level reason.
        reason: String,
    },

    /// A live session with this id is already registered.
    #[error("Duplicate session: {0}")]
    DuplicateSession(String),

    /// The outbound message could not be serialized.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl EmitError {
    /// Builds a [`EmitError::SendFailed`] from a transport failure.
    pub fn send_failed(session_id: &str, reason: impl ToString) -> Self {
        Self::SendFailed {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the error means the target session is unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SendFailed { .. })
    }
}

impl ErrorCode for EmitError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "unknown_session",
            Self::Backpressure(_) => "backpressure",
            Self::Timeout(_) => "timeout",
            Self::SendFailed { .. } => "send_failed",
            Self::DuplicateSession(_) => "duplicate_session",
            Self::InvalidMessage(_) => "invalid_message",
        }
    }
}

/// Invalid [`EmitterConfig`](crate::config::EmitterConfig) values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

/// Convenient Result alias for emit operations.
pub type EmitResult<T> = Result<T, EmitError>;
