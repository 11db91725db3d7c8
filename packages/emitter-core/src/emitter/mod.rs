//! Event emitter abstraction for pushing responses back to clients.
//!
//! Request processors depend on the [`EventEmitter`] trait rather than on
//! the registry or a concrete transport, so they can be exercised with a
//! hand-written fake and bound to any session at construction time.
//!
//! - [`StreamEmitter`]: shared, multiplexing emitter addressed by session id
//! - [`SessionEmitter`]: a [`StreamEmitter`] bound to one session
//! - [`LoggingEventEmitter`] / [`NoopEventEmitter`]: stand-ins for tools
//!   and tests

mod stream;

pub use stream::{SessionEmitter, StreamEmitter};

use async_trait::async_trait;

use crate::error::EmitResult;
use crate::message::{RequestHeader, StatusCode};

/// Pushes a response to the client a processor is serving.
///
/// # Example
///
/// ```ignore
/// struct SubscribeProcessor {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl SubscribeProcessor {
///     async fn reject(&self, header: &RequestHeader, reason: &str) -> EmitResult<()> {
///         let status = StatusCode::with_detail(StatusCode::SUBSCRIBE_ERR, reason);
///         self.emitter.send_stream_resp(header, &status).await
///     }
/// }
/// ```
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Sends `status` correlated with `header` on the client's stream.
    async fn send_stream_resp(&self, header: &RequestHeader, status: &StatusCode)
        -> EmitResult<()>;
}

/// No-op emitter. Responses are silently discarded.
pub struct NoopEventEmitter;

#[async_trait]
impl EventEmitter for NoopEventEmitter {
    async fn send_stream_resp(
        &self,
        _header: &RequestHeader,
        _status: &StatusCode,
    ) -> EmitResult<()> {
        Ok(())
    }
}

/// Logging emitter for debugging and development.
///
/// Logs every response at debug level and reports success.
pub struct LoggingEventEmitter;

#[async_trait]
impl EventEmitter for LoggingEventEmitter {
    async fn send_stream_resp(
        &self,
        header: &RequestHeader,
        status: &StatusCode,
    ) -> EmitResult<()> {
        tracing::debug!(?header, ?status, "stream_resp");
        Ok(())
    }
}
