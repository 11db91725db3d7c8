//! Transport abstraction for session output streams.
//!
//! The core never accepts connections or deals with framing protocols
//! itself. Whatever binds a client connection hands the session a
//! [`Transport`]: something that accepts an ordered sequence of messages and
//! reports when it can no longer do so.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Write half of one client's outbound stream.
///
/// A transport is owned by exactly one session drain task, so
/// implementations never see concurrent calls. Any error returned from
/// [`write_message`](Transport::write_message) is treated as fatal for the
/// session.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Writes one complete message.
    async fn write_message(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Releases the underlying stream. Called exactly once per session.
    async fn close(&mut self);
}

/// Length-prefixed framing over any tokio writer.
///
/// Each message is written as a big-endian `u32` length followed by the
/// payload, then flushed.
pub struct FramedTransport<W> {
    writer: W,
    max_frame_len: usize,
}

impl<W> FramedTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Default upper bound for a single frame (16 MiB).
    pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

    pub fn new(writer: W) -> Self {
        Self {
            writer,
            max_frame_len: Self::DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Overrides the maximum frame length.
    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

#[async_trait]
impl<W> Transport for FramedTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_len {
            return Err(TransportError::Io(format!(
                "frame of {} bytes exceeds limit of {}",
                frame.len(),
                self.max_frame_len
            )));
        }
        let len = u32::try_from(frame.len())
            .map_err(|_| TransportError::Io("frame length overflows u32".to_string()))?;

        self.writer.write_all(&len.to_be_bytes()).await?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            log::debug!("[Transport] Shutdown after close reported: {}", e);
        }
    }
}
