//! Per-session outbound handle.
//!
//! A [`SessionHandle`] is the only way to write to a client's stream. It owns
//! a bounded FIFO queue whose single consumer (the drain task) owns the
//! [`Transport`]. Producers never touch the transport: they enqueue an
//! encoded frame plus a reply slot and wait for the drain task to report
//! the write outcome.
//!
//! # Ordering
//!
//! Frames reach the transport in the order they were accepted into the
//! queue. Blocked senders in [`BackpressureMode::Block`] acquire queue slots
//! in arrival order (tokio's bounded channel is fair), so acceptance order
//! is also call order for callers that had to wait.
//!
//! # Teardown
//!
//! The drain task closes the transport exactly once, on whichever comes
//! first: a failed write, an explicit [`SessionHandle::close`], or the last
//! handle clone being dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{BackpressureMode, EmitterConfig};
use crate::error::{EmitError, EmitResult, TransportError};
use crate::message::OutboundMessage;
use crate::runtime::TaskSpawner;
use crate::transport::Transport;

use super::client::{ClientInfo, SessionId};
use super::state::{SessionState, StateCell};

/// Per-call send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Give up waiting for a queue slot at this instant.
    pub deadline: Option<Instant>,
    /// Give up waiting for a queue slot when this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl SendOptions {
    /// Options with a deadline `timeout` from now.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// One queued frame and where to report its outcome.
struct Envelope {
    frame: Bytes,
    reply: oneshot::Sender<Result<u64, TransportError>>,
}

/// State shared between a handle and its drain task.
struct SessionShared {
    state: StateCell,
    sequence: AtomicU64,
    last_activity: Mutex<Instant>,
}

impl SessionShared {
    fn record_write(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Handle to one client's ordered outbound stream.
pub struct SessionHandle {
    id: SessionId,
    client: ClientInfo,
    tx: mpsc::Sender<Envelope>,
    mode: BackpressureMode,
    shared: Arc<SessionShared>,
    close_token: CancellationToken,
    created_at: Instant,
}

impl SessionHandle {
    /// Creates a handle and spawns the drain task that owns `transport`.
    ///
    /// A `queue_capacity` of 0 is treated as 1. Use
    /// [`SessionRegistry::new`](super::SessionRegistry::new) to have the
    /// whole config validated up front.
    pub fn spawn<T, S>(
        id: SessionId,
        client: ClientInfo,
        transport: T,
        config: &EmitterConfig,
        spawner: &S,
    ) -> Self
    where
        T: Transport,
        S: TaskSpawner + ?Sized,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let now = Instant::now();
        let shared = Arc::new(SessionShared {
            state: StateCell::new(),
            sequence: AtomicU64::new(0),
            last_activity: Mutex::new(now),
        });
        let close_token = CancellationToken::new();

        log::debug!(
            "[Session] {} opened for {} (queue: {}, mode: {:?})",
            id,
            client,
            tx.max_capacity(),
            config.backpressure
        );

        spawner.spawn(drain(
            id.clone(),
            transport,
            rx,
            Arc::clone(&shared),
            close_token.clone(),
            config.write_timeout(),
        ));

        Self {
            id,
            client,
            tx,
            mode: config.backpressure,
            shared,
            close_token,
            created_at: now,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    /// Returns true while sends are accepted.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Number of messages successfully written so far.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.shared.sequence.load(Ordering::Acquire)
    }

    /// Number of messages waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Records client activity (e.g. a heartbeat) for idle sweeping.
    ///
    /// Outbound writes do not count: a client that only receives pushes
    /// expires unless it keeps sending heartbeats.
    pub fn touch(&self) {
        *self.shared.last_activity.lock() = Instant::now();
    }

    /// Time since the session opened or was last [`touch`](Self::touch)ed.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.shared.last_activity.lock().elapsed()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Sends a message and waits for the write outcome.
    ///
    /// Returns the sequence number of the written message.
    pub async fn send(&self, message: &OutboundMessage) -> EmitResult<u64> {
        self.send_with(message, SendOptions::default()).await
    }

    /// Like [`send`](Self::send), with a deadline and/or cancellation
    /// applied to the wait for a queue slot.
    ///
    /// Once a message is accepted into the queue it is no longer affected
    /// by `options`: the call waits for the drain task's verdict, which is
    /// bounded by the write timeout.
    pub async fn send_with(
        &self,
        message: &OutboundMessage,
        options: SendOptions,
    ) -> EmitResult<u64> {
        if !self.is_live() {
            return Err(EmitError::send_failed(
                self.id.as_str(),
                TransportError::Closed,
            ));
        }

        let frame = message.encode()?;
        let (reply, outcome) = oneshot::channel();
        self.enqueue(Envelope { frame, reply }, &options).await?;

        match outcome.await {
            Ok(Ok(sequence)) => Ok(sequence),
            Ok(Err(e)) => Err(EmitError::send_failed(self.id.as_str(), e)),
            // Drain task exited without answering: the stream is gone.
            Err(_) => Err(EmitError::send_failed(
                self.id.as_str(),
                TransportError::Closed,
            )),
        }
    }

    async fn enqueue(&self, envelope: Envelope, options: &SendOptions) -> EmitResult<()> {
        match self.tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EmitError::send_failed(
                self.id.as_str(),
                TransportError::Closed,
            )),
            Err(mpsc::error::TrySendError::Full(envelope)) => match self.mode {
                BackpressureMode::FailFast => {
                    log::debug!("[Session] {} queue full, rejecting send", self.id);
                    Err(EmitError::Backpressure(self.id.to_string()))
                }
                BackpressureMode::Block => self.enqueue_blocking(envelope, options).await,
            },
        }
    }

    async fn enqueue_blocking(&self, envelope: Envelope, options: &SendOptions) -> EmitResult<()> {
        let deadline = async {
            match options.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        // Dropping the pending send on timeout leaves the queue untouched.
        tokio::select! {
            biased;
            sent = self.tx.send(envelope) => sent.map_err(|_| {
                EmitError::send_failed(self.id.as_str(), TransportError::Closed)
            }),
            _ = deadline => Err(EmitError::Timeout(self.id.to_string())),
            _ = cancelled => Err(EmitError::Timeout(self.id.to_string())),
        }
    }

    /// Starts a graceful close: new sends are refused, already-queued
    /// messages are flushed, then the transport is released.
    ///
    /// Returns true for the call that initiated the teardown.
    pub fn close(&self) -> bool {
        let initiated = self.shared.state.begin_draining();
        self.close_token.cancel();
        if initiated {
            log::debug!("[Session] {} closing ({} queued)", self.id, self.queued());
        }
        initiated
    }

    /// Resolves once the session starts closing, whoever initiated it.
    pub async fn closed(&self) {
        self.close_token.cancelled().await;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish()
    }
}

/// How the drain loop ended.
enum DrainExit {
    /// Graceful close: flush what is queued.
    Closed,
    /// A write failed: abort what is queued.
    Failed,
    /// Every handle was dropped; nothing can be queued.
    Dropped,
}

async fn write_one<T: Transport>(
    transport: &mut T,
    frame: Bytes,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(write_timeout, transport.write_message(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout(
            write_timeout.as_millis() as u64,
        )),
    }
}

/// Single consumer of a session queue and sole owner of its transport.
async fn drain<T: Transport>(
    id: SessionId,
    mut transport: T,
    mut rx: mpsc::Receiver<Envelope>,
    shared: Arc<SessionShared>,
    close_token: CancellationToken,
    write_timeout: Duration,
) {
    let exit = loop {
        let envelope = tokio::select! {
            biased;
            _ = close_token.cancelled() => break DrainExit::Closed,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break DrainExit::Dropped,
            },
        };

        match write_one(&mut transport, envelope.frame, write_timeout).await {
            Ok(()) => {
                let _ = envelope.reply.send(Ok(shared.record_write()));
            }
            Err(e) => {
                // State flips before the caller sees the error, so no lookup
                // can hand out this session once the failure is reported.
                shared.state.begin_draining();
                log::warn!("[Session] {} write failed: {}", id, e);
                let _ = envelope.reply.send(Err(e));
                break DrainExit::Failed;
            }
        }
    };

    // No new envelopes; blocked senders are released with an error.
    rx.close();
    let mut aborted = 0usize;
    let mut flushed = 0usize;
    let mut failed = matches!(exit, DrainExit::Failed);

    while let Some(envelope) = rx.recv().await {
        if failed {
            let _ = envelope.reply.send(Err(TransportError::Closed));
            aborted += 1;
            continue;
        }
        match write_one(&mut transport, envelope.frame, write_timeout).await {
            Ok(()) => {
                let _ = envelope.reply.send(Ok(shared.record_write()));
                flushed += 1;
            }
            Err(e) => {
                log::warn!("[Session] {} write failed while flushing: {}", id, e);
                let _ = envelope.reply.send(Err(e));
                failed = true;
            }
        }
    }

    transport.close().await;
    shared.state.mark_removed();

    match exit {
        DrainExit::Dropped => log::debug!("[Session] {} released (all handles dropped)", id),
        _ => log::info!(
            "[Session] {} removed (sent: {}, flushed: {}, aborted: {})",
            id,
            shared.sequence.load(Ordering::Acquire),
            flushed,
            aborted
        ),
    }
}
