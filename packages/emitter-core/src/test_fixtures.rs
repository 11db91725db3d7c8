//! Shared test fixtures: a recording transport with failure and stall knobs.
//!
//! Used by the session, registry, emitter and sweeper test modules.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::TransportError;
use crate::message::{OutboundMessage, RequestHeader, StatusCode};
use crate::transport::Transport;

/// Transport that records every frame written to it.
pub struct RecordingTransport {
    probe: TransportProbe,
    gate: watch::Receiver<bool>,
}

/// Test-side view of a [`RecordingTransport`].
#[derive(Clone)]
pub struct TransportProbe {
    frames: Arc<Mutex<Vec<Bytes>>>,
    fail: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    gate: Arc<watch::Sender<bool>>,
    started: Arc<watch::Sender<usize>>,
}

/// Creates a transport and the probe that observes/controls it.
pub fn recording_transport() -> (RecordingTransport, TransportProbe) {
    let (gate_tx, gate_rx) = watch::channel(true);
    let (started_tx, _) = watch::channel(0usize);
    let probe = TransportProbe {
        frames: Arc::new(Mutex::new(Vec::new())),
        fail: Arc::new(AtomicBool::new(false)),
        closes: Arc::new(AtomicUsize::new(0)),
        gate: Arc::new(gate_tx),
        started: Arc::new(started_tx),
    };
    let transport = RecordingTransport {
        probe: probe.clone(),
        gate: gate_rx,
    };
    (transport, probe)
}

impl TransportProbe {
    /// Makes every following write report the peer as gone.
    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Stalls writes until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Waits until at least `n` writes have started (including stalled ones).
    pub async fn wait_writes_started(&self, n: usize) {
        let mut rx = self.started.subscribe();
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    /// Correlation ids of the recorded frames, in write order.
    pub fn correlation_ids(&self) -> Vec<String> {
        self.frames().iter().map(correlation_id_of).collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn write_message(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.probe.started.send_modify(|started| *started += 1);
        let _ = self.gate.wait_for(|open| *open).await;
        if self.probe.fail.load(Ordering::SeqCst) {
            return Err(TransportError::PeerGone("test peer closed".to_string()));
        }
        self.probe.frames.lock().push(frame);
        Ok(())
    }

    async fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds a success response correlated with `id`.
pub fn message(id: &str) -> OutboundMessage {
    OutboundMessage::new(RequestHeader::correlated(id), StatusCode::success())
}

pub fn correlation_id_of(frame: &Bytes) -> String {
    let json: serde_json::Value = serde_json::from_slice(frame).expect("frame is JSON");
    json["header"]["correlationId"]
        .as_str()
        .expect("frame has a correlation id")
        .to_string()
}
