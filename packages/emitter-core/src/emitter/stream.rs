//! Multiplexing stream emitter.
//!
//! [`StreamEmitter`] is shared by every producer in the broker. It resolves
//! the target session in the registry, hands the message to that session's
//! handle, and removes the session when its stream fails. It holds no lock
//! of its own: a slow or dying session only affects callers targeting it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::{EmitError, EmitResult};
use crate::message::{OutboundMessage, RequestHeader, StatusCode};
use crate::session::{RemovalReason, SendOptions, SessionId, SessionRegistry};

use super::EventEmitter;

/// Emitter addressing sessions by id.
#[derive(Clone)]
pub struct StreamEmitter {
    registry: Arc<SessionRegistry>,
}

impl StreamEmitter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Sends a response to `session_id` and waits for the write outcome.
    ///
    /// # Errors
    ///
    /// - [`EmitError::UnknownSession`] if the session is not registered
    /// - [`EmitError::Backpressure`] if its queue is full in fail-fast mode
    /// - [`EmitError::SendFailed`] if its stream failed; the session is
    ///   removed and later sends report `UnknownSession`
    pub async fn send_stream_resp(
        &self,
        session_id: &str,
        header: &RequestHeader,
        status: &StatusCode,
    ) -> EmitResult<()> {
        self.send_stream_resp_with(session_id, header, status, SendOptions::default())
            .await
    }

    /// Like [`send_stream_resp`](Self::send_stream_resp), with a deadline
    /// and/or cancellation token bounding the wait for a queue slot
    /// ([`EmitError::Timeout`] on expiry).
    pub async fn send_stream_resp_with(
        &self,
        session_id: &str,
        header: &RequestHeader,
        status: &StatusCode,
        options: SendOptions,
    ) -> EmitResult<()> {
        let handle = self
            .registry
            .lookup(session_id)
            .ok_or_else(|| EmitError::UnknownSession(session_id.to_string()))?;

        let message = OutboundMessage::new(header.clone(), status.clone());
        match handle.send_with(&message, options).await {
            Ok(sequence) => {
                log::trace!("[Emitter] {} <- #{} ({})", session_id, sequence, status.ret_code);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                // Several producers may hit the same dead session; only the
                // first removal does anything.
                if self
                    .registry
                    .remove_if_same(session_id, &handle, RemovalReason::SendFailed)
                {
                    log::warn!("[Emitter] Session {} dropped after send failure: {}", session_id, e);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends the same response to every live session of `group`.
    ///
    /// Sessions are written concurrently; one result per targeted session.
    pub async fn send_to_group(
        &self,
        group: &str,
        header: &RequestHeader,
        status: &StatusCode,
    ) -> Vec<(SessionId, EmitResult<()>)> {
        let targets = self.registry.sessions_in_group(group);
        log::debug!("[Emitter] Fan-out to group {} ({} sessions)", group, targets.len());

        join_all(targets.into_iter().map(|handle| async move {
            let id = handle.id().clone();
            let result = self.send_stream_resp(id.as_str(), header, status).await;
            (id, result)
        }))
        .await
    }

    /// Returns an [`EventEmitter`] bound to one session.
    pub fn bind(&self, session_id: impl Into<SessionId>) -> SessionEmitter {
        SessionEmitter {
            emitter: self.clone(),
            session_id: session_id.into(),
        }
    }
}

/// [`StreamEmitter`] bound to a single session, for processors that serve
/// one connection.
#[derive(Clone)]
pub struct SessionEmitter {
    emitter: StreamEmitter,
    session_id: SessionId,
}

impl SessionEmitter {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

#[async_trait]
impl EventEmitter for SessionEmitter {
    async fn send_stream_resp(
        &self,
        header: &RequestHeader,
        status: &StatusCode,
    ) -> EmitResult<()> {
        self.emitter
            .send_stream_resp(self.session_id.as_str(), header, status)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackpressureMode, EmitterConfig};
    use crate::runtime::TokioSpawner;
    use crate::session::{ClientInfo, Purpose, SessionHandle, SessionState};
    use crate::test_fixtures::{recording_transport, TransportProbe};
    use std::time::Duration;

    fn setup(config: EmitterConfig) -> StreamEmitter {
        StreamEmitter::new(Arc::new(SessionRegistry::new(config).unwrap()))
    }

    fn open(
        emitter: &StreamEmitter,
        id: &str,
        client: ClientInfo,
    ) -> (Arc<SessionHandle>, TransportProbe) {
        let (transport, probe) = recording_transport();
        let handle = emitter
            .registry()
            .open(SessionId::from(id), client, transport, &TokioSpawner::current())
            .unwrap();
        (handle, probe)
    }

    fn header(id: &str) -> RequestHeader {
        RequestHeader::correlated(id)
    }

    #[tokio::test]
    async fn failed_session_becomes_unknown() {
        let emitter = setup(EmitterConfig::default());
        let (_handle, probe) = open(&emitter, "s1", ClientInfo::default());
        let ok = StatusCode::success();

        emitter.send_stream_resp("s1", &header("h1"), &ok).await.unwrap();
        assert_eq!(probe.correlation_ids(), vec!["h1"]);

        probe.fail_writes();
        let err = emitter
            .send_stream_resp("s1", &header("h2"), &ok)
            .await
            .unwrap_err();
        assert!(matches!(err, EmitError::SendFailed { .. }));

        let err = emitter
            .send_stream_resp("s1", &header("h3"), &ok)
            .await
            .unwrap_err();
        assert_eq!(err, EmitError::UnknownSession("s1".to_string()));
        assert!(emitter.registry().is_empty());

        while probe.close_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_reported_without_side_effects() {
        let emitter = setup(EmitterConfig::default());
        let err = emitter
            .send_stream_resp("nope", &header("h1"), &StatusCode::success())
            .await
            .unwrap_err();
        assert_eq!(err, EmitError::UnknownSession("nope".to_string()));
    }

    #[tokio::test]
    async fn two_concurrent_senders_are_both_written_whole() {
        let emitter = setup(EmitterConfig {
            queue_capacity: 2,
            ..Default::default()
        });
        let (_handle, probe) = open(&emitter, "s1", ClientInfo::default());
        let ok = StatusCode::success();
        let (h1, h2) = (header("h1"), header("h2"));

        let (a, b) = tokio::join!(
            emitter.send_stream_resp("s1", &h1, &ok),
            emitter.send_stream_resp("s1", &h2, &ok),
        );
        a.unwrap();
        b.unwrap();

        let written = probe.correlation_ids();
        assert!(
            written == vec!["h1", "h2"] || written == vec!["h2", "h1"],
            "unexpected order: {written:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_producers_keep_per_producer_order() {
        let emitter = setup(EmitterConfig {
            queue_capacity: 4,
            ..Default::default()
        });
        let (_handle, probe) = open(&emitter, "s1", ClientInfo::default());

        let mut producers = Vec::new();
        for p in 0..8 {
            let emitter = emitter.clone();
            producers.push(tokio::spawn(async move {
                for n in 0..25 {
                    let id = format!("p{p}-{n:02}");
                    emitter
                        .send_stream_resp("s1", &header(&id), &StatusCode::success())
                        .await
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let written = probe.correlation_ids();
        assert_eq!(written.len(), 200);
        // Each producer awaits its sends one by one, so its own messages
        // must appear in submission order.
        for p in 0..8 {
            let prefix = format!("p{p}-");
            let mine: Vec<&String> = written.iter().filter(|id| id.starts_with(&prefix)).collect();
            let mut sorted = mine.clone();
            sorted.sort();
            assert_eq!(mine, sorted);
        }
    }

    #[tokio::test]
    async fn concurrent_failures_remove_the_session_once() {
        let emitter = setup(EmitterConfig {
            queue_capacity: 16,
            ..Default::default()
        });
        let (handle, probe) = open(&emitter, "s1", ClientInfo::default());
        let mut events = emitter.registry().subscribe();
        probe.hold();
        probe.fail_writes();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let emitter = emitter.clone();
            tasks.push(tokio::spawn(async move {
                emitter
                    .send_stream_resp("s1", &header(&format!("m{i}")), &StatusCode::success())
                    .await
            }));
        }
        probe.wait_writes_started(1).await;
        probe.release();

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(
                matches!(err, EmitError::SendFailed { .. } | EmitError::UnknownSession(_)),
                "unexpected error: {err:?}"
            );
        }

        while handle.state() != SessionState::Removed {
            tokio::task::yield_now().await;
        }
        assert_eq!(probe.close_count(), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            crate::session::SessionEvent::Removed {
                reason: RemovalReason::SendFailed,
                ..
            }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn backpressure_is_local_to_the_saturated_session() {
        let emitter = setup(EmitterConfig {
            queue_capacity: 1,
            backpressure: BackpressureMode::FailFast,
            ..Default::default()
        });
        let (slow, slow_probe) = open(&emitter, "slow", ClientInfo::default());
        let (_fast, fast_probe) = open(&emitter, "fast", ClientInfo::default());
        let ok = StatusCode::success();
        slow_probe.hold();

        let stuck = {
            let emitter = emitter.clone();
            let ok = ok.clone();
            tokio::spawn(async move { emitter.send_stream_resp("slow", &header("a"), &ok).await })
        };
        slow_probe.wait_writes_started(1).await;
        let queued = {
            let emitter = emitter.clone();
            let ok = ok.clone();
            tokio::spawn(async move { emitter.send_stream_resp("slow", &header("b"), &ok).await })
        };
        while slow.queued() < 1 {
            tokio::task::yield_now().await;
        }

        let err = emitter
            .send_stream_resp("slow", &header("c"), &ok)
            .await
            .unwrap_err();
        assert_eq!(err, EmitError::Backpressure("slow".to_string()));

        // The other session is untouched by the saturated one.
        for i in 0..10 {
            tokio::time::timeout(
                Duration::from_secs(1),
                emitter.send_stream_resp("fast", &header(&format!("f{i}")), &ok),
            )
            .await
            .expect("fast session must not wait on the slow one")
            .unwrap();
        }
        assert_eq!(fast_probe.correlation_ids().len(), 10);

        slow_probe.release();
        stuck.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
        assert!(slow.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_timeout_in_block_mode() {
        let emitter = setup(EmitterConfig {
            queue_capacity: 1,
            write_timeout_ms: 60_000,
            ..Default::default()
        });
        let (handle, probe) = open(&emitter, "s1", ClientInfo::default());
        let ok = StatusCode::success();
        probe.hold();

        let first = {
            let emitter = emitter.clone();
            let ok = ok.clone();
            tokio::spawn(async move { emitter.send_stream_resp("s1", &header("a"), &ok).await })
        };
        probe.wait_writes_started(1).await;
        let second = {
            let emitter = emitter.clone();
            let ok = ok.clone();
            tokio::spawn(async move { emitter.send_stream_resp("s1", &header("b"), &ok).await })
        };
        while handle.queued() < 1 {
            tokio::task::yield_now().await;
        }

        let err = emitter
            .send_stream_resp_with(
                "s1",
                &header("c"),
                &ok,
                SendOptions::timeout(Duration::from_millis(10)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, EmitError::Timeout("s1".to_string()));
        assert!(emitter.registry().lookup("s1").is_some());

        probe.release();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(probe.correlation_ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn send_to_group_reaches_only_that_group() {
        let emitter = setup(EmitterConfig::default());
        let (_a, pa) = open(&emitter, "a", ClientInfo::new("5477", "g1", Purpose::Sub));
        let (_b, pb) = open(&emitter, "b", ClientInfo::new("5477", "g1", Purpose::Sub));
        let (_c, pc) = open(&emitter, "c", ClientInfo::new("5477", "g2", Purpose::Sub));
        pb.fail_writes();

        let mut results = emitter
            .send_to_group("g1", &header("hb"), &StatusCode::success())
            .await;
        results.sort_by(|x, y| x.0.cmp(&y.0));

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.as_ref().unwrap_err().is_fatal());
        assert_eq!(pa.correlation_ids(), vec!["hb"]);
        assert!(pc.frames().is_empty());
        assert_eq!(emitter.registry().ids().len(), 2);
    }

    #[tokio::test]
    async fn bound_emitter_targets_its_session() {
        let emitter = setup(EmitterConfig::default());
        let (_handle, probe) = open(&emitter, "s1", ClientInfo::default());
        let bound: Arc<dyn EventEmitter> = Arc::new(emitter.bind("s1"));

        bound
            .send_stream_resp(&header("h1"), &StatusCode::success())
            .await
            .unwrap();
        assert_eq!(probe.correlation_ids(), vec!["h1"]);

        emitter.registry().remove("s1", RemovalReason::Disconnected);
        let err = bound
            .send_stream_resp(&header("h2"), &StatusCode::success())
            .await
            .unwrap_err();
        assert_eq!(err, EmitError::UnknownSession("s1".to_string()));
    }
}
