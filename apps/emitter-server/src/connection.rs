//! Per-connection handling.
//!
//! Wire protocol (line-oriented inbound, length-prefixed JSON outbound):
//!
//! 1. The client sends one JSON line describing itself (`ClientInfo`).
//! 2. The server assigns a session id and replies with a success status
//!    whose correlation id is that session id.
//! 3. Each further line is a request. `heartbeat` refreshes the session and
//!    is acknowledged; anything else is answered with `REQUEST_CODE_INVALID`.
//! 4. EOF removes the session. Removal on the server side (idle sweep,
//!    rejection, shutdown) ends the connection.
//!
//! Inbound lines longer than the configured limit close the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use emitter_core::{
    ClientInfo, EmitError, ErrorCode, EventEmitter, FramedTransport, RemovalReason,
    RequestHeader, SessionHandle, SessionId, StatusCode, StreamEmitter, TokioSpawner,
};
use futures::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};

const HEARTBEAT: &str = "heartbeat";

type Requests = FramedRead<OwnedReadHalf, LinesCodec>;

/// Serves one client connection until EOF, a read error, a fatal send
/// error, or removal of its session.
pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    emitter: StreamEmitter,
    spawner: TokioSpawner,
    max_request_len: usize,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut requests = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(max_request_len),
    );

    let handshake = match requests.next().await {
        Some(line) => line.context("Failed to read handshake")?,
        None => anyhow::bail!("Connection closed before handshake"),
    };
    let mut client: ClientInfo =
        serde_json::from_str(&handshake).context("Invalid handshake payload")?;
    if client.host.is_empty() {
        client.host = peer.ip().to_string();
    }

    let session_id = SessionId::generate();
    let handle = emitter
        .registry()
        .open(
            session_id.clone(),
            client,
            FramedTransport::new(write_half),
            &spawner,
        )
        .context("Failed to register session")?;

    let responder: Arc<dyn EventEmitter> = Arc::new(emitter.bind(session_id.clone()));
    let result = run_session(&mut requests, &handle, &emitter, responder.as_ref()).await;

    // No-op if the session was already removed.
    emitter
        .registry()
        .remove(session_id.as_str(), RemovalReason::Disconnected);
    result
}

async fn run_session(
    requests: &mut Requests,
    handle: &SessionHandle,
    emitter: &StreamEmitter,
    responder: &dyn EventEmitter,
) -> Result<()> {
    let session_id = handle.id();
    responder
        .send_stream_resp(
            &RequestHeader::correlated(session_id.as_str()),
            &StatusCode::success(),
        )
        .await
        .context("Failed to acknowledge handshake")?;

    let mut request_no: u64 = 0;
    loop {
        let line = tokio::select! {
            _ = handle.closed() => {
                log::info!("[Connection] {} closed by server", session_id);
                return Ok(());
            }
            next = requests.next() => match next {
                Some(line) => line.context("Failed to read request")?,
                None => {
                    log::info!("[Connection] {} closed by peer", session_id);
                    return Ok(());
                }
            },
        };

        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        request_no += 1;
        let header = RequestHeader::correlated(format!("{}-{}", session_id, request_no));

        let status = if request == HEARTBEAT {
            if !emitter.registry().touch(session_id.as_str()) {
                log::info!("[Connection] {} heartbeat after removal", session_id);
                return Ok(());
            }
            StatusCode::success()
        } else {
            log::debug!("[Connection] {} sent unknown request: {}", session_id, request);
            StatusCode::with_detail(StatusCode::REQUEST_CODE_INVALID, request)
        };

        match responder.send_stream_resp(&header, &status).await {
            Ok(()) => {}
            Err(EmitError::UnknownSession(_)) => {
                log::info!("[Connection] {} no longer registered", session_id);
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e).context("Session stream failed"),
            Err(e) => log::warn!(
                "[Connection] {} response dropped [{}]: {}",
                session_id,
                e.code(),
                e
            ),
        }
    }
}
