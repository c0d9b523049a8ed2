//! WebSocket session lifecycle: one authenticated client from registration
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tether_core::Identity;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handshake::{self, HandshakeError};
use super::keepalive::run_keepalive;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::ConnectionRegistry;
use crate::router::{Inbound, McpRouter};

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 1024;

/// How long the writer gets to flush and send a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Close code sent when the server shuts down under a live session.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Per-session wiring shared by every connection.
#[derive(Clone)]
pub struct SessionContext {
    /// Connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Request router.
    pub router: Arc<McpRouter>,
    /// Keepalive interval.
    pub ping_interval: Duration,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Run a session for an authenticated client.
///
/// 1. Registers the connection (or refuses it at capacity)
/// 2. Queues the welcome envelope and starts the keepalive probe
/// 3. Dispatches each inbound request on its own task
/// 4. Deregisters exactly once on close, error, or shutdown
#[instrument(skip_all, fields(user = %identity.id))]
pub async fn run_ws_session(ws: WebSocket, identity: Identity, ctx: SessionContext) {
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(OUTBOUND_QUEUE);
    let connection = Arc::new(ClientConnection::new(identity, send_tx));
    let key = connection.key.clone();

    if !ctx.registry.add(connection.clone()).await {
        handshake::reject(ws, &HandshakeError::AtCapacity).await;
        return;
    }

    let connection_start = Instant::now();
    info!(key = %key, role = %connection.identity.role, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let welcome = ctx.router.welcome(&connection.identity).await;
    let _ = connection.send_envelope(&welcome);

    let (ws_tx, mut ws_rx) = ws.split();
    let outbound = tokio::spawn(write_outbound(ws_tx, send_rx, connection.liveness_token()));
    let keepalive = tokio::spawn(run_keepalive(connection.clone(), ctx.ping_interval));

    let mut in_flight = JoinSet::new();
    let mut close_frame = None;

    loop {
        let msg = tokio::select! {
            () = ctx.shutdown.cancelled() => {
                info!(key = %key, "server shutting down, closing session");
                close_frame = Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: Utf8Bytes::from_static("Server shutting down"),
                });
                break;
            }
            msg = ws_rx.next() => msg,
        };

        // reap finished request tasks
        while in_flight.try_join_next().is_some() {}

        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(key = %key, len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.record_pong();
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.as_ref().map(|f| f.code);
                info!(key = %key, ?code, "client sent close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "websocket read error");
                break;
            }
            None => break,
        };

        match McpRouter::route_inbound(&text) {
            Inbound::Request(request) => {
                let router = ctx.router.clone();
                let conn = connection.clone();
                let _ = in_flight.spawn(async move {
                    let response = router.dispatch(request).await;
                    if !conn.send_envelope(&response) {
                        debug!(id = %response.id, "response dropped, connection gone");
                    }
                });
            }
            Inbound::Pong => connection.record_pong(),
            Inbound::Reject(error) => {
                let _ = connection.send_envelope(&error);
            }
        }
    }

    let _ = ctx.registry.remove(&key).await;
    in_flight.abort_all();
    keepalive.abort();

    info!(key = %key, dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());

    finish_outbound(outbound, close_frame).await;
}

/// Single writer for one socket.
///
/// Drains the queue until the connection closes, flushing anything already
/// queued first, then hands the sink back.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    liveness: CancellationToken,
) -> SplitSink<WebSocket, Message> {
    loop {
        tokio::select! {
            biased;
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    break;
                }
            }
            () = liveness.cancelled() => break,
        }
    }
    ws_tx
}

async fn finish_outbound(
    outbound: tokio::task::JoinHandle<SplitSink<WebSocket, Message>>,
    close_frame: Option<CloseFrame>,
) {
    let abort = outbound.abort_handle();
    let closed = tokio::time::timeout(CLOSE_GRACE, async move {
        if let Ok(mut sink) = outbound.await {
            let _ = sink.send(Message::Close(close_frame)).await;
            let _ = sink.close().await;
        }
    })
    .await;
    if closed.is_err() {
        abort.abort();
        debug!("writer did not finish in time, aborted");
    }
}
