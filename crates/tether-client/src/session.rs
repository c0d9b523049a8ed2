//! Client session: one logical connection kept alive across drops.
//!
//! A driver task owns the event stream. Each event goes through the
//! [`ReconnectSupervisor`]; the returned [`Action`] is carried out here
//! (dial, arm the timer). Every dial runs as its own connection task that
//! reports `Opened` and exactly one close event back to the driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tether_core::{EnvelopeKind, ResourceContents, ResourceInfo, ToolCallResult, ToolInfo};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlation::{Correlator, InboundEvent, OutboundChannel};
use crate::errors::ClientError;
use crate::reconnect::ReconnectSupervisor;
use crate::state::{Action, ConnectionEvent, ConnectionState, DELIBERATE_CLOSE_CODE};

const OUTBOUND_QUEUE: usize = 256;
const LOGOUT_REASON: &str = "User logged out";

/// Write half of one live socket.
struct WsOutbound {
    tx: mpsc::Sender<Message>,
    open: AtomicBool,
}

impl WsOutbound {
    /// Queue a close frame and stop accepting text. Only the first call
    /// sends anything.
    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_owned().into(),
            };
            let _ = self.tx.try_send(Message::Close(Some(frame)));
        }
    }
}

impl OutboundChannel for WsOutbound {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send_text(&self, text: String) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.tx
            .try_send(Message::Text(text.into()))
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}

struct Inner {
    config: ClientConfig,
    token: String,
    correlator: Correlator,
    supervisor: ReconnectSupervisor,
    current: Mutex<Option<Arc<WsOutbound>>>,
    welcome: RwLock<Option<Value>>,
    ended: CancellationToken,
}

impl Inner {
    fn on_text(&self, text: &str) {
        match self.correlator.handle_inbound(text) {
            InboundEvent::Welcome(envelope) => {
                info!("welcome received");
                *self.welcome.write() = envelope.result;
            }
            InboundEvent::Unmatched(envelope) if envelope.kind == EnvelopeKind::Error => {
                warn!(
                    id = %envelope.id,
                    error = envelope.error.as_deref().unwrap_or_default(),
                    "server reported an error"
                );
            }
            InboundEvent::Unmatched(envelope) => {
                debug!(id = %envelope.id, "unmatched envelope dropped");
            }
            InboundEvent::Settled | InboundEvent::Ping | InboundEvent::Pong => {}
            InboundEvent::Malformed => debug!("malformed frame dropped"),
        }
    }

    /// Forget `outbound` if it is still the live socket.
    fn release(&self, outbound: &Arc<WsOutbound>) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, outbound)) {
            *current = None;
            self.correlator.detach();
        }
    }
}

/// A self-reconnecting client connected to a tether server.
///
/// Dropping the session ends it the same way [`logout`](Self::logout) does.
pub struct ClientSession {
    inner: Arc<Inner>,
    driver: JoinHandle<()>,
}

impl ClientSession {
    /// Start connecting with `token` as the credential. Returns at once;
    /// use [`wait_for_state`](Self::wait_for_state) to wait for the channel.
    pub fn start(config: ClientConfig, token: impl Into<String>) -> Self {
        let inner = Arc::new(Inner {
            correlator: Correlator::new(config.request_timeout()),
            supervisor: ReconnectSupervisor::new(config.reconnect_delay()),
            config,
            token: token.into(),
            current: Mutex::new(None),
            welcome: RwLock::new(None),
            ended: CancellationToken::new(),
        });
        let (events, events_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(Arc::clone(&inner), events.clone(), events_rx));
        let _ = events.send(ConnectionEvent::Connect);
        Self { inner, driver }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.supervisor.subscribe()
    }

    /// Wait until the session reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut rx = self.subscribe();
        let _ = rx
            .wait_for(|s| *s == target)
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(())
    }

    /// Whether a channel is open.
    pub fn is_connected(&self) -> bool {
        self.inner.correlator.is_open()
    }

    /// Payload of the most recent welcome envelope.
    pub fn welcome(&self) -> Option<Value> {
        self.inner.welcome.read().clone()
    }

    /// Requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Send a raw request and return the `result` payload.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let envelope = self.inner.correlator.send(method, params).await?;
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    /// `tools/list`
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, ClientError> {
        self.inner.correlator.list_tools().await
    }

    /// `resources/list`
    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>, ClientError> {
        self.inner.correlator.list_resources().await
    }

    /// `resources/read`
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, ClientError> {
        self.inner.correlator.read_resource(uri).await
    }

    /// `tools/call`
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ClientError> {
        self.inner.correlator.call_tool(name, arguments).await
    }

    /// End the session: cancel any pending reconnect and close the channel
    /// with the deliberate close code. No further attempts are made.
    pub fn logout(&self) {
        if self.inner.ended.is_cancelled() {
            return;
        }
        info!("logging out");
        self.inner.ended.cancel();
        let _ = self.inner.supervisor.on_event(ConnectionEvent::Logout);
        let current = self.inner.current.lock().clone();
        if let Some(outbound) = current {
            outbound.close(DELIBERATE_CLOSE_CODE, LOGOUT_REASON);
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.logout();
        self.driver.abort();
    }
}

async fn drive(
    inner: Arc<Inner>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = inner.ended.cancelled() => break,
            event = events_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match inner.supervisor.on_event(event) {
            Some(Action::Dial) => {
                let _ = tokio::spawn(run_connection(Arc::clone(&inner), events.clone()));
            }
            Some(Action::ScheduleReconnect) => {
                let tx = events.clone();
                let _ = inner.supervisor.schedule(async move {
                    let _ = tx.send(ConnectionEvent::TimerFired);
                });
            }
            // carried out by the supervisor
            Some(Action::CancelTimer) | None => {}
        }
    }
    debug!("session driver stopped");
}

async fn run_connection(inner: Arc<Inner>, events: mpsc::UnboundedSender<ConnectionEvent>) {
    if inner.ended.is_cancelled() {
        return;
    }
    let url = inner.config.url_with_token(&inner.token);
    debug!(server = %inner.config.server_url, "dialing");
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(server = %inner.config.server_url, error = %e, "connect failed");
            let _ = events.send(ConnectionEvent::AbnormalClose);
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let outbound = Arc::new(WsOutbound {
        tx,
        open: AtomicBool::new(true),
    });

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    *inner.current.lock() = Some(Arc::clone(&outbound));
    inner.correlator.attach(outbound.clone());
    info!(server = %inner.config.server_url, "connected");
    let _ = events.send(ConnectionEvent::Opened);
    if inner.ended.is_cancelled() {
        outbound.close(DELIBERATE_CLOSE_CODE, LOGOUT_REASON);
    }

    let mut close_code = None;
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => inner.on_text(text.as_str()),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => inner.on_text(text),
                Err(_) => debug!("non-UTF-8 binary frame dropped"),
            },
            Ok(Message::Close(frame)) => {
                close_code = Some(frame.as_ref().map_or(1005, |f| u16::from(f.code)));
                debug!(code = ?close_code, "close frame received");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            }
        }
    }

    outbound.open.store(false, Ordering::Release);
    inner.release(&outbound);
    writer.abort();

    let event = if close_code == Some(DELIBERATE_CLOSE_CODE) {
        info!("connection closed deliberately");
        ConnectionEvent::DeliberateClose
    } else {
        warn!(code = ?close_code, "connection lost");
        ConnectionEvent::AbnormalClose
    };
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_config() -> ClientConfig {
        ClientConfig {
            // reserved port; dials fail fast
            server_url: "ws://127.0.0.1:1/ws".into(),
            request_timeout_ms: 1_000,
            reconnect_delay_ms: 3_000,
        }
    }

    #[tokio::test]
    async fn outbound_close_is_sent_once() {
        let (tx, mut rx) = mpsc::channel(4);
        let outbound = WsOutbound {
            tx,
            open: AtomicBool::new(true),
        };
        assert!(outbound.is_open());
        outbound.close(1000, "bye");
        outbound.close(1000, "bye");
        assert!(!outbound.is_open());
        assert!(matches!(outbound.send_text("x".into()), Err(ClientError::NotConnected)));

        match rx.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn outbound_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let outbound = WsOutbound {
            tx,
            open: AtomicBool::new(true),
        };
        drop(rx);
        assert!(!outbound.is_open());
    }

    #[tokio::test]
    async fn failed_dial_moves_to_reconnecting() {
        let session = ClientSession::start(unreachable_config(), "t");
        tokio::time::timeout(
            Duration::from_secs(2),
            session.wait_for_state(ConnectionState::Reconnecting),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(session.inner.supervisor.timer_pending());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn request_while_disconnected_fails_fast() {
        let session = ClientSession::start(unreachable_config(), "t");
        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn logout_while_reconnecting_cancels_timer() {
        let session = ClientSession::start(unreachable_config(), "t");
        session
            .wait_for_state(ConnectionState::Reconnecting)
            .await
            .unwrap();
        session.logout();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.inner.supervisor.timer_pending());

        // late events from the old connection change nothing
        let supervisor = &session.inner.supervisor;
        assert_eq!(supervisor.on_event(ConnectionEvent::TimerFired), None);
        assert_eq!(supervisor.on_event(ConnectionEvent::AbnormalClose), None);
        assert_eq!(supervisor.on_event(ConnectionEvent::Connect), None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let session = ClientSession::start(unreachable_config(), "t");
        session.logout();
        session.logout();
        tokio::task::yield_now().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.inner.supervisor.timer_pending());
    }
}
