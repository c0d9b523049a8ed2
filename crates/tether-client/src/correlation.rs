//! Request/response correlation over a duplex text channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tether_core::{
    Envelope, EnvelopeKind, McpMethod, ResourceContents, ResourceInfo, ToolCallResult, ToolInfo,
    WELCOME_ID,
};
use tracing::{debug, instrument, warn};

use crate::errors::ClientError;
use crate::pending::PendingRequests;

/// Write half of the transport, as seen by the correlator.
pub trait OutboundChannel: Send + Sync {
    /// Whether the channel currently accepts frames.
    fn is_open(&self) -> bool;

    /// Queue one text frame.
    fn send_text(&self, text: String) -> Result<(), ClientError>;
}

/// What an inbound frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Settled a pending request.
    Settled,
    /// The post-handshake welcome envelope.
    Welcome(Envelope),
    /// A keepalive probe (already answered when a channel is attached).
    Ping,
    /// A pong; ignored.
    Pong,
    /// A terminal envelope nobody was waiting for (late, duplicate, or a
    /// handshake error).
    Unmatched(Envelope),
    /// Not a valid envelope.
    Malformed,
}

/// Assigns correlation ids and matches responses to callers.
///
/// The id counter belongs to the correlator, not to a connection, so ids
/// stay unique across reconnects.
pub struct Correlator {
    next_id: AtomicU64,
    pending: PendingRequests,
    channel: RwLock<Option<Arc<dyn OutboundChannel>>>,
    request_timeout: Duration,
}

impl Correlator {
    /// Create a correlator whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: PendingRequests::new(),
            channel: RwLock::new(None),
            request_timeout,
        }
    }

    /// Route outgoing frames through `channel`.
    pub fn attach(&self, channel: Arc<dyn OutboundChannel>) {
        *self.channel.write() = Some(channel);
    }

    /// Forget the current channel. Pending entries are kept and time out on
    /// their own.
    pub fn detach(&self) {
        *self.channel.write() = None;
    }

    /// Whether a channel is attached and open.
    pub fn is_open(&self) -> bool {
        self.channel.read().as_ref().is_some_and(|c| c.is_open())
    }

    /// Number of requests awaiting a terminal envelope.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_id(&self) -> String {
        format!("req_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn open_channel(&self) -> Option<Arc<dyn OutboundChannel>> {
        self.channel.read().clone().filter(|c| c.is_open())
    }

    /// Send a request and wait for its terminal envelope.
    ///
    /// Fails immediately with [`ClientError::NotConnected`] if the channel
    /// is not open; nothing is registered in that case. Error envelopes
    /// come back as [`ClientError::Remote`].
    #[instrument(skip(self, params), fields(id))]
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Envelope, ClientError> {
        let channel = self.open_channel().ok_or(ClientError::NotConnected)?;

        let id = self.next_id();
        let _ = tracing::Span::current().record("id", id.as_str());
        let text = Envelope::request(id.as_str(), method, params).to_text()?;

        let mut rx = self.pending.register(&id);
        let _release = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };
        if let Err(e) = channel.send_text(text) {
            warn!(id, error = %e, "send failed");
            return Err(e);
        }
        debug!(id, "request sent");

        match tokio::time::timeout(self.request_timeout, &mut rx).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_elapsed) => {
                if self.pending.remove(&id) {
                    warn!(id, timeout = ?self.request_timeout, "request timed out");
                    Err(ClientError::Timeout {
                        id,
                        after: self.request_timeout,
                    })
                } else {
                    // settled right at the deadline
                    rx.try_recv().unwrap_or(Err(ClientError::Closed))
                }
            }
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Pings are answered with a pong carrying the same id. Terminal
    /// envelopes settle their pending entry, if any.
    pub fn handle_inbound(&self, text: &str) -> InboundEvent {
        let envelope = match Envelope::parse(text) {
            Ok(e) => e,
            Err((id, err)) => {
                warn!(id, error = ?err, "malformed inbound frame");
                return InboundEvent::Malformed;
            }
        };
        match envelope.kind {
            EnvelopeKind::Ping => {
                self.answer_ping(&envelope.id);
                InboundEvent::Ping
            }
            EnvelopeKind::Pong => InboundEvent::Pong,
            EnvelopeKind::McpRequest => {
                debug!(id = %envelope.id, "ignoring request from server");
                InboundEvent::Unmatched(envelope)
            }
            EnvelopeKind::McpResponse | EnvelopeKind::Error => {
                if self.pending.contains(&envelope.id) && self.pending.resolve(envelope.clone()) {
                    InboundEvent::Settled
                } else if envelope.id == WELCOME_ID && envelope.kind == EnvelopeKind::McpResponse {
                    InboundEvent::Welcome(envelope)
                } else {
                    InboundEvent::Unmatched(envelope)
                }
            }
        }
    }

    fn answer_ping(&self, id: &str) {
        let Some(channel) = self.open_channel() else {
            return;
        };
        match Envelope::pong(id).to_text() {
            Ok(text) => {
                if let Err(e) = channel.send_text(text) {
                    debug!(error = %e, "pong not sent");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize pong"),
        }
    }

    /// `tools/list`
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, ClientError> {
        let env = self.send(McpMethod::TOOLS_LIST, None).await?;
        result_field(env, "tools")
    }

    /// `resources/list`
    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>, ClientError> {
        let env = self.send(McpMethod::RESOURCES_LIST, None).await?;
        result_field(env, "resources")
    }

    /// `resources/read`
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, ClientError> {
        let env = self
            .send(McpMethod::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await?;
        result_field(env, "contents")
    }

    /// `tools/call`
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ClientError> {
        let env = self
            .send(
                McpMethod::TOOLS_CALL,
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        let result = env
            .result
            .ok_or_else(|| ClientError::Protocol("response has no result".into()))?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Removes a pending entry when `send` returns or its future is dropped.
///
/// A no-op once the entry has been settled or timed out.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(&self.id) {
            debug!(id = %self.id, "request abandoned by caller");
        }
    }
}

fn result_field<T: DeserializeOwned>(envelope: Envelope, field: &str) -> Result<T, ClientError> {
    let value = envelope
        .result
        .and_then(|mut r| r.get_mut(field).map(Value::take))
        .ok_or_else(|| ClientError::Protocol(format!("result has no '{field}'")))?;
    Ok(serde_json::from_value(value)?)
}
