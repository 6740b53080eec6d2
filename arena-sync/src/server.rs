//! WebSocket relay: admission, state relaying and departure fan-out.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌── Outbox A ──► Client A
//!             ├── Relay ── Registry ───┼── Outbox B ──► Client B
//! Client B ──┘     (RwLock, one per    └── Outbox C ──► Client C
//!                   relay instance)
//! ```
//!
//! Each connection runs one task that multiplexes inbound frames and its own
//! outbox. Registry mutations happen under the write lock together with the
//! recipient snapshot for the event they cause; frames are enqueued after the
//! lock is released.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{fan_out, AtomicBroadcastStats, BroadcastStats, FanOutReport, Frame, Outbox};
use crate::protocol::{
    ClientMessage, ParticipantId, ParticipantSnapshot, ProtocolError, ServerMessage, Transform,
};
use crate::registry::{Admission, ParticipantRegistry};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// WebSocket endpoint path; other paths are refused during the handshake
    pub path: String,
    /// Frames buffered per connection before further frames are dropped
    pub outbox_capacity: usize,
    /// Transform given to newly admitted participants
    pub spawn: Transform,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8082".to_string(),
            path: "/ws".to_string(),
            outbox_capacity: 64,
            spawn: Transform::SPAWN,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_participants: usize,
    pub messages_received: u64,
    pub messages_discarded: u64,
    pub broadcast: BroadcastStats,
}

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Registry plus the operations that mutate it and fan out the result.
///
/// Transport-agnostic: a connection is represented by its [`Outbox`].
pub struct Relay {
    registry: RwLock<ParticipantRegistry>,
    total_connections: AtomicU64,
    messages_received: AtomicU64,
    messages_discarded: AtomicU64,
    broadcast_stats: AtomicBroadcastStats,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(Transform::SPAWN)
    }
}

impl Relay {
    pub fn new(spawn: Transform) -> Self {
        Self {
            registry: RwLock::new(ParticipantRegistry::new(spawn)),
            total_connections: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_discarded: AtomicU64::new(0),
            broadcast_stats: AtomicBroadcastStats::default(),
        }
    }

    /// Register a connection, queue its welcome and announce it to the rest.
    ///
    /// The welcome is queued on `connection` before the registry lock is
    /// released, so it is the first frame that connection ever receives.
    pub async fn admit(&self, connection: Outbox) -> Admission {
        let (admission, recipients) = {
            let mut registry = self.registry.write().await;
            let admission = registry.admit(connection.clone());
            let welcome = ServerMessage::welcome(
                admission.id.clone(),
                &admission.identity,
                admission.existing.clone(),
            );
            match welcome.encode() {
                Ok(text) => {
                    connection.deliver(Frame::from(text));
                }
                Err(e) => log::error!("Failed to encode welcome for {}: {e}", admission.id),
            }
            (admission, registry.recipients())
        };
        self.total_connections.fetch_add(1, Ordering::Relaxed);

        log::info!(
            "Participant {} ({}) joined, {} already present",
            admission.id,
            admission.identity.name,
            admission.existing.len()
        );

        let join = ServerMessage::join(admission.id.clone(), &admission.identity);
        self.send_to(&recipients, &join, Some(&admission.id));
        admission
    }

    /// Handle one raw frame from `sender`.
    ///
    /// Malformed frames are dropped without any reply; the error is returned
    /// only so the caller can log it.
    pub async fn handle_message(
        &self,
        sender: &ParticipantId,
        raw: &str,
    ) -> Result<FanOutReport, ProtocolError> {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        let result = self.apply_message(sender, raw).await;
        if result.is_err() {
            self.messages_discarded.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn apply_message(
        &self,
        sender: &ParticipantId,
        raw: &str,
    ) -> Result<FanOutReport, ProtocolError> {
        let ClientMessage::State(state) = ClientMessage::parse(raw)?;

        let recipients = {
            let mut registry = self.registry.write().await;
            if !registry.update_state(sender, state) {
                return Err(ProtocolError::UnknownSender(sender.clone()));
            }
            registry.recipients()
        };

        log::trace!("Relaying state of {sender}: {:?}", state.position);
        let event = ServerMessage::state(sender.clone(), state);
        Ok(self.send_to(&recipients, &event, Some(sender)))
    }

    /// Count a frame that could not even be read as text.
    pub fn discard_unreadable(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.messages_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Evict a participant and announce the departure.
    ///
    /// Returns `false`, without broadcasting, if `id` was already gone.
    pub async fn disconnect(&self, id: &ParticipantId) -> bool {
        let (removed, recipients) = {
            let mut registry = self.registry.write().await;
            match registry.remove(id) {
                Some(participant) => (participant, registry.recipients()),
                None => return false,
            }
        };

        log::info!(
            "Participant {} ({}) left, {} remaining",
            removed.id,
            removed.identity.name,
            recipients.len()
        );
        self.send_to(&recipients, &ServerMessage::leave(id.clone()), None);
        true
    }

    /// Send `event` to every open connection except `exclude`.
    pub async fn broadcast(
        &self,
        event: &ServerMessage,
        exclude: Option<&ParticipantId>,
    ) -> FanOutReport {
        let recipients = self.registry.read().await.recipients();
        self.send_to(&recipients, event, exclude)
    }

    fn send_to(
        &self,
        recipients: &[(ParticipantId, Outbox)],
        event: &ServerMessage,
        exclude: Option<&ParticipantId>,
    ) -> FanOutReport {
        let frame = match event.encode() {
            Ok(text) => Frame::from(text),
            Err(e) => {
                log::error!("Failed to encode {} event: {e}", event.kind());
                return FanOutReport::default();
            }
        };
        let report = fan_out(recipients, &frame, exclude);
        self.broadcast_stats.record(&report);
        report
    }

    pub async fn participant_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Current participants in admission order.
    pub async fn participants(&self) -> Vec<ParticipantSnapshot> {
        self.registry.read().await.snapshot(None)
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_participants: self.participant_count().await,
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            broadcast: self.broadcast_stats.snapshot(),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    relay: Arc<Relay>,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        let relay = Arc::new(Relay::new(config.spawn));
        Self { config, relay }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already established keep running on their own tasks.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        log::info!("Relay listening on ws://{local_addr}{}", self.config.path);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Relay on {local_addr} stopped accepting connections");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");

                    let relay = self.relay.clone();
                    let path = self.config.path.clone();
                    let capacity = self.config.outbox_capacity;

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, addr, relay, path, capacity).await
                        {
                            log::warn!("Connection error from {addr}: {e}");
                        }
                    });
                }
            }
        }
    }

    /// Handle a single WebSocket connection from handshake to teardown.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        relay: Arc<Relay>,
        path: String,
        outbox_capacity: usize,
    ) -> Result<(), RelayError> {
        let ws_stream =
            tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
                if request.uri().path() == path {
                    Ok(response)
                } else {
                    Err(not_found(request.uri().path()))
                }
            })
            .await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (outbox, mut outbox_rx) = Outbox::channel(outbox_capacity);
        let id = relay.admit(outbox).await.id;
        log::debug!("Connection {addr} registered as participant {id}");

        let outcome: Result<(), RelayError> = loop {
            tokio::select! {
                inbound = ws_receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = relay.handle_message(&id, text.as_str()).await {
                                log::debug!("Discarded message from {addr}: {e}");
                            }
                        }

                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => {
                                if let Err(e) = relay.handle_message(&id, text).await {
                                    log::debug!("Discarded message from {addr}: {e}");
                                }
                            }
                            Err(_) => {
                                relay.discard_unreadable();
                                log::debug!("Discarded non-UTF-8 frame from {addr}");
                            }
                        },

                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(payload)).await {
                                break Err(e.into());
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection closed from {addr}");
                            break Ok(());
                        }

                        Some(Ok(_)) => {}

                        Some(Err(e)) => break Err(e.into()),
                    }
                }

                outbound = outbox_rx.recv() => {
                    match outbound {
                        Some(frame) => {
                            if let Err(e) = ws_sender.send(Message::text(frame.to_string())).await {
                                break Err(e.into());
                            }
                        }
                        None => break Ok(()),
                    }
                }
            }
        };

        relay.disconnect(&id).await;
        let _ = ws_sender.close().await;
        outcome
    }

    /// Shared relay state.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> RelayStats {
        self.relay.stats().await
    }
}

fn not_found(path: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("no relay endpoint at {path}")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
