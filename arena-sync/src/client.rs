//! WebSocket client connection to the relay.
//!
//! Provides:
//! - Connection lifecycle (`Disconnected → Connecting → Open → Disconnected`)
//! - Non-blocking state report sends
//! - A polled event queue for the caller's frame loop
//!
//! Reader and writer run on background tasks; nothing the application sees
//! is touched by them. Every event carries the generation of the connection
//! that produced it, and events from a connection that has since been closed
//! or replaced are dropped when polled.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

/// Events surfaced by [`SyncClient::poll_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An event from the relay
    Message(ServerMessage),
    /// The connection closed or failed
    Closed,
}

#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: SyncEvent,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// State reports per second
    pub publish_rate_hz: f64,
    /// Relay events buffered before the reader waits for the application
    pub event_buffer: usize,
    /// Outgoing reports buffered before new ones are dropped
    pub outgoing_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            publish_rate_hz: 20.0,
            event_buffer: 256,
            outgoing_buffer: 32,
        }
    }
}

impl ClientConfig {
    /// Minimum time between two state reports.
    ///
    /// Non-positive or non-finite rates fall back to the default rate.
    pub fn publish_interval(&self) -> Duration {
        let rate = if self.publish_rate_hz.is_finite() && self.publish_rate_hz > 0.0 {
            self.publish_rate_hz
        } else {
            ClientConfig::default().publish_rate_hz
        };
        Duration::from_secs_f64(1.0 / rate)
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}

/// A single relay connection.
pub struct SyncClient {
    config: ClientConfig,
    state: ConnectionState,
    /// Bumped on every connect and close
    generation: u64,
    endpoint: Option<String>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<Tagged>,
    event_rx: mpsc::Receiver<Tagged>,
    reader: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// Create a new, disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            config,
            state: ConnectionState::Disconnected,
            generation: 0,
            endpoint: None,
            outgoing_tx: None,
            event_tx,
            event_rx,
            reader: None,
        }
    }

    /// Connect to the relay, closing any previous connection first.
    ///
    /// Nothing is sent on open; the relay starts the session with a welcome.
    pub async fn connect(&mut self, endpoint: &str) -> Result<(), ClientError> {
        self.close();
        self.state = ConnectionState::Connecting;
        self.endpoint = Some(endpoint.to_string());

        let ws_stream = match tokio_tungstenite::connect_async(endpoint).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(source) => {
                self.state = ConnectionState::Disconnected;
                return Err(ClientError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                });
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.config.outgoing_buffer.max(1));
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: decode relay events into the event queue
        let event_tx = self.event_tx.clone();
        let generation = self.generation;
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(event) => {
                            let tagged = Tagged {
                                generation,
                                event: SyncEvent::Message(event),
                            };
                            if event_tx.send(tagged).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => log::debug!("Ignoring relay message: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        log::warn!("Relay connection error: {e}");
                        break;
                    }
                    Ok(_) => {}
                }
            }

            let _ = event_tx
                .send(Tagged {
                    generation,
                    event: SyncEvent::Closed,
                })
                .await;
        });

        self.outgoing_tx = Some(out_tx);
        self.reader = Some(reader);
        self.state = ConnectionState::Open;
        log::info!("Connected to relay at {endpoint}");
        Ok(())
    }

    /// Close the current connection.
    ///
    /// Returns `true` if a connection was open or being opened.
    pub fn close(&mut self) -> bool {
        let was_live = self.state != ConnectionState::Disconnected;
        self.generation += 1;
        // Dropping the sender lets the writer send a close frame and exit.
        self.outgoing_tx = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state = ConnectionState::Disconnected;

        if was_live {
            log::info!(
                "Closed relay connection to {}",
                self.endpoint.as_deref().unwrap_or("<unknown>")
            );
        }
        was_live
    }

    /// Next event of the current connection, without waiting.
    ///
    /// A [`SyncEvent::Closed`] moves the client to `Disconnected` and is
    /// returned at most once per connection.
    pub fn poll_event(&mut self) -> Option<SyncEvent> {
        loop {
            let tagged = self.event_rx.try_recv().ok()?;
            if tagged.generation != self.generation {
                continue;
            }

            if tagged.event == SyncEvent::Closed {
                if self.state == ConnectionState::Disconnected {
                    continue;
                }
                log::info!("Relay connection lost");
                self.state = ConnectionState::Disconnected;
                self.outgoing_tx = None;
                self.reader = None;
                self.generation += 1;
            }
            return Some(tagged.event);
        }
    }

    /// Queue a message without waiting.
    ///
    /// Returns `false` if the connection is not open or the outgoing buffer
    /// is full; the message is dropped in both cases.
    pub fn send(&self, message: &ClientMessage) -> bool {
        if self.state != ConnectionState::Open {
            return false;
        }
        let Some(tx) = &self.outgoing_tx else {
            return false;
        };
        match message.encode() {
            Ok(text) => tx.try_send(text).is_ok(),
            Err(e) => {
                log::error!("Failed to encode outgoing message: {e}");
                false
            }
        }
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Endpoint of the most recent connection attempt.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
