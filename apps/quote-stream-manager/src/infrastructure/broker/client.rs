//! Broker WebSocket Client
//!
//! Maintains the single STOMP-over-WebSocket session all UI contexts
//! multiplex over, and maps ticker codes onto `/topic/stock/{code}`
//! subscriptions.
//!
//! # Lifecycle
//!
//! Disconnected → Connecting → Connected → (Disconnected on error, retry
//! after a fixed delay) → Closed on explicit shutdown.
//!
//! Subscribe commands issued before the first session is up are queued
//! and flushed in FIFO order on connect. After a transport loss the
//! session's topic registry is gone and commands issued while down are
//! discarded: the reconciler resubscribes the then-current wanted union
//! when the connection returns, which keeps stale topics from being
//! replayed and handles from being duplicated.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::frame::{Command, Frame, FrameError};
use super::messages::QuoteMessage;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{BrokerControl, BrokerEvent, TopicHandle};
use crate::domain::quote::TickerCode;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the broker client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerClientError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// STOMP framing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The broker rejected the session with an ERROR frame.
    #[error("broker rejected session: {0}")]
    Rejected(String),

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the broker client.
#[derive(Debug, Clone)]
pub struct BrokerClientConfig {
    /// WebSocket URL of the broker endpoint.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl BrokerClientConfig {
    /// Create a new configuration with default reconnection behavior.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Topic destination for one ticker code.
    #[must_use]
    pub fn destination(code: &str) -> String {
        format!("/topic/stock/{code}")
    }
}

// =============================================================================
// Commands and control handle
// =============================================================================

#[derive(Debug)]
enum BrokerCommand {
    Subscribe {
        handle: TopicHandle,
        code: TickerCode,
    },
    Unsubscribe {
        handle: TopicHandle,
    },
}

/// Cheap control surface handed to the reconciler.
///
/// Methods enqueue work for the connection task and never block.
pub struct BrokerHandle {
    cmd_tx: mpsc::UnboundedSender<BrokerCommand>,
    connected: Arc<AtomicBool>,
    next_handle: AtomicU64,
}

impl BrokerControl for BrokerHandle {
    fn subscribe_topic(&self, code: &str) -> TopicHandle {
        let handle = TopicHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let _ = self.cmd_tx.send(BrokerCommand::Subscribe {
            handle,
            code: code.to_string(),
        });
        handle
    }

    fn unsubscribe_topic(&self, handle: TopicHandle) {
        let _ = self.cmd_tx.send(BrokerCommand::Unsubscribe { handle });
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Broker Client
// =============================================================================

/// STOMP WebSocket client for the quote broker.
///
/// Manages the connection lifecycle: the CONNECT/CONNECTED handshake,
/// topic subscription commands, fixed-delay reconnection, and payload
/// normalization into [`BrokerEvent::Quote`]s.
pub struct StompBrokerClient {
    config: BrokerClientConfig,
    event_tx: mpsc::Sender<BrokerEvent>,
    cancel: CancellationToken,
    cmd_rx: mpsc::UnboundedReceiver<BrokerCommand>,
    connected: Arc<AtomicBool>,
    /// FIFO queue of commands issued before the first session.
    pending: VecDeque<BrokerCommand>,
    ever_connected: bool,
    /// Whether an established session is currently up, to distinguish a
    /// real transport loss from a failed connect attempt.
    session_up: bool,
}

impl StompBrokerClient {
    /// Create a client and its control handle.
    #[must_use]
    pub fn new(
        config: BrokerClientConfig,
        event_tx: mpsc::Sender<BrokerEvent>,
        cancel: CancellationToken,
    ) -> (Self, BrokerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let handle = BrokerHandle {
            cmd_tx,
            connected: Arc::clone(&connected),
            next_handle: AtomicU64::new(1),
        };

        let client = Self {
            config,
            event_tx,
            cancel,
            cmd_rx,
            connected,
            pending: VecDeque::new(),
            ever_connected: false,
            session_up: false,
        };

        (client, handle)
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Never returns an error today: transport failures retry
    /// indefinitely and only explicit shutdown ends the loop. The
    /// signature leaves room for a fatal configuration failure.
    pub async fn run(mut self) -> Result<(), BrokerClientError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("broker client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    self.connected.store(false, Ordering::SeqCst);
                    tracing::info!("broker connection closed gracefully");
                    return Ok(());
                }
                Err(error) => {
                    self.connected.store(false, Ordering::SeqCst);
                    tracing::warn!(%error, "broker connection error");

                    if self.ever_connected {
                        // Post-session commands are superseded by the
                        // reconciler's resubscribe on reconnect.
                        self.pending.clear();
                    }

                    // A failed connect attempt is not a session loss:
                    // Disconnected tells the reconciler its handles died.
                    if self.session_up {
                        self.session_up = false;
                        let _ = self.event_tx.send(BrokerEvent::Disconnected).await;
                    }

                    let delay = policy.next_delay();
                    let attempt = policy.attempt_count();
                    tracing::info!(attempt, delay_ms = delay.as_millis(), "reconnecting to broker");
                    let _ = self
                        .event_tx
                        .send(BrokerEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("broker client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, handshake, and process frames until error or cancellation.
    async fn connect_and_run(
        &mut self,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), BrokerClientError> {
        self.collect_offline_commands();

        tracing::info!(url = %self.config.url, "connecting to broker");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let host = host_of(&self.config.url);
        write
            .send(Message::Text(Frame::connect(&host).serialize().into()))
            .await?;

        if !self.await_connected(&mut read).await? {
            // Cancelled mid-handshake.
            return Ok(());
        }
        policy.reset();
        self.connected.store(true, Ordering::SeqCst);
        self.ever_connected = true;
        self.session_up = true;
        let _ = self.event_tx.send(BrokerEvent::Connected).await;

        // Per-session topic registry: handle -> subscription id suffix.
        let mut subs: HashMap<TopicHandle, TickerCode> = HashMap::new();

        // Flush requests queued before the session came up, in order.
        while let Some(cmd) = self.pending.pop_front() {
            Self::send_command(&mut write, &mut subs, cmd).await?;
        }

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write
                        .send(Message::Text(Frame::disconnect().serialize().into()))
                        .await;
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        // Control handle gone: nothing can subscribe anymore.
                        return Ok(());
                    };
                    Self::send_command(&mut write, &mut subs, cmd).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("server sent close frame");
                            return Err(BrokerClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(error)) => return Err(error.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(BrokerClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Wait for the CONNECTED frame that completes the handshake.
    ///
    /// Returns `Ok(false)` if cancelled before the handshake finished.
    async fn await_connected<R>(&self, read: &mut R) -> Result<bool, BrokerClientError>
    where
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(false),
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match Frame::parse(&text)? {
                                Some(frame) if frame.command == Command::Connected => {
                                    tracing::debug!(
                                        version = frame.header("version").unwrap_or("?"),
                                        "broker session established"
                                    );
                                    return Ok(true);
                                }
                                Some(frame) if frame.command == Command::Error => {
                                    return Err(BrokerClientError::Rejected(error_text(&frame)));
                                }
                                _ => {}
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => return Err(error.into()),
                        None => return Err(BrokerClientError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Handle one inbound text message.
    async fn handle_text(&self, text: &str) -> Result<(), BrokerClientError> {
        let frame = match Frame::parse(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()), // heart-beat
            Err(error) => {
                // A single garbled frame is dropped; the session stays up.
                tracing::warn!(%error, "dropping unparseable broker frame");
                return Ok(());
            }
        };

        match frame.command {
            Command::Message => {
                match QuoteMessage::parse(&frame.body) {
                    Ok(message) => {
                        let quote = message.into_quote(Utc::now());
                        let _ = self.event_tx.send(BrokerEvent::Quote(quote)).await;
                    }
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            destination = frame.header("destination").unwrap_or("?"),
                            "dropping malformed quote payload"
                        );
                    }
                }
                Ok(())
            }
            Command::Error => {
                let text = error_text(&frame);
                tracing::error!(error = %text, "broker error frame");
                let _ = self.event_tx.send(BrokerEvent::Error(text.clone())).await;
                // The broker closes the connection after an ERROR frame.
                Err(BrokerClientError::Rejected(text))
            }
            _ => Ok(()),
        }
    }

    /// Serialize one command onto the session.
    async fn send_command<W>(
        write: &mut W,
        subs: &mut HashMap<TopicHandle, TickerCode>,
        cmd: BrokerCommand,
    ) -> Result<(), BrokerClientError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: Into<BrokerClientError>,
    {
        match cmd {
            BrokerCommand::Subscribe { handle, code } => {
                let frame =
                    Frame::subscribe(&subscription_id(handle), &BrokerClientConfig::destination(&code));
                subs.insert(handle, code);
                write
                    .send(Message::Text(frame.serialize().into()))
                    .await
                    .map_err(Into::into)?;
            }
            BrokerCommand::Unsubscribe { handle } => {
                // Handles from a previous session are simply unknown here.
                if subs.remove(&handle).is_some() {
                    let frame = Frame::unsubscribe(&subscription_id(handle));
                    write
                        .send(Message::Text(frame.serialize().into()))
                        .await
                        .map_err(Into::into)?;
                } else {
                    tracing::debug!(handle = handle.0, "ignoring unsubscribe for unknown handle");
                }
            }
        }
        Ok(())
    }

    /// Absorb commands that arrived while no session was up.
    ///
    /// Before the first session they are queued for the FIFO flush; after
    /// a transport loss they are discarded because the reconciler
    /// resubscribes the wanted union itself.
    fn collect_offline_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if self.ever_connected {
                tracing::debug!(?cmd, "discarding command issued while disconnected");
            } else {
                self.pending.push_back(cmd);
            }
        }
    }
}

/// STOMP subscription id for a topic handle.
fn subscription_id(handle: TopicHandle) -> String {
    format!("sub-{}", handle.0)
}

/// Human-readable text of an ERROR frame.
fn error_text(frame: &Frame) -> String {
    frame
        .header("message")
        .map_or_else(|| frame.body.clone(), ToString::to_string)
}

/// Extract the host portion of a WebSocket URL for the CONNECT frame.
fn host_of(url: &str) -> String {
    url.trim_start_matches("ws://")
        .trim_start_matches("wss://")
        .split(['/', ':'])
        .next()
        .unwrap_or("localhost")
        .to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_formats_topic_path() {
        assert_eq!(
            BrokerClientConfig::destination("005930"),
            "/topic/stock/005930"
        );
    }

    #[test]
    fn subscription_ids_are_stable_per_handle() {
        assert_eq!(subscription_id(TopicHandle(7)), "sub-7");
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("ws://localhost:8484/ws-stock/websocket"), "localhost");
        assert_eq!(host_of("wss://quotes.example.com/ws"), "quotes.example.com");
        assert_eq!(host_of("ws://10.0.0.5:8484"), "10.0.0.5");
    }

    #[tokio::test]
    async fn handle_assigns_distinct_handles() {
        let (_client, handle) = StompBrokerClient::new(
            BrokerClientConfig::new("ws://localhost:8484/ws-stock/websocket"),
            mpsc::channel(8).0,
            CancellationToken::new(),
        );

        let first = handle.subscribe_topic("005930");
        let second = handle.subscribe_topic("000660");
        assert_ne!(first, second);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn commands_before_first_session_are_queued_fifo() {
        let (mut client, handle) = StompBrokerClient::new(
            BrokerClientConfig::new("ws://localhost:8484/ws-stock/websocket"),
            mpsc::channel(8).0,
            CancellationToken::new(),
        );

        let first = handle.subscribe_topic("005930");
        let _second = handle.subscribe_topic("000660");

        client.collect_offline_commands();
        assert_eq!(client.pending.len(), 2);
        assert!(matches!(
            client.pending.front(),
            Some(BrokerCommand::Subscribe { handle, .. }) if *handle == first
        ));
    }

    #[tokio::test]
    async fn commands_after_a_session_are_discarded_while_down() {
        let (mut client, handle) = StompBrokerClient::new(
            BrokerClientConfig::new("ws://localhost:8484/ws-stock/websocket"),
            mpsc::channel(8).0,
            CancellationToken::new(),
        );
        client.ever_connected = true;

        let _ = handle.subscribe_topic("005930");
        client.collect_offline_commands();

        assert!(client.pending.is_empty());
    }
}
