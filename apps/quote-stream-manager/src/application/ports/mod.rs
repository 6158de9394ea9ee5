//! Port Interfaces
//!
//! Contracts between the reconciler and the transport adapters, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`BrokerControl`]: topic subscribe/unsubscribe on the shared broker
//!   connection
//! - [`ProxyTransport`]: HTTP subscribe/unsubscribe against the external
//!   quote proxy
//!
//! The broker adapter additionally emits [`BrokerEvent`]s on a channel the
//! manager consumes; events are the only inbound surface.

use async_trait::async_trait;

use crate::domain::quote::{Quote, TickerCode};

// =============================================================================
// Broker port
// =============================================================================

/// Opaque handle for one topic subscription on the broker connection.
///
/// Handles are single-session: a transport loss invalidates every
/// outstanding handle, and the reconciler obtains fresh ones on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicHandle(pub u64);

/// Control surface of the shared broker connection.
///
/// All methods are non-blocking: they enqueue work for the connection
/// task. `subscribe_topic` issued before the connection is up is queued
/// and flushed in FIFO order on connect.
#[cfg_attr(test, mockall::automock)]
pub trait BrokerControl: Send + Sync {
    /// Subscribe to the topic for one ticker code.
    fn subscribe_topic(&self, code: &str) -> TopicHandle;

    /// Drop one topic subscription.
    fn unsubscribe_topic(&self, handle: TopicHandle);

    /// Whether the transport session is currently established.
    fn is_connected(&self) -> bool;
}

/// Events emitted by the broker connection.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Transport session established and STOMP handshake completed.
    Connected,
    /// Transport session lost; all topic handles are now invalid.
    Disconnected,
    /// Waiting out the fixed delay before another connect attempt.
    Reconnecting {
        /// Connect attempt number since the last successful session.
        attempt: u32,
    },
    /// A quote arrived on a subscribed topic.
    Quote(Quote),
    /// A broker-level error was reported.
    Error(String),
}

// =============================================================================
// Proxy port
// =============================================================================

/// Errors surfaced by the proxy transport.
///
/// The reconciler never propagates these; they are logged and the next
/// periodic resync retries.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request could not be sent or the response not read.
    #[error("proxy request failed: {0}")]
    Request(String),

    /// The proxy answered with a non-success status.
    #[error("proxy returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("proxy response decode failed: {0}")]
    Decode(String),
}

/// HTTP surface of the external quote proxy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// Subscribe a batch of codes. Empty input is a no-op.
    async fn subscribe(&self, codes: &[TickerCode]) -> Result<(), ProxyError>;

    /// Unsubscribe a batch of codes. Empty input is a no-op: the proxy
    /// interprets an empty code list as "clear everything", which is only
    /// reachable through [`ProxyTransport::clear_all`].
    async fn unsubscribe(&self, codes: &[TickerCode]) -> Result<(), ProxyError>;

    /// Clear every subscription at the proxy. Invoked once at startup and
    /// once at teardown, never per-diff.
    async fn clear_all(&self) -> Result<(), ProxyError>;

    /// The proxy's actual subscription list, used by the periodic resync
    /// to replace the believed ledger with ground truth.
    async fn subscriptions(&self) -> Result<Vec<TickerCode>, ProxyError>;
}
