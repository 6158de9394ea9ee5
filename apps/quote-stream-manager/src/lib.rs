#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Quote Stream Manager - Real-Time Quote Subscription Manager
//!
//! Maintains a single STOMP/WebSocket connection to a market-data broker
//! and reconciles reference-counted per-context subscriptions against an
//! external subscribe/unsubscribe quote proxy, feeding a latest-value
//! quote cache.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure subscription and quote types
//!   - `quote`: quote data and the latest-value cache
//!   - `subscription`: per-context wanted sets with reference counting
//!
//! - **Application**: Ports and orchestration
//!   - `ports`: broker and proxy contracts
//!   - `services`: the reconciler and the manager facade
//!
//! - **Infrastructure**: Adapters
//!   - `broker`: STOMP WebSocket client
//!   - `proxy`: proxy HTTP client
//!   - `config`: environment configuration
//!   - `telemetry`: tracing setup
//!
//! # Data Flow
//!
//! ```text
//! UI contexts ──set_codes──► Reconciler ──┬──► Proxy (HTTP subscribe/unsubscribe)
//!                                         └──► Broker (STOMP SUBSCRIBE/UNSUBSCRIBE)
//!
//! Broker ──MESSAGE /topic/stock/{code}──► Quote Cache ──broadcast──► UI contexts
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core subscription and quote types.
pub mod domain;

/// Application layer - Ports and orchestration services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::quote::{Quote, QuoteCache, TickerCode};
pub use domain::subscription::{
    ContextId, SubscriptionChanges, SubscriptionManager, SubscriptionStats,
};

// Ports
pub use application::ports::{BrokerControl, BrokerEvent, ProxyError, ProxyTransport, TopicHandle};

// Services
pub use application::services::{ContextToken, ManagerOptions, QuoteStreamManager, Reconciler};

// Broker adapter
pub use infrastructure::broker::{
    BrokerClientConfig, BrokerClientError, BrokerHandle, ReconnectConfig, StompBrokerClient,
};

// Proxy adapter
pub use infrastructure::proxy::HttpProxyClient;

// Configuration
pub use infrastructure::config::{BrokerSettings, ManagerConfig, ProxySettings};
