//! Broker Adapter
//!
//! STOMP-over-WebSocket client for the quote broker:
//!
//! - **frame**: STOMP 1.2 frame codec
//! - **messages**: inbound payload normalization
//! - **reconnect**: fixed-delay retry policy
//! - **client**: the connection task and its control handle

pub mod client;
pub mod frame;
pub mod messages;
pub mod reconnect;

pub use client::{BrokerClientConfig, BrokerClientError, BrokerHandle, StompBrokerClient};
pub use frame::{Command, Frame, FrameError};
pub use messages::{CodecError, QuoteMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
