//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the ports defined in the application
//! layer.

/// STOMP WebSocket client for the quote broker.
pub mod broker;

/// Configuration loading.
pub mod config;

/// HTTP adapter for the external quote proxy.
pub mod proxy;

/// Tracing initialization.
pub mod telemetry;
