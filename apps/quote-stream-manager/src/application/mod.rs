//! Application Layer - Port definitions and orchestration services.

/// Port interfaces for the broker connection and the quote proxy.
pub mod ports;

/// Reconciler and the manager facade handed to UI contexts.
pub mod services;
