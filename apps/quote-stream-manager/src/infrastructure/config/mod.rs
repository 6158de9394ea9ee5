//! Configuration Module
//!
//! Configuration loading for the quote stream manager.

mod settings;

pub use settings::{BrokerSettings, ManagerConfig, ProxySettings};
