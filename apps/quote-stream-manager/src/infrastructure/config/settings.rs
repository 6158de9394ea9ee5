//! Manager Configuration Settings
//!
//! Configuration types for the quote stream manager, loaded from
//! environment variables with sensible localhost defaults.

use std::time::Duration;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// WebSocket URL of the broker endpoint.
    pub url: String,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Capacity of the broker event channel.
    pub event_channel_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8484/ws-stock/websocket".to_string(),
            reconnect_delay: Duration::from_secs(5),
            event_channel_capacity: 1_024,
        }
    }
}

/// Quote proxy settings.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Base URL of the subscribe/unsubscribe proxy.
    pub base_url: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
        }
    }
}

/// Complete manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Broker connection settings.
    pub broker: BrokerSettings,
    /// Quote proxy settings.
    pub proxy: ProxySettings,
    /// Interval between self-healing resync passes.
    pub resync_interval: Duration,
    /// Capacity of the quote update broadcast channel.
    pub update_channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            proxy: ProxySettings::default(),
            resync_interval: Duration::from_secs(30),
            update_channel_capacity: 1_024,
        }
    }
}

impl ManagerConfig {
    /// Create configuration from environment variables.
    ///
    /// Every variable is optional; unset or unparseable values fall back
    /// to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            broker: BrokerSettings {
                url: parse_env_string("QUOTE_BROKER_URL", defaults.broker.url),
                reconnect_delay: parse_env_duration_millis(
                    "QUOTE_RECONNECT_DELAY_MS",
                    defaults.broker.reconnect_delay,
                ),
                event_channel_capacity: parse_env_usize(
                    "QUOTE_EVENT_CHANNEL_CAPACITY",
                    defaults.broker.event_channel_capacity,
                ),
            },
            proxy: ProxySettings {
                base_url: parse_env_string("QUOTE_PROXY_URL", defaults.proxy.base_url),
            },
            resync_interval: parse_env_duration_secs(
                "QUOTE_RESYNC_INTERVAL_SECS",
                defaults.resync_interval,
            ),
            update_channel_capacity: parse_env_usize(
                "QUOTE_UPDATE_CHANNEL_CAPACITY",
                defaults.update_channel_capacity,
            ),
        }
    }
}

fn parse_env_string(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
