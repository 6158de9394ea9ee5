//! Reconnection Policy
//!
//! Fixed-delay retry for the broker connection: constant backoff,
//! indefinite attempts, no circuit breaker. Quote staleness during the
//! wait is tolerable; giving up is not, because every live context still
//! wants its codes and the reconciler resubscribes them on reconnect.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Constant delay between connection attempts.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
        }
    }
}

/// Fixed-delay reconnection policy.
///
/// # Example
///
/// ```rust
/// use quote_stream_manager::infrastructure::broker::reconnect::{
///     ReconnectConfig, ReconnectPolicy,
/// };
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// let delay = policy.next_delay();
/// assert_eq!(policy.attempt_count(), 1);
///
/// // After a successful connection.
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// # let _ = delay;
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Record another attempt and return the delay to wait first.
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.config.delay
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts made since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}
