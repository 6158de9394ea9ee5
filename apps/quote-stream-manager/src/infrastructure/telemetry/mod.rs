//! Tracing Initialization
//!
//! Structured logging via `tracing` with an `EnvFilter`-driven fmt layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log filter (default: `quote_stream_manager=info`)

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// Safe to call once at startup; a second call is a no-op (the global
/// default can only be set once, and failure to set it again is ignored).
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quote_stream_manager=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
