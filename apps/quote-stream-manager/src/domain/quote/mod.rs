//! Quote Types and Cache
//!
//! The latest-value quote cache backing all renderers. Entries are
//! superseded wholesale by each newer message for the same code; nothing
//! is ever merged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Opaque ticker code identifying a tradable instrument (e.g. "005930").
pub type TickerCode = String;

/// A point-in-time quote for one instrument.
///
/// Produced by inbound broker messages, or seeded from a REST snapshot
/// before live data arrives. A seeded entry is overwritten, not merged,
/// by the first live message for its code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// Instrument code this quote belongs to.
    pub code: TickerCode,
    /// Current traded price.
    pub price: Decimal,
    /// Absolute change versus the previous close.
    pub price_change: Decimal,
    /// Change rate versus the previous close, in percent.
    pub change_rate: Decimal,
    /// Local arrival time of the message that produced this quote.
    pub received_at: DateTime<Utc>,
}

/// Latest quote per ticker code.
///
/// Last-write-wins by arrival order: the broker delivers per-topic FIFO,
/// and a single reader task applies messages in that order, so arrival
/// order is delivery order. Absent entries are reported as `None` and the
/// caller renders its own fallback (typically the last REST-fetched
/// price), never zero or blank.
#[derive(Debug, Default)]
pub struct QuoteCache {
    entries: RwLock<HashMap<TickerCode, Quote>>,
}

impl QuoteCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the latest quote for a code, if any has been seen.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<Quote> {
        self.entries.read().get(code).cloned()
    }

    /// Insert a quote, unconditionally overwriting any prior entry for
    /// the same code.
    pub fn insert(&self, quote: Quote) {
        self.entries.write().insert(quote.code.clone(), quote);
    }

    /// Number of codes with a cached quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no quotes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every cached quote.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Quote> {
        self.entries.read().values().cloned().collect()
    }
}
