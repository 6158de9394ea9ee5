//! Broker Payload Normalization
//!
//! One canonical schema at the boundary. The upstream feed script
//! forwards price fields as raw strings while the broker's own pushes use
//! JSON numbers, and the code field appears as either `code` or
//! `stockCode`; everything downstream of this module sees a single typed
//! shape and never branches on field spelling.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, de};

use crate::domain::quote::{Quote, TickerCode};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload was not valid JSON or missed a required field.
    #[error("quote payload decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Inbound quote payload: `{currentPrice, priceChange, changeRate, code}`.
///
/// Unknown extra fields are tolerated and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteMessage {
    /// Instrument code; the feed sometimes spells this `stockCode`.
    #[serde(alias = "stockCode")]
    pub code: TickerCode,
    /// Current traded price.
    #[serde(deserialize_with = "flexible_decimal")]
    pub current_price: Decimal,
    /// Absolute change versus the previous close.
    #[serde(deserialize_with = "flexible_decimal")]
    pub price_change: Decimal,
    /// Change rate versus the previous close, in percent.
    #[serde(deserialize_with = "flexible_decimal")]
    pub change_rate: Decimal,
}

impl QuoteMessage {
    /// Parse one broker message body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a JSON object of the expected
    /// shape; the caller drops the message and keeps the connection up.
    pub fn parse(body: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Convert into the canonical domain quote, stamped with arrival time.
    #[must_use]
    pub fn into_quote(self, received_at: DateTime<Utc>) -> Quote {
        Quote {
            code: self.code,
            price: self.current_price,
            price_change: self.price_change,
            change_rate: self.change_rate,
            received_at,
        }
    }
}

/// Accept a decimal as a JSON number or a decimal string.
fn flexible_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(serde_json::Number),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(number) => {
            Decimal::from_str(&number.to_string()).map_err(de::Error::custom)
        }
        Raw::Text(text) => Decimal::from_str(text.trim()).map_err(de::Error::custom),
    }
}
