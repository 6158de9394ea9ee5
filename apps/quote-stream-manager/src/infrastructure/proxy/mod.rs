//! Quote Proxy HTTP Adapter
//!
//! Wraps the external subscribe/unsubscribe proxy. Requests are batched
//! per reconciliation cycle (`{"codes": [...]}`) rather than issued one
//! code at a time, and the proxy's "empty code list clears everything"
//! behavior is only reachable through [`HttpProxyClient::clear_all`].

use async_trait::async_trait;
use serde::Serialize;

use crate::application::ports::{ProxyError, ProxyTransport};
use crate::domain::quote::TickerCode;

/// Batched request body for subscribe/unsubscribe.
#[derive(Debug, Serialize)]
struct CodesBody<'a> {
    codes: &'a [TickerCode],
}

/// HTTP client for the external quote proxy.
pub struct HttpProxyClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProxyClient {
    /// Create a client for the proxy at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The configured proxy base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_codes(&self, path: &str, codes: &[TickerCode]) -> Result<(), ProxyError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CodesBody { codes })
            .send()
            .await
            .map_err(|e| ProxyError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProxyError::Status {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl ProxyTransport for HttpProxyClient {
    async fn subscribe(&self, codes: &[TickerCode]) -> Result<(), ProxyError> {
        if codes.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = codes.len(), "proxy subscribe");
        self.post_codes("/subscribe", codes).await
    }

    async fn unsubscribe(&self, codes: &[TickerCode]) -> Result<(), ProxyError> {
        // An empty code list would clear every subscription at the proxy,
        // including other live contexts'; that path is clear_all only.
        if codes.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = codes.len(), "proxy unsubscribe");
        self.post_codes("/unsubscribe", codes).await
    }

    async fn clear_all(&self) -> Result<(), ProxyError> {
        tracing::info!("clearing all proxy subscriptions");
        self.post_codes("/unsubscribe", &[]).await
    }

    async fn subscriptions(&self) -> Result<Vec<TickerCode>, ProxyError> {
        let url = format!("{}/subscriptions", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProxyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<Vec<TickerCode>>()
            .await
            .map_err(|e| ProxyError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = HttpProxyClient::new("http://localhost:5000/");
        assert_eq!(client.base_url(), "http://localhost:5000");
    }

    #[tokio::test]
    async fn empty_subscribe_is_a_noop() {
        // Unroutable base URL: a request would fail, a no-op succeeds.
        let client = HttpProxyClient::new("http://127.0.0.1:1");
        assert!(client.subscribe(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn empty_unsubscribe_never_reaches_the_proxy() {
        let client = HttpProxyClient::new("http://127.0.0.1:1");
        assert!(client.unsubscribe(&[]).await.is_ok());
    }

    #[test]
    fn codes_body_serializes_batched_form() {
        let codes = vec!["005930".to_string(), "000660".to_string()];
        let body = serde_json::to_string(&CodesBody { codes: &codes }).unwrap();
        assert_eq!(body, r#"{"codes":["005930","000660"]}"#);
    }
}
