//! Yahoo Finance quote client.
//!
//! One `GET {base_url}/v7/finance/quote?symbols=A,B` per poll. Entries
//! without a symbol or a price are skipped; the rest become [`MarketData`].

use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;

use crate::domain::market_data::{MarketData, Symbol};

/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const QUOTE_PATH: &str = "/v7/finance/quote";

// =============================================================================
// Errors
// =============================================================================

/// A failed poll.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request never got a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The body was not a quote response.
    #[error("invalid quote response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the quote endpoint.
#[derive(Debug, Clone)]
pub struct QuoteClient {
    client: reqwest::Client,
    url: String,
}

impl QuoteClient {
    /// Build a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("quote-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}{QUOTE_PATH}", base_url.trim_end_matches('/')),
        })
    }

    /// Fetch the latest quotes for `symbols`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] for transport failures, non-2xx responses and
    /// bodies that do not decode.
    pub async fn fetch(&self, symbols: &[Symbol]) -> Result<Vec<MarketData>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        decode_quotes(&body)
    }
}

// =============================================================================
// Response
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteEnvelope {
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    result: Option<Vec<QuoteEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteEntry {
    symbol: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_volume: Option<i64>,
    regular_market_time: Option<i64>,
}

impl QuoteEntry {
    fn into_market_data(self) -> Option<MarketData> {
        let price = self.regular_market_price?;
        let record =
            MarketData::new(self.symbol?, price, self.regular_market_volume.unwrap_or(0)).ok()?;

        Some(
            match self
                .regular_market_time
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
            {
                Some(observed_at) => record.with_observed_at(observed_at),
                None => record,
            },
        )
    }
}

/// Decode a quote response body into records.
pub(crate) fn decode_quotes(body: &[u8]) -> Result<Vec<MarketData>, FetchError> {
    let envelope: QuoteEnvelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    Ok(envelope
        .quote_response
        .result
        .unwrap_or_default()
        .into_iter()
        .filter_map(QuoteEntry::into_market_data)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_quote_entries() {
        let body = br#"{
            "quoteResponse": {
                "result": [
                    {"symbol": "AAPL", "regularMarketPrice": 189.5, "regularMarketVolume": 1200, "regularMarketTime": 1700000000},
                    {"symbol": "MSFT", "regularMarketPrice": 410.0}
                ],
                "error": null
            }
        }"#;

        let records = decode_quotes(body).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].symbol(), "AAPL");
        assert_eq!(records[0].price(), 189.5);
        assert_eq!(records[0].volume(), 1200);
        assert_eq!(
            records[0].observed_at().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
        assert_eq!(records[1].volume(), 0);
        assert!(records[1].observed_at().is_none());
    }

    #[test]
    fn skips_entries_without_symbol_or_price() {
        let body = br#"{"quoteResponse": {"result": [
            {"regularMarketPrice": 1.0},
            {"symbol": "AAPL"},
            {"symbol": "  ", "regularMarketPrice": 2.0},
            {"symbol": "MSFT", "regularMarketPrice": 3.0}
        ]}}"#;

        let records = decode_quotes(body).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol(), "MSFT");
    }

    #[test]
    fn null_result_yields_nothing() {
        let body = br#"{"quoteResponse": {"result": null, "error": {"code": "x"}}}"#;
        assert!(decode_quotes(body).unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_body() {
        let err = decode_quotes(b"<html>").unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn builds_url_from_base() {
        let client = QuoteClient::new("http://localhost:9000/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(client.url, "http://localhost:9000/v7/finance/quote");
    }
}
