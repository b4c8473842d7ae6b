//! Market Data Record
//!
//! The canonical normalized tick every feed adapter produces. Records are
//! codec-agnostic, immutable once constructed, and cloned by value across
//! channel boundaries so producers and consumers never share mutable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A symbol string (stock ticker, index or currency pair).
pub type Symbol = String;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while constructing a [`MarketData`] record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketDataError {
    /// The symbol was empty or whitespace only.
    #[error("market data symbol cannot be empty")]
    EmptySymbol,
}

// =============================================================================
// Market Data
// =============================================================================

/// A normalized quote update.
///
/// `price` may be zero or stale; this layer never requires it to be
/// non-negative. `observed_at` is the feed's own timestamp when it supplies
/// one and is used for staleness checks downstream.
///
/// # Example
///
/// ```rust
/// use quote_hub::MarketData;
///
/// let tick = MarketData::new("AAPL", 189.25, 1_200).unwrap();
/// assert_eq!(tick.symbol(), "AAPL");
/// assert!(tick.observed_at().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MarketDataWire")]
pub struct MarketData {
    symbol: Symbol,
    price: f64,
    volume: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    observed_at: Option<DateTime<Utc>>,
}

/// Unchecked wire shape; every decode goes through [`MarketData::new`].
#[derive(Deserialize)]
struct MarketDataWire {
    symbol: Symbol,
    price: f64,
    volume: i64,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

impl TryFrom<MarketDataWire> for MarketData {
    type Error = MarketDataError;

    fn try_from(wire: MarketDataWire) -> Result<Self, Self::Error> {
        let record = Self::new(wire.symbol, wire.price, wire.volume)?;
        Ok(match wire.observed_at {
            Some(observed_at) => record.with_observed_at(observed_at),
            None => record,
        })
    }
}

impl MarketData {
    /// Create a record without a feed timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`MarketDataError::EmptySymbol`] if `symbol` is blank.
    pub fn new(symbol: impl Into<Symbol>, price: f64, volume: i64) -> Result<Self, MarketDataError> {
        let symbol = symbol.into();
        let trimmed = symbol.trim();
        if trimmed.is_empty() {
            return Err(MarketDataError::EmptySymbol);
        }

        Ok(Self {
            symbol: trimmed.to_string(),
            price,
            volume,
            observed_at: None,
        })
    }

    /// Attach the time the feed observed this quote.
    #[must_use]
    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    /// The instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Last traded / quoted price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Traded volume reported with the quote.
    #[must_use]
    pub const fn volume(&self) -> i64 {
        self.volume
    }

    /// Feed timestamp, if the feed supplied one.
    #[must_use]
    pub const fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.observed_at
    }

    /// Age of the quote relative to `now`.
    ///
    /// Returns `None` when the record carries no feed timestamp.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.observed_at.map(|observed| now - observed)
    }
}

// =============================================================================
// Tests
// =============================================================================
