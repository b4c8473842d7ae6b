//! Yahoo Finance Adapter
//!
//! Polls the Yahoo Finance quote endpoint and exposes the results as a
//! [`DataSource`](crate::application::ports::DataSource).
//!
//! # Endpoint
//!
//! `GET {base_url}/v7/finance/quote?symbols=AAPL,MSFT`, decoded from
//! `quoteResponse.result[]`:
//!
//! | Field | Record |
//! |-------|--------|
//! | `symbol` | symbol |
//! | `regularMarketPrice` | price |
//! | `regularMarketVolume` | volume (0 when absent) |
//! | `regularMarketTime` | observed at (unix seconds) |

mod backoff;
mod client;
mod source;

pub use backoff::{Backoff, BackoffConfig, DEFAULT_MAX_BACKOFF};
pub use client::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT, FetchError, QuoteClient};
pub use source::{DEFAULT_REFRESH_INTERVAL, OUTPUT_CAPACITY, YahooConfig, YahooQuoteSource};
