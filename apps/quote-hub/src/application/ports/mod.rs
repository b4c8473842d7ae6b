//! Port Interfaces
//!
//! Defines the capability every feed adapter implements and the sink the hub
//! reports its metrics to. The hub only depends on these traits; concrete
//! adapters (HTTP polling, push feeds, Prometheus, test fakes) live in the
//! infrastructure layer.
//!
//! ## Contract
//!
//! - `connect` starts whatever background activity produces records and
//!   returns without waiting for the first one. Connecting twice without an
//!   intervening `disconnect` is a usage error.
//! - `disconnect` stops production and ends the stream so a consumer
//!   eventually observes end-of-stream. It is safe to call when nothing was
//!   produced and is a no-op when not connected.
//! - `stream` hands out the record sequence once per connection. After it
//!   ends the adapter produces nothing more.
//! - Per-cycle fetch failures stay inside the adapter: it logs them and
//!   produces no records for that cycle instead of ending the stream.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::domain::market_data::MarketData;
use crate::domain::subscription::DispatchOutcome;

/// Sequence of records produced by a source.
pub type MarketDataStream = Pin<Box<dyn Stream<Item = MarketData> + Send>>;

/// Errors reported by a [`DataSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// `connect` was called on a source that is already connected.
    #[error("source is already connected")]
    AlreadyConnected,

    /// The operation needs a connected source.
    #[error("source is not connected")]
    NotConnected,

    /// The stream for this connection was already handed out.
    #[error("stream has already been taken")]
    StreamTaken,

    /// The source is misconfigured.
    #[error("invalid source configuration: {0}")]
    Configuration(String),

    /// The upstream connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// A market data feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Start producing records.
    async fn connect(&self) -> Result<(), SourceError>;

    /// Stop producing records and end the stream.
    async fn disconnect(&self) -> Result<(), SourceError>;

    /// Take the record stream for the current connection.
    fn stream(&self) -> Result<MarketDataStream, SourceError>;
}

/// Sink for hub metrics.
pub trait HubMetrics: Send + Sync {
    /// A record from `source` entered the ingress queue.
    fn record_ingested(&self, source: &str);

    /// A record from `source` was dropped at the full ingress queue.
    fn record_ingress_dropped(&self, source: &str);

    /// One record was fanned out.
    fn record_dispatch(&self, outcome: DispatchOutcome, elapsed: Duration);

    /// Active subscriptions changed.
    fn set_subscriptions(&self, count: usize);

    /// Streaming sources changed.
    fn set_connected_sources(&self, count: usize);
}

/// Discards every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl HubMetrics for NoopMetrics {
    fn record_ingested(&self, _source: &str) {}

    fn record_ingress_dropped(&self, _source: &str) {}

    fn record_dispatch(&self, _outcome: DispatchOutcome, _elapsed: Duration) {}

    fn set_subscriptions(&self, _count: usize) {}

    fn set_connected_sources(&self, _count: usize) {}
}
