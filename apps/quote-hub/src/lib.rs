#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Hub - Market Data Pub/Sub
//!
//! Pulls quotes from any number of feed adapters into one bounded ingress
//! queue and fans each record out to every subscriber of its symbol. Slow
//! subscribers lose records instead of slowing the hub down.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core data types
//!   - `market_data`: The normalized quote record
//!   - `subscription`: Subscriber registry and dispatch
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The `DataSource` capability adapters implement
//!   - `services`: `MarketDataService` with its ingestion and fan-out loops
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `yahoo`: Yahoo Finance polling adapter
//!   - `channel`: Push-fed adapter for in-process feeds and tests
//!   - `config`: YAML configuration and environment overrides
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Source A ─► ingestion ─┐                            ┌─► Subscriber 1 (AAPL)
//!                        ├─► ingress queue ─► fan-out ─┼─► Subscriber 2 (AAPL)
//! Source B ─► ingestion ─┘     (bounded)     (try_send)└─► Subscriber 3 (MSFT)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{MarketData, MarketDataError, Symbol};
pub use domain::subscription::{
    DEFAULT_SUBSCRIBER_BUFFER, DispatchOutcome, SubscriberRegistry, Subscription, SubscriptionId,
};

// Ports
pub use application::ports::{DataSource, HubMetrics, MarketDataStream, NoopMetrics, SourceError};

// Service
pub use application::services::{
    HubConfig, HubError, HubStats, MarketDataService, ServiceState, SourceState, SourceStatus,
};

// Adapters
pub use infrastructure::channel::{ChannelSource, FeedPublisher};
pub use infrastructure::yahoo::{YahooConfig, YahooQuoteSource};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, DataSourceSettings, QuoteHubConfig, ServerSettings, ServiceSettings, load_config,
    load_config_from_str,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{PrometheusMetrics, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
