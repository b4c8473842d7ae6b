//! Domain Layer - Market data records and subscriber tracking.
//!
//! Pure types with no knowledge of feeds, configuration or transport.

/// The canonical market data record.
pub mod market_data;

/// Subscriber registry and subscription handles.
pub mod subscription;
