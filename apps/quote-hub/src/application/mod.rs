//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the hub service and the capability it needs from
//! feed adapters.

/// Port interfaces implemented by feed adapters.
pub mod ports;

/// The market data service and its background loops.
pub mod services;
