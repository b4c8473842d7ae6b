//! Application Services
//!
//! The hub itself and the loops it runs.
//!
//! - `MarketDataService`: lifecycle, source registration, subscriptions
//! - ingestion: one loop per source, source stream → ingress queue
//! - fan-out: ingress queue → subscriber queues, never blocking
//! - status: source trackers and hub statistics

mod fanout;
mod hub;
mod ingestion;
mod status;

pub use hub::{
    DEFAULT_INGRESS_CAPACITY, DEFAULT_INGRESS_SEND_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, HubConfig,
    HubError, MarketDataService,
};
pub use status::{HubStats, ServiceState, SourceState, SourceStatus, SourceTracker};
