//! Service and source status tracking.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Service State
// =============================================================================

/// Lifecycle state of the [`MarketDataService`](super::MarketDataService).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Sources may be added; nothing is running.
    Created,
    /// Sources connected, ingestion and fan-out loops active.
    Running,
    /// Terminal: loops exited, sources disconnected, subscriptions closed.
    Stopped,
}

impl ServiceState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

// =============================================================================
// Source State
// =============================================================================

/// Connection state of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    /// Registered but not connected.
    Idle,
    /// Connected and its ingestion loop is draining the stream.
    Streaming,
    /// The stream ended on its own.
    Exhausted,
    /// Connection failed during start.
    Failed,
    /// Disconnected by stop or start rollback.
    Disconnected,
}

impl SourceState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Live counters for one source.
#[derive(Debug)]
pub struct SourceTracker {
    name: String,
    state: parking_lot::RwLock<SourceState>,
    connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    records_ingested: AtomicU64,
    ingress_dropped: AtomicU64,
}

impl SourceTracker {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: parking_lot::RwLock::new(SourceState::Idle),
            connected_at: parking_lot::RwLock::new(None),
            last_error: parking_lot::RwLock::new(None),
            records_ingested: AtomicU64::new(0),
            ingress_dropped: AtomicU64::new(0),
        }
    }

    /// The registered source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_state(&self, state: SourceState) {
        *self.state.write() = state;
        if state == SourceState::Streaming {
            *self.connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    /// Move to `state` unless the source already reached a final state.
    pub(crate) fn finish(&self, state: SourceState) {
        let mut current = self.state.write();
        if *current == SourceState::Streaming {
            *current = state;
        }
    }

    pub(crate) fn set_error(&self, message: String) {
        *self.state.write() = SourceState::Failed;
        *self.last_error.write() = Some(message);
    }

    pub(crate) fn increment_ingested(&self) {
        self.records_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_ingress_dropped(&self) {
        self.ingress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SourceState {
        *self.state.read()
    }

    /// Snapshot of this source's status.
    #[must_use]
    pub fn snapshot(&self) -> SourceStatus {
        SourceStatus {
            name: self.name.clone(),
            state: *self.state.read(),
            connected_at: *self.connected_at.read(),
            last_error: self.last_error.read().clone(),
            records_ingested: self.records_ingested.load(Ordering::Relaxed),
            ingress_dropped: self.ingress_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time status of one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// Registered name.
    pub name: String,
    /// Connection state.
    pub state: SourceState,
    /// When the source last connected.
    pub connected_at: Option<DateTime<Utc>>,
    /// Last connection error, if any.
    pub last_error: Option<String>,
    /// Records forwarded into the ingress queue.
    pub records_ingested: u64,
    /// Records dropped because the ingress queue stayed full.
    pub ingress_dropped: u64,
}

// =============================================================================
// Hub Statistics
// =============================================================================

/// Dispatch counters shared by the fan-out loop and the service.
#[derive(Debug, Default)]
pub struct HubCounters {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    pruned: AtomicU64,
}

impl HubCounters {
    pub(crate) fn record(&self, outcome: crate::domain::subscription::DispatchOutcome) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        self.pruned.fetch_add(outcome.closed as u64, Ordering::Relaxed);
    }

    pub(crate) fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn pruned(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }
}

/// Snapshot of hub-wide statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    /// Records forwarded by all ingestion loops.
    pub ingested: u64,
    /// Records dropped at the ingress queue.
    pub ingress_dropped: u64,
    /// Records taken off the ingress queue by the fan-out loop.
    pub dispatched: u64,
    /// Per-subscriber deliveries.
    pub delivered: u64,
    /// Per-subscriber drops due to full queues.
    pub dropped: u64,
    /// Subscriber queues removed because their receiver was gone.
    pub pruned: u64,
    /// Active subscriptions.
    pub subscriptions: usize,
    /// Symbols with at least one subscription.
    pub symbols: usize,
}

// =============================================================================
// Tests
// =============================================================================
