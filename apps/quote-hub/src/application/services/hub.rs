//! Market Data Service
//!
//! Owns the source list, the subscriber registry and the background loops,
//! and drives the lifecycle `Created → Running → Stopped`.
//!
//! # Start
//!
//! Sources connect in registration order and each hands out its stream right
//! away. If any source fails, every source already connected is disconnected
//! again, open subscriptions are closed and the service ends
//! up `Stopped`. No loop is spawned until every source has connected.
//!
//! # Stop
//!
//! Fires the stop token, disconnects every source concurrently (a hung source
//! never holds up the others), waits for the loops up to
//! `shutdown_timeout` (aborting stragglers) and closes every subscription.
//! Calling it again is a no-op.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::fanout::run_fanout;
use super::ingestion::{IngestionTask, run_ingestion};
use super::status::{
    HubCounters, HubStats, ServiceState, SourceState, SourceStatus, SourceTracker,
};
use crate::application::ports::{DataSource, HubMetrics, NoopMetrics, SourceError};
use crate::domain::subscription::{
    DEFAULT_SUBSCRIBER_BUFFER, SubscriberRegistry, Subscription, SubscriptionId,
};

/// Default capacity of the shared ingress queue.
pub const DEFAULT_INGRESS_CAPACITY: usize = 1000;

/// Default time an ingestion loop waits for ingress capacity.
pub const DEFAULT_INGRESS_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound on how long `stop` waits for sources and loops.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Hub tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of each subscriber queue.
    pub subscriber_buffer: usize,
    /// Capacity of the shared ingress queue.
    pub ingress_capacity: usize,
    /// How long an ingestion loop waits for ingress capacity before dropping.
    pub ingress_send_timeout: Duration,
    /// Bound on the whole stop sequence.
    pub shutdown_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            ingress_capacity: DEFAULT_INGRESS_CAPACITY,
            ingress_send_timeout: DEFAULT_INGRESS_SEND_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by [`MarketDataService`].
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A source failed to connect during `start`.
    #[error("source '{name}' failed to start: {reason}")]
    Startup {
        /// Registered name of the failing source.
        name: String,
        /// What the source reported.
        #[source]
        reason: SourceError,
    },

    /// The operation is not valid in the current state.
    #[error("cannot {operation} while {}", .state.as_str())]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the call.
        state: ServiceState,
    },

    /// The service has stopped.
    #[error("service is stopped")]
    Stopped,

    /// A source with this name is already registered.
    #[error("source '{0}' is already registered")]
    DuplicateSource(String),

    /// The subscription is not registered.
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// The symbol is empty.
    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
struct RegisteredSource {
    name: String,
    source: Arc<dyn DataSource>,
    tracker: Arc<SourceTracker>,
}

struct Inner {
    state: ServiceState,
    sources: Vec<RegisteredSource>,
}

/// Pub/sub hub for market data.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use quote_hub::{ChannelSource, HubConfig, MarketData, MarketDataService};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let service = MarketDataService::new(HubConfig::default());
/// let (source, publisher) = ChannelSource::new(16);
/// service.add_source("feed", Arc::new(source))?;
///
/// let mut sub = service.subscribe("AAPL")?;
/// service.start().await?;
///
/// publisher.publish(MarketData::new("AAPL", 190.5, 100)?).await?;
/// let record = sub.recv().await;
/// assert_eq!(record.map(|r| r.price()), Some(190.5));
///
/// service.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct MarketDataService {
    config: HubConfig,
    registry: Arc<SubscriberRegistry>,
    counters: Arc<HubCounters>,
    metrics: Arc<dyn HubMetrics>,
    inner: parking_lot::Mutex<Inner>,
    control: tokio::sync::Mutex<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl fmt::Debug for MarketDataService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MarketDataService")
            .field("state", &inner.state)
            .field(
                "sources",
                &inner.sources.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .field("subscriptions", &self.registry.subscription_count())
            .finish_non_exhaustive()
    }
}

impl Default for MarketDataService {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Drop for MarketDataService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl MarketDataService {
    /// Create a service in the `Created` state that records no metrics.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a service in the `Created` state reporting to `metrics`.
    #[must_use]
    pub fn with_metrics(config: HubConfig, metrics: Arc<dyn HubMetrics>) -> Self {
        let registry = Arc::new(SubscriberRegistry::new(config.subscriber_buffer));
        Self {
            config,
            registry,
            counters: Arc::new(HubCounters::default()),
            metrics,
            inner: parking_lot::Mutex::new(Inner {
                state: ServiceState::Created,
                sources: Vec::new(),
            }),
            control: tokio::sync::Mutex::new(()),
            tasks: parking_lot::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a source under a unique name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once the service has started and
    /// `DuplicateSource` if the name is taken.
    pub fn add_source(
        &self,
        name: impl Into<String>,
        source: Arc<dyn DataSource>,
    ) -> Result<(), HubError> {
        let name = name.into();
        let mut inner = self.inner.lock();

        if inner.state != ServiceState::Created {
            return Err(HubError::InvalidState {
                operation: "add source",
                state: inner.state,
            });
        }
        if inner.sources.iter().any(|s| s.name == name) {
            return Err(HubError::DuplicateSource(name));
        }

        tracing::debug!(source = %name, "Source registered");
        inner.sources.push(RegisteredSource {
            tracker: Arc::new(SourceTracker::new(name.clone())),
            name,
            source,
        });
        Ok(())
    }

    /// Connect every source and spawn the ingestion and fan-out loops.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the service is `Created`, and `Startup`
    /// if a source fails to connect; the service is `Stopped` afterwards.
    pub async fn start(&self) -> Result<(), HubError> {
        let _control = self.control.lock().await;

        let sources = {
            let mut inner = self.inner.lock();
            if inner.state != ServiceState::Created {
                return Err(HubError::InvalidState {
                    operation: "start",
                    state: inner.state,
                });
            }
            inner.state = ServiceState::Running;
            inner.sources.clone()
        };

        let mut streams = Vec::with_capacity(sources.len());
        for (index, entry) in sources.iter().enumerate() {
            tracing::info!(source = %entry.name, "Connecting source");

            let result = match entry.source.connect().await {
                Ok(()) => entry.source.stream().map_err(|e| (e, index + 1)),
                Err(e) => Err((e, index)),
            };

            match result {
                Ok(stream) => streams.push(stream),
                Err((reason, connected)) => {
                    tracing::error!(
                        source = %entry.name,
                        error = %reason,
                        "Source failed to start, rolling back"
                    );
                    self.abort_start(&sources[..connected]).await;
                    entry.tracker.set_error(reason.to_string());
                    return Err(HubError::Startup {
                        name: entry.name.clone(),
                        reason,
                    });
                }
            }
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(self.config.ingress_capacity.max(1));
        let mut handles = Vec::with_capacity(sources.len() + 1);

        handles.push(tokio::spawn(run_fanout(
            ingress_rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.counters),
            Arc::clone(&self.metrics),
            self.cancel.clone(),
        )));

        for (entry, stream) in sources.iter().zip(streams) {
            entry.tracker.set_state(SourceState::Streaming);
            handles.push(tokio::spawn(run_ingestion(IngestionTask {
                tracker: Arc::clone(&entry.tracker),
                stream,
                ingress: ingress_tx.clone(),
                cancel: self.cancel.clone(),
                send_timeout: self.config.ingress_send_timeout,
                metrics: Arc::clone(&self.metrics),
            })));
        }
        drop(ingress_tx);

        self.tasks.lock().extend(handles);

        self.metrics.set_connected_sources(sources.len());
        tracing::info!(sources = sources.len(), "Market data service started");
        Ok(())
    }

    /// Disconnect what `start` already connected and move to `Stopped`.
    async fn abort_start(&self, connected: &[RegisteredSource]) {
        let deadline = Instant::now() + self.config.shutdown_timeout;
        disconnect_all(connected, deadline).await;

        self.cancel.cancel();
        self.inner.lock().state = ServiceState::Stopped;
        let closed = self.registry.close_all();
        self.metrics.set_subscriptions(0);
        tracing::warn!(closed, "Market data service start aborted");
    }

    /// Stop the service. Idempotent.
    pub async fn stop(&self) {
        let _control = self.control.lock().await;

        let (previous, sources) = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            inner.state = ServiceState::Stopped;
            (previous, inner.sources.clone())
        };

        match previous {
            ServiceState::Stopped => return,
            ServiceState::Created => {
                self.cancel.cancel();
                let closed = self.registry.close_all();
                self.metrics.set_subscriptions(0);
                tracing::info!(closed, "Market data service stopped before start");
                return;
            }
            ServiceState::Running => {}
        }

        tracing::info!("Stopping market data service");
        self.cancel.cancel();
        let deadline = Instant::now() + self.config.shutdown_timeout;

        disconnect_all(&sources, deadline).await;

        let handles = std::mem::take(&mut *self.tasks.lock());
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!("Loop did not stop within shutdown timeout, aborting");
                handle.abort();
            }
        }

        let closed = self.registry.close_all();
        self.metrics.set_subscriptions(0);
        self.metrics.set_connected_sources(0);
        tracing::info!(closed, "Market data service stopped");
    }

    /// Register a subscriber for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSymbol` for an empty symbol and `Stopped` once the
    /// service has stopped.
    pub fn subscribe(&self, symbol: &str) -> Result<Subscription, HubError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(HubError::InvalidSymbol(symbol.to_string()));
        }

        let subscription = {
            let inner = self.inner.lock();
            if inner.state == ServiceState::Stopped {
                return Err(HubError::Stopped);
            }
            self.registry.subscribe(symbol)
        };

        self.metrics
            .set_subscriptions(self.registry.subscription_count());
        tracing::debug!(symbol, id = %subscription.id(), "Subscription added");
        Ok(subscription)
    }

    /// Remove a subscriber. Once this returns the subscription receives no
    /// further records.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` once the service has stopped and
    /// `UnknownSubscription` if the handle is not registered.
    pub fn unsubscribe(&self, subscription: &Subscription) -> Result<(), HubError> {
        {
            let inner = self.inner.lock();
            if inner.state == ServiceState::Stopped {
                return Err(HubError::Stopped);
            }
            if !self
                .registry
                .unsubscribe(subscription.id(), subscription.symbol())
            {
                return Err(HubError::UnknownSubscription(subscription.id()));
            }
        }

        self.metrics
            .set_subscriptions(self.registry.subscription_count());
        tracing::debug!(
            symbol = subscription.symbol(),
            id = %subscription.id(),
            "Subscription removed"
        );
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.inner.lock().state
    }

    /// Hub tuning in effect.
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Status of every registered source, in registration order.
    #[must_use]
    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        self.inner
            .lock()
            .sources
            .iter()
            .map(|s| s.tracker.snapshot())
            .collect()
    }

    /// Hub-wide statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let mut stats = HubStats {
            dispatched: self.counters.dispatched(),
            delivered: self.counters.delivered(),
            dropped: self.counters.dropped(),
            pruned: self.counters.pruned(),
            subscriptions: self.registry.subscription_count(),
            symbols: self.registry.symbol_count(),
            ..HubStats::default()
        };

        for status in self.source_statuses() {
            stats.ingested += status.records_ingested;
            stats.ingress_dropped += status.ingress_dropped;
        }
        stats
    }
}

/// Disconnect every source concurrently, each bounded by the same deadline.
async fn disconnect_all(sources: &[RegisteredSource], deadline: Instant) {
    futures::future::join_all(sources.iter().map(|entry| disconnect_source(entry, deadline)))
        .await;
}

async fn disconnect_source(entry: &RegisteredSource, deadline: Instant) {
    match tokio::time::timeout_at(deadline, entry.source.disconnect()).await {
        Ok(Ok(())) => {
            tracing::info!(source = %entry.name, "Source disconnected");
        }
        Ok(Err(error)) => {
            tracing::warn!(source = %entry.name, %error, "Source disconnect failed");
        }
        Err(_) => {
            tracing::warn!(source = %entry.name, "Source disconnect timed out");
        }
    }
    entry.tracker.set_state(SourceState::Disconnected);
}

// =============================================================================
// Tests
// =============================================================================
