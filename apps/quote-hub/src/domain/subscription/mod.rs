//! Subscriber Registry
//!
//! Tracks which subscriber queues are interested in which symbols and
//! dispatches records to them.
//!
//! # Design
//!
//! The registry maps a symbol to the set of sending halves of bounded
//! subscriber queues. The subscriber keeps the receiving half inside its
//! [`Subscription`] handle; the registry only ever sends into a queue or
//! removes it.
//!
//! Dispatch runs under the read lock, registration and removal under the
//! write lock. A removal therefore waits for any in-flight dispatch pass to
//! finish and no pass can start against a queue that has been removed. Sends
//! are `try_send` only: a full queue drops the record for that subscriber.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::domain::market_data::{MarketData, Symbol};

/// Default capacity of a subscriber queue.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 100;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Subscriber side of a registered queue.
///
/// Yields records for one symbol until the subscription is removed or the
/// hub stops, after which [`Subscription::recv`] drains what is buffered and
/// then returns `None`.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    symbol: Symbol,
    receiver: mpsc::Receiver<MarketData>,
}

impl Subscription {
    /// The subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The symbol this subscription receives.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Wait for the next record.
    pub async fn recv(&mut self) -> Option<MarketData> {
        self.receiver.recv().await
    }

    /// Take the next buffered record without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] when nothing is buffered and
    /// [`TryRecvError::Disconnected`] once the queue has been closed.
    pub fn try_recv(&mut self) -> Result<MarketData, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Number of records currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no record is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Convert into a `Stream` of records.
    ///
    /// The registry entry stays in place until it is pruned after the stream
    /// is dropped or the hub stops.
    #[must_use]
    pub fn into_stream(self) -> ReceiverStream<MarketData> {
        ReceiverStream::new(self.receiver)
    }
}

/// Result of dispatching one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Queues the record was written to.
    pub delivered: usize,
    /// Queues that were full, so the record was dropped for them.
    pub dropped: usize,
    /// Queues whose receiver was gone; these are pruned.
    pub closed: usize,
}

// =============================================================================
// Subscriber Registry
// =============================================================================

/// Symbol to subscriber-queue mapping.
///
/// # Example
///
/// ```rust
/// use quote_hub::{MarketData, SubscriberRegistry};
///
/// let registry = SubscriberRegistry::new(8);
/// let mut sub = registry.subscribe("AAPL");
///
/// let outcome = registry.dispatch(&MarketData::new("AAPL", 190.0, 5).unwrap());
/// assert_eq!(outcome.delivered, 1);
/// assert_eq!(sub.try_recv().unwrap().symbol(), "AAPL");
///
/// assert!(registry.unsubscribe(sub.id(), sub.symbol()));
/// assert_eq!(registry.subscription_count(), 0);
/// ```
#[derive(Debug)]
pub struct SubscriberRegistry {
    capacity: usize,
    symbols: RwLock<HashMap<Symbol, HashMap<SubscriptionId, mpsc::Sender<MarketData>>>>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl SubscriberRegistry {
    /// Create a registry whose queues hold `capacity` records each.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Capacity of each subscriber queue.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new queue for `symbol`.
    pub fn subscribe(&self, symbol: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = SubscriptionId::new();

        self.symbols
            .write()
            .entry(symbol.to_string())
            .or_default()
            .insert(id, tx);

        Subscription {
            id,
            symbol: symbol.to_string(),
            receiver: rx,
        }
    }

    /// Remove a queue.
    ///
    /// Returns `false` if the subscription was not registered. Once this
    /// returns no dispatch writes to the queue again, and dropping the sender
    /// lets the receiver observe completion after draining.
    pub fn unsubscribe(&self, id: SubscriptionId, symbol: &str) -> bool {
        let mut symbols = self.symbols.write();

        let Some(subscribers) = symbols.get_mut(symbol) else {
            return false;
        };

        let removed = subscribers.remove(&id).is_some();

        // Clean up empty symbol entry
        if subscribers.is_empty() {
            symbols.remove(symbol);
        }

        removed
    }

    /// Offer `record` to every queue registered for its symbol.
    ///
    /// Never waits on a subscriber.
    pub fn dispatch(&self, record: &MarketData) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut closed = Vec::new();

        {
            let symbols = self.symbols.read();
            let Some(subscribers) = symbols.get(record.symbol()) else {
                return outcome;
            };

            for (id, tx) in subscribers {
                match tx.try_send(record.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(TrySendError::Full(_)) => outcome.dropped += 1,
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            outcome.closed = self.prune(record.symbol(), &closed);
        }

        outcome
    }

    /// Drop every queue; receivers observe completion.
    ///
    /// Returns the number of subscriptions closed.
    pub fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.symbols.write());
        drained.values().map(HashMap::len).sum()
    }

    /// Number of subscriptions for `symbol`.
    #[must_use]
    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.symbols.read().get(symbol).map_or(0, HashMap::len)
    }

    /// Total number of subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.symbols.read().values().map(HashMap::len).sum()
    }

    /// Number of symbols with at least one subscription.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.read().len()
    }

    /// Symbols with at least one subscription.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.symbols.read().keys().cloned().collect()
    }

    fn prune(&self, symbol: &str, ids: &[SubscriptionId]) -> usize {
        let mut symbols = self.symbols.write();
        let Some(subscribers) = symbols.get_mut(symbol) else {
            return 0;
        };

        let pruned = ids
            .iter()
            .filter(|id| subscribers.remove(*id).is_some())
            .count();

        if subscribers.is_empty() {
            symbols.remove(symbol);
        }

        tracing::debug!(symbol, pruned, "Pruned closed subscriber queues");
        pruned
    }
}

// =============================================================================
// Tests
// =============================================================================
