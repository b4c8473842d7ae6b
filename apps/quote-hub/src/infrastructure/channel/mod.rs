//! Channel Adapter
//!
//! A push-fed [`DataSource`]: records arrive through a [`FeedPublisher`]
//! instead of being fetched. Used for in-process feeds and in tests.
//!
//! # Disconnect
//!
//! `disconnect` first cancels in-flight publishes, then takes the write
//! lock (which waits for every publish that already holds the read lock)
//! and only then drops the sender. A publish therefore never writes into a
//! queue that is being closed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DataSource, MarketDataStream, SourceError};
use crate::domain::market_data::MarketData;

/// Consumer side of the current connection. Only changed while the sender
/// write lock is held.
#[derive(Debug)]
enum Link {
    Disconnected,
    Ready(mpsc::Receiver<MarketData>),
    Taken,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    sender: RwLock<Option<mpsc::Sender<MarketData>>>,
    cancel: parking_lot::Mutex<CancellationToken>,
    link: parking_lot::Mutex<Link>,
}

/// Push-fed source.
#[derive(Debug)]
pub struct ChannelSource {
    shared: Arc<Shared>,
}

/// Producer handle for a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    shared: Arc<Shared>,
}

impl ChannelSource {
    /// Create a source whose queue holds `capacity` records, and its
    /// publisher.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, FeedPublisher) {
        let shared = Arc::new(Shared {
            capacity: capacity.max(1),
            sender: RwLock::new(None),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            link: parking_lot::Mutex::new(Link::Disconnected),
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            FeedPublisher { shared },
        )
    }
}

#[async_trait]
impl DataSource for ChannelSource {
    async fn connect(&self) -> Result<(), SourceError> {
        let mut sender = self.shared.sender.write().await;
        if sender.is_some() {
            return Err(SourceError::AlreadyConnected);
        }

        let (tx, rx) = mpsc::channel(self.shared.capacity);
        *self.shared.cancel.lock() = CancellationToken::new();
        *self.shared.link.lock() = Link::Ready(rx);
        *sender = Some(tx);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        self.shared.cancel.lock().cancel();
        let sender = {
            let mut guard = self.shared.sender.write().await;
            *self.shared.link.lock() = Link::Disconnected;
            guard.take()
        };

        if sender.is_some() {
            tracing::debug!("Channel source disconnected");
        }
        Ok(())
    }

    fn stream(&self) -> Result<MarketDataStream, SourceError> {
        let mut link = self.shared.link.lock();
        match std::mem::replace(&mut *link, Link::Taken) {
            Link::Ready(rx) => Ok(Box::pin(ReceiverStream::new(rx))),
            Link::Taken => Err(SourceError::StreamTaken),
            Link::Disconnected => {
                *link = Link::Disconnected;
                Err(SourceError::NotConnected)
            }
        }
    }
}

impl FeedPublisher {
    /// Push a record, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::NotConnected` if the source is not connected or
    /// is disconnected while waiting.
    pub async fn publish(&self, record: MarketData) -> Result<(), SourceError> {
        let sender = self.shared.sender.read().await;
        let cancel = self.shared.cancel.lock().clone();
        let Some(tx) = sender.as_ref() else {
            return Err(SourceError::NotConnected);
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SourceError::NotConnected),
            sent = tx.send(record) => sent.map_err(|_| SourceError::NotConnected),
        }
    }

    /// Push a record without waiting.
    ///
    /// Returns `false` if the queue is full or the source is not connected.
    pub fn try_publish(&self, record: MarketData) -> bool {
        let Ok(sender) = self.shared.sender.try_read() else {
            return false;
        };
        sender
            .as_ref()
            .is_some_and(|tx| tx.try_send(record).is_ok())
    }

    /// Whether the source is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !matches!(*self.shared.link.lock(), Link::Disconnected)
    }
}

// =============================================================================
// Tests
// =============================================================================
