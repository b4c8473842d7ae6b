//! Polling [`DataSource`] backed by [`QuoteClient`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use super::client::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT, QuoteClient};
use crate::application::ports::{DataSource, MarketDataStream, SourceError};
use crate::domain::market_data::{MarketData, Symbol};
use crate::infrastructure::metrics;

/// Capacity of the queue between the poll task and the stream.
pub const OUTPUT_CAPACITY: usize = 100;

/// Default time between polls.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Settings for one Yahoo poller.
#[derive(Debug, Clone)]
pub struct YahooConfig {
    /// Endpoint root, overridable for tests and proxies.
    pub base_url: String,
    /// Symbols requested on every poll.
    pub symbols: Vec<Symbol>,
    /// Time between successful polls.
    pub refresh_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            symbols: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct Connection {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    output: Option<mpsc::Receiver<MarketData>>,
}

/// Yahoo Finance quote poller.
///
/// `connect` spawns a task that polls every `refresh_interval` and pushes
/// records into a bounded queue; the stream reads from that queue. Failed
/// polls are logged, counted and retried with backoff. `disconnect` cancels
/// the task and waits for it, so the stream ends once buffered records are
/// drained.
pub struct YahooQuoteSource {
    name: String,
    config: YahooConfig,
    client: QuoteClient,
    connection: parking_lot::Mutex<Option<Connection>>,
}

impl std::fmt::Debug for YahooQuoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YahooQuoteSource")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("connected", &self.connection.lock().is_some())
            .finish()
    }
}

impl YahooQuoteSource {
    /// Create a poller named `name`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Configuration` if the HTTP client cannot be built
    /// or the refresh interval is zero.
    pub fn new(name: impl Into<String>, config: YahooConfig) -> Result<Self, SourceError> {
        if config.refresh_interval.is_zero() {
            return Err(SourceError::Configuration(
                "refresh interval must be positive".to_string(),
            ));
        }

        let client = QuoteClient::new(&config.base_url, config.request_timeout)
            .map_err(|e| SourceError::Configuration(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            config,
            client,
            connection: parking_lot::Mutex::new(None),
        })
    }

    /// Name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Symbols requested on every poll.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.config.symbols
    }
}

#[async_trait]
impl DataSource for YahooQuoteSource {
    async fn connect(&self) -> Result<(), SourceError> {
        if self.config.symbols.is_empty() {
            return Err(SourceError::Configuration(format!(
                "source '{}' has no symbols",
                self.name
            )));
        }

        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(SourceError::AlreadyConnected);
        }

        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(Poller {
            name: self.name.clone(),
            client: self.client.clone(),
            symbols: self.config.symbols.clone(),
            interval: self.config.refresh_interval,
            output: tx,
            cancel: cancel.clone(),
        }));

        *connection = Some(Connection {
            cancel,
            handle,
            output: Some(rx),
        });

        tracing::info!(
            source = %self.name,
            symbols = ?self.config.symbols,
            interval_ms = self.config.refresh_interval.as_millis(),
            "Yahoo poller started"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        let connection = self.connection.lock().take();
        let Some(connection) = connection else {
            return Ok(());
        };

        connection.cancel.cancel();
        if let Err(error) = connection.handle.await {
            tracing::warn!(source = %self.name, %error, "Yahoo poll task ended abnormally");
        }

        tracing::info!(source = %self.name, "Yahoo poller stopped");
        Ok(())
    }

    fn stream(&self) -> Result<MarketDataStream, SourceError> {
        let mut connection = self.connection.lock();
        let connection = connection.as_mut().ok_or(SourceError::NotConnected)?;
        let rx = connection.output.take().ok_or(SourceError::StreamTaken)?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// =============================================================================
// Poll Task
// =============================================================================

struct Poller {
    name: String,
    client: QuoteClient,
    symbols: Vec<Symbol>,
    interval: Duration,
    output: mpsc::Sender<MarketData>,
    cancel: CancellationToken,
}

/// Poll until cancelled or the stream is dropped. The task owns the only
/// sender, so the stream ends when it returns.
async fn poll_loop(poller: Poller) {
    let Poller {
        name,
        client,
        symbols,
        interval,
        output,
        cancel,
    } = poller;
    let mut backoff = Backoff::new(BackoffConfig::for_interval(interval));

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = client.fetch(&symbols) => result,
        };

        let delay = match result {
            Ok(records) => {
                backoff.reset();
                tracing::debug!(source = %name, records = records.len(), "Poll succeeded");

                for record in records {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        sent = output.send(record) => {
                            if sent.is_err() {
                                tracing::debug!(source = %name, "Stream dropped, poller exiting");
                                return;
                            }
                        }
                    }
                }
                interval
            }
            Err(error) => {
                metrics::record_fetch_error(&name, error.kind());
                let delay = backoff.next_delay();
                tracing::warn!(
                    source = %name,
                    %error,
                    failures = backoff.failures(),
                    retry_ms = delay.as_millis(),
                    "Poll failed"
                );
                delay
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}
