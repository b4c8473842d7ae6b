//! Per-source ingestion loop.
//!
//! Drains one source's stream into the shared ingress queue, preserving the
//! source's order. Every wait races the stop token, and a send into a full
//! ingress queue gives up after `send_timeout` and drops the record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::status::{SourceState, SourceTracker};
use crate::application::ports::{HubMetrics, MarketDataStream};
use crate::domain::market_data::MarketData;

/// Everything one ingestion loop owns.
pub(crate) struct IngestionTask {
    pub tracker: Arc<SourceTracker>,
    pub stream: MarketDataStream,
    pub ingress: mpsc::Sender<MarketData>,
    pub cancel: CancellationToken,
    pub send_timeout: Duration,
    pub metrics: Arc<dyn HubMetrics>,
}

enum Forward {
    Sent,
    TimedOut,
    Cancelled,
    Closed,
}

/// Run until the stream ends, the stop token fires or the fan-out loop goes away.
pub(crate) async fn run_ingestion(task: IngestionTask) {
    let IngestionTask {
        tracker,
        mut stream,
        ingress,
        cancel,
        send_timeout,
        metrics,
    } = task;

    tracing::debug!(source = tracker.name(), "Ingestion loop started");

    loop {
        let record = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracker.finish(SourceState::Disconnected);
                break;
            }
            next = stream.next() => {
                let Some(record) = next else {
                    tracker.finish(SourceState::Exhausted);
                    tracing::info!(source = tracker.name(), "Source stream exhausted");
                    break;
                };
                record
            }
        };

        match forward(&ingress, record, &cancel, send_timeout).await {
            Forward::Sent => {
                tracker.increment_ingested();
                metrics.record_ingested(tracker.name());
            }
            Forward::TimedOut => {
                tracker.increment_ingress_dropped();
                metrics.record_ingress_dropped(tracker.name());
                tracing::warn!(
                    source = tracker.name(),
                    timeout_ms = send_timeout.as_millis(),
                    "Ingress queue full, record dropped"
                );
            }
            Forward::Cancelled => {
                tracker.finish(SourceState::Disconnected);
                break;
            }
            Forward::Closed => {
                tracing::debug!(source = tracker.name(), "Ingress queue closed");
                break;
            }
        }
    }

    tracing::debug!(source = tracker.name(), "Ingestion loop stopped");
}

async fn forward(
    ingress: &mpsc::Sender<MarketData>,
    record: MarketData,
    cancel: &CancellationToken,
    send_timeout: Duration,
) -> Forward {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Forward::Cancelled,
        result = tokio::time::timeout(send_timeout, ingress.send(record)) => match result {
            Ok(Ok(())) => Forward::Sent,
            Ok(Err(_)) => Forward::Closed,
            Err(_) => Forward::TimedOut,
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::NoopMetrics;

    fn tick(symbol: &str, price: f64) -> MarketData {
        MarketData::new(symbol, price, 1).unwrap()
    }

    fn task(
        stream: MarketDataStream,
        ingress: mpsc::Sender<MarketData>,
        send_timeout: Duration,
    ) -> (IngestionTask, Arc<SourceTracker>, CancellationToken) {
        let tracker = Arc::new(SourceTracker::new("test"));
        tracker.set_state(SourceState::Streaming);
        let cancel = CancellationToken::new();
        (
            IngestionTask {
                tracker: Arc::clone(&tracker),
                stream,
                ingress,
                cancel: cancel.clone(),
                send_timeout,
                metrics: Arc::new(NoopMetrics),
            },
            tracker,
            cancel,
        )
    }

    #[tokio::test]
    async fn forwards_records_in_order() {
        let records = vec![tick("AAPL", 1.0), tick("AAPL", 2.0), tick("MSFT", 3.0)];
        let (tx, mut rx) = mpsc::channel(10);
        let (task, tracker, _cancel) = task(
            Box::pin(futures::stream::iter(records)),
            tx,
            Duration::from_secs(1),
        );

        run_ingestion(task).await;

        let prices: Vec<f64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|r| r.price())
            .collect();
        assert_eq!(prices, vec![1.0, 2.0, 3.0]);

        let status = tracker.snapshot();
        assert_eq!(status.state, SourceState::Exhausted);
        assert_eq!(status.records_ingested, 3);
    }

    #[tokio::test]
    async fn stops_when_cancelled_on_silent_source() {
        let (tx, _rx) = mpsc::channel(10);
        let (task, tracker, cancel) = task(
            Box::pin(futures::stream::pending::<MarketData>()),
            tx,
            Duration::from_secs(1),
        );

        let handle = tokio::spawn(run_ingestion(task));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ingestion loop should observe cancellation")
            .unwrap();
        assert_eq!(tracker.state(), SourceState::Disconnected);
    }

    #[tokio::test]
    async fn drops_records_when_ingress_stays_full() {
        let records = vec![tick("AAPL", 1.0), tick("AAPL", 2.0), tick("AAPL", 3.0)];
        let (tx, mut rx) = mpsc::channel(1);
        let (task, tracker, _cancel) = task(
            Box::pin(futures::stream::iter(records)),
            tx,
            Duration::from_millis(10),
        );

        run_ingestion(task).await;

        let status = tracker.snapshot();
        assert_eq!(status.records_ingested, 1);
        assert_eq!(status.ingress_dropped, 2);
        assert_eq!(rx.try_recv().unwrap().price(), 1.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_unblocks_full_ingress() {
        let records = vec![tick("AAPL", 1.0), tick("AAPL", 2.0)];
        let (tx, _rx) = mpsc::channel(1);
        let (task, tracker, cancel) = task(
            Box::pin(futures::stream::iter(records).chain(futures::stream::pending::<MarketData>())),
            tx,
            Duration::from_secs(3600),
        );

        let handle = tokio::spawn(run_ingestion(task));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("blocked send should observe cancellation")
            .unwrap();
        assert_eq!(tracker.snapshot().records_ingested, 1);
    }

    #[tokio::test]
    async fn exits_when_ingress_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (task, tracker, _cancel) = task(
            Box::pin(futures::stream::iter(vec![tick("AAPL", 1.0)]).chain(futures::stream::pending::<MarketData>())),
            tx,
            Duration::from_secs(1),
        );

        tokio::time::timeout(Duration::from_secs(1), run_ingestion(task))
            .await
            .expect("closed ingress should end the loop");
        assert_eq!(tracker.snapshot().records_ingested, 0);
    }
}
