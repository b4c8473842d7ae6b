//! Fan-out loop.
//!
//! Takes records off the ingress queue one at a time and offers each to every
//! subscriber of its symbol without waiting. A slow subscriber loses records;
//! it never holds up the loop or its peers.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::status::HubCounters;
use crate::application::ports::HubMetrics;
use crate::domain::market_data::MarketData;
use crate::domain::subscription::SubscriberRegistry;

/// Run until the stop token fires or every ingestion loop has gone away.
pub(crate) async fn run_fanout(
    mut ingress: mpsc::Receiver<MarketData>,
    registry: Arc<SubscriberRegistry>,
    counters: Arc<HubCounters>,
    metrics: Arc<dyn HubMetrics>,
    cancel: CancellationToken,
) {
    tracing::debug!("Fan-out loop started");

    loop {
        let record = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = ingress.recv() => match next {
                Some(record) => record,
                None => {
                    tracing::debug!("Ingress queue closed");
                    break;
                }
            },
        };

        let started = Instant::now();
        let outcome = registry.dispatch(&record);
        counters.record(outcome);
        metrics.record_dispatch(outcome, started.elapsed());

        if outcome.dropped > 0 {
            tracing::debug!(
                symbol = record.symbol(),
                dropped = outcome.dropped,
                "Subscriber queues full, record dropped"
            );
        }
        if outcome.closed > 0 {
            metrics.set_subscriptions(registry.subscription_count());
        }
    }

    tracing::debug!("Fan-out loop stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ports::NoopMetrics;

    fn tick(symbol: &str, price: f64) -> MarketData {
        MarketData::new(symbol, price, 1).unwrap()
    }

    #[tokio::test]
    async fn delivers_to_matching_subscribers() {
        let registry = Arc::new(SubscriberRegistry::new(10));
        let counters = Arc::new(HubCounters::default());
        let mut aapl = registry.subscribe("AAPL");
        let mut msft = registry.subscribe("MSFT");

        let (tx, rx) = mpsc::channel(10);
        tx.send(tick("AAPL", 1.0)).await.unwrap();
        tx.send(tick("AAPL", 2.0)).await.unwrap();
        drop(tx);

        run_fanout(
            rx,
            Arc::clone(&registry),
            Arc::clone(&counters),
            Arc::new(NoopMetrics),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(aapl.try_recv().unwrap().price(), 1.0);
        assert_eq!(aapl.try_recv().unwrap().price(), 2.0);
        assert!(msft.try_recv().is_err());
        assert_eq!(counters.dispatched(), 2);
        assert_eq!(counters.delivered(), 2);
    }

    #[tokio::test]
    async fn counts_drops_for_full_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new(1));
        let counters = Arc::new(HubCounters::default());
        let mut sub = registry.subscribe("AAPL");

        let (tx, rx) = mpsc::channel(10);
        for price in [1.0, 2.0, 3.0] {
            tx.send(tick("AAPL", price)).await.unwrap();
        }
        drop(tx);

        run_fanout(
            rx,
            registry,
            Arc::clone(&counters),
            Arc::new(NoopMetrics),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(sub.try_recv().unwrap().price(), 1.0);
        assert!(sub.try_recv().is_err());
        assert_eq!(counters.delivered(), 1);
        assert_eq!(counters.dropped(), 2);
    }

    #[tokio::test]
    async fn stops_on_cancel_with_idle_ingress() {
        let registry = Arc::new(SubscriberRegistry::default());
        let counters = Arc::new(HubCounters::default());
        let (_tx, rx) = mpsc::channel::<MarketData>(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_fanout(
            rx,
            registry,
            counters,
            Arc::new(NoopMetrics),
            cancel.clone(),
        ));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("fan-out loop should observe cancellation")
            .unwrap();
    }
}
