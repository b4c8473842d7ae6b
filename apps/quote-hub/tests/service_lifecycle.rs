//! Service Lifecycle Integration Tests
//!
//! Drives `MarketDataService` end to end through push-fed channel sources:
//! delivery, per-source ordering, overflow drops and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use quote_hub::{
    ChannelSource, FeedPublisher, HubConfig, HubError, MarketData, MarketDataService,
    ServiceState, SourceState,
};

const WAIT: Duration = Duration::from_secs(2);

fn tick(symbol: &str, price: f64) -> MarketData {
    MarketData::new(symbol, price, 100).unwrap()
}

fn service_with_buffer(subscriber_buffer: usize) -> Arc<MarketDataService> {
    Arc::new(MarketDataService::new(HubConfig {
        subscriber_buffer,
        ..HubConfig::default()
    }))
}

fn add_feed(service: &MarketDataService, name: &str) -> FeedPublisher {
    let (source, publisher) = ChannelSource::new(64);
    service.add_source(name, Arc::new(source)).unwrap();
    publisher
}

/// Poll until the fan-out loop has dispatched `count` records.
async fn wait_for_dispatched(service: &MarketDataService, count: u64) {
    timeout(WAIT, async {
        while service.stats().dispatched < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fan-out did not catch up");
}

#[tokio::test]
async fn delivers_only_subscribed_symbol() {
    let service = service_with_buffer(16);
    let feed = add_feed(&service, "feed");
    service.start().await.unwrap();

    let mut aapl = service.subscribe("AAPL").unwrap();
    let mut msft = service.subscribe("MSFT").unwrap();

    feed.publish(tick("AAPL", 190.0)).await.unwrap();
    feed.publish(tick("GOOG", 140.0)).await.unwrap();

    let received = timeout(WAIT, aapl.recv()).await.unwrap().unwrap();
    assert_eq!(received.symbol(), "AAPL");
    assert_eq!(received.price(), 190.0);

    wait_for_dispatched(&service, 2).await;
    assert!(msft.try_recv().is_err());

    service.stop().await;
}

#[tokio::test]
async fn preserves_order_per_source() {
    let service = service_with_buffer(256);
    let first = add_feed(&service, "first");
    let second = add_feed(&service, "second");
    service.start().await.unwrap();

    let subscription = service.subscribe("SPY").unwrap();

    let publish = |feed: FeedPublisher, offset: f64| async move {
        for i in 0_u32..50 {
            feed.publish(tick("SPY", offset + f64::from(i))).await.unwrap();
        }
    };
    tokio::join!(publish(first, 0.0), publish(second, 1000.0));

    let records: Vec<MarketData> = timeout(WAIT, subscription.into_stream().take(100).collect())
        .await
        .unwrap();

    let from_first: Vec<f64> = records
        .iter()
        .map(MarketData::price)
        .filter(|p| *p < 1000.0)
        .collect();
    let from_second: Vec<f64> = records
        .iter()
        .map(MarketData::price)
        .filter(|p| *p >= 1000.0)
        .collect();

    assert_eq!(from_first.len(), 50);
    assert_eq!(from_second.len(), 50);
    assert!(from_first.windows(2).all(|w| w[0] < w[1]));
    assert!(from_second.windows(2).all(|w| w[0] < w[1]));

    service.stop().await;
}

#[tokio::test]
async fn slow_subscriber_loses_overflow_without_stalling_others() {
    let service = service_with_buffer(2);
    let feed = add_feed(&service, "feed");
    service.start().await.unwrap();

    let mut slow = service.subscribe("AAPL").unwrap();
    let mut fast = service.subscribe("AAPL").unwrap();

    feed.publish(tick("AAPL", 1.0)).await.unwrap();
    feed.publish(tick("AAPL", 2.0)).await.unwrap();
    wait_for_dispatched(&service, 2).await;

    // The fast subscriber drains; the slow one stays full.
    assert_eq!(fast.recv().await.unwrap().price(), 1.0);
    assert_eq!(fast.recv().await.unwrap().price(), 2.0);

    feed.publish(tick("AAPL", 3.0)).await.unwrap();
    wait_for_dispatched(&service, 3).await;

    assert_eq!(fast.recv().await.unwrap().price(), 3.0);
    assert_eq!(slow.len(), 2);
    assert_eq!(slow.try_recv().unwrap().price(), 1.0);
    assert_eq!(slow.try_recv().unwrap().price(), 2.0);
    assert!(slow.try_recv().is_err());

    let stats = service.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.delivered, 5);

    service.stop().await;
}

#[tokio::test]
async fn stop_closes_subscriptions_and_disconnects_sources() {
    let service = service_with_buffer(16);
    let feed = add_feed(&service, "feed");
    service.start().await.unwrap();
    assert!(feed.is_connected());

    let mut subscription = service.subscribe("AAPL").unwrap();
    feed.publish(tick("AAPL", 5.0)).await.unwrap();
    wait_for_dispatched(&service, 1).await;

    service.stop().await;

    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(!feed.is_connected());
    assert_err!(feed.publish(tick("AAPL", 6.0)).await);

    // Buffered records drain before end of stream.
    assert_eq!(subscription.recv().await.unwrap().price(), 5.0);
    assert!(subscription.recv().await.is_none());

    let statuses = service.source_statuses();
    assert_eq!(statuses[0].state, SourceState::Disconnected);
    assert!(matches!(service.subscribe("AAPL"), Err(HubError::Stopped)));
}

#[tokio::test]
async fn unsubscribe_while_records_flow() {
    let service = service_with_buffer(1024);
    let feed = add_feed(&service, "feed");
    service.start().await.unwrap();

    let keep = service.subscribe("QQQ").unwrap();
    let leave = service.subscribe("QQQ").unwrap();

    let producer = tokio::spawn({
        let feed = feed.clone();
        async move {
            for i in 0_u32..200 {
                feed.publish(tick("QQQ", f64::from(i))).await.unwrap();
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_ok!(service.unsubscribe(&leave));
    producer.await.unwrap();
    wait_for_dispatched(&service, 200).await;

    assert_eq!(keep.len(), 200);
    assert_eq!(service.stats().subscriptions, 1);
    assert!(matches!(
        service.unsubscribe(&leave),
        Err(HubError::UnknownSubscription(_))
    ));

    service.stop().await;
}

#[tokio::test]
async fn dropped_subscription_is_pruned() {
    let service = service_with_buffer(4);
    let feed = add_feed(&service, "feed");
    service.start().await.unwrap();

    let subscription = service.subscribe("IWM").unwrap();
    drop(subscription);

    feed.publish(tick("IWM", 1.0)).await.unwrap();
    wait_for_dispatched(&service, 1).await;

    let stats = service.stats();
    assert_eq!(stats.pruned, 1);
    assert_eq!(stats.subscriptions, 0);

    service.stop().await;
}
