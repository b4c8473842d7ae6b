//! Yahoo Poller Integration Tests
//!
//! Runs `YahooQuoteSource` against a mock quote endpoint, alone and inside
//! the service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::time::timeout;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quote_hub::{
    DataSource, HubConfig, MarketDataService, SourceError, SourceState, YahooConfig,
    YahooQuoteSource,
};

const WAIT: Duration = Duration::from_secs(5);

fn quote_body() -> serde_json::Value {
    json!({
        "quoteResponse": {
            "result": [
                {"symbol": "AAPL", "regularMarketPrice": 189.5, "regularMarketVolume": 1200, "regularMarketTime": 1_700_000_000},
                {"symbol": "MSFT", "regularMarketPrice": 410.25}
            ],
            "error": null
        }
    })
}

fn config(server: &MockServer) -> YahooConfig {
    YahooConfig {
        base_url: server.uri(),
        symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
        refresh_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(1),
    }
}

async fn mount_quotes(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .and(query_param("symbols", "AAPL,MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(quote_body()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn polled_quotes_reach_subscribers() {
    let server = MockServer::start().await;
    mount_quotes(&server).await;

    let service = Arc::new(MarketDataService::new(HubConfig::default()));
    let source = YahooQuoteSource::new("yahoo", config(&server)).unwrap();
    service.add_source("yahoo", Arc::new(source)).unwrap();

    let mut aapl = service.subscribe("AAPL").unwrap();
    let mut msft = service.subscribe("MSFT").unwrap();
    service.start().await.unwrap();

    let record = timeout(WAIT, aapl.recv()).await.unwrap().unwrap();
    assert_eq!(record.price(), 189.5);
    assert_eq!(record.volume(), 1200);
    assert_eq!(
        record.observed_at().map(|t| t.timestamp()),
        Some(1_700_000_000)
    );

    let record = timeout(WAIT, msft.recv()).await.unwrap().unwrap();
    assert_eq!(record.price(), 410.25);
    assert_eq!(record.volume(), 0);

    assert_eq!(service.source_statuses()[0].state, SourceState::Streaming);

    service.stop().await;
    assert_eq!(service.source_statuses()[0].state, SourceState::Disconnected);
}

#[tokio::test]
async fn recovers_after_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_quotes(&server).await;

    let source = YahooQuoteSource::new("yahoo", config(&server)).unwrap();
    source.connect().await.unwrap();
    let mut stream = source.stream().unwrap();

    let record = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(record.symbol(), "AAPL");

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() >= 2);

    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn undecodable_body_yields_nothing_until_fixed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_quotes(&server).await;

    let source = YahooQuoteSource::new("yahoo", config(&server)).unwrap();
    source.connect().await.unwrap();
    let mut stream = source.stream().unwrap();

    let record = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(record.symbol(), "AAPL");
    assert!(server.received_requests().await.unwrap().len() >= 3);

    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_ends_stream() {
    let server = MockServer::start().await;
    mount_quotes(&server).await;

    let source = YahooQuoteSource::new("yahoo", config(&server)).unwrap();
    source.connect().await.unwrap();
    let stream = source.stream().unwrap();

    source.disconnect().await.unwrap();

    // Whatever was buffered drains, then the stream ends.
    timeout(WAIT, stream.collect::<Vec<_>>()).await.unwrap();

    // Reconnecting starts a fresh poll task.
    source.connect().await.unwrap();
    let mut stream = source.stream().unwrap();
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_some());
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn connection_misuse_is_reported() {
    let server = MockServer::start().await;
    mount_quotes(&server).await;

    let source = YahooQuoteSource::new("yahoo", config(&server)).unwrap();
    assert_eq!(source.stream().err(), Some(SourceError::NotConnected));

    source.connect().await.unwrap();
    assert_eq!(source.connect().await, Err(SourceError::AlreadyConnected));

    let _stream = source.stream().unwrap();
    assert_eq!(source.stream().err(), Some(SourceError::StreamTaken));

    source.disconnect().await.unwrap();
    assert_eq!(source.disconnect().await, Ok(()));
}

#[tokio::test]
async fn rejects_unusable_configuration() {
    let server = MockServer::start().await;

    let err = YahooQuoteSource::new(
        "yahoo",
        YahooConfig {
            refresh_interval: Duration::ZERO,
            ..config(&server)
        },
    )
    .unwrap_err();
    assert!(matches!(err, SourceError::Configuration(_)));

    let source = YahooQuoteSource::new(
        "yahoo",
        YahooConfig {
            symbols: Vec::new(),
            ..config(&server)
        },
    )
    .unwrap();
    assert!(matches!(
        source.connect().await,
        Err(SourceError::Configuration(_))
    ));
}
