//! Prometheus Metrics Module
//!
//! Exposes hub metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Records forwarded and dropped per source
//! - **Dispatch**: Per-subscriber deliveries, overflow drops, pruned queues
//! - **Subscriptions**: Active subscription and connected source gauges
//! - **Adapters**: Fetch errors by source and error type
//! - **Latency**: Fan-out time per record
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Until
//! [`init_metrics`] installs the recorder every call here is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::HubMetrics;
use crate::domain::subscription::DispatchOutcome;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_hub_records_ingested_total",
        "Records forwarded from sources into the ingress queue"
    );
    describe_counter!(
        "quote_hub_ingress_dropped_total",
        "Records dropped because the ingress queue stayed full"
    );
    describe_counter!(
        "quote_hub_records_delivered_total",
        "Records written to subscriber queues"
    );
    describe_counter!(
        "quote_hub_records_dropped_total",
        "Records dropped because a subscriber queue was full"
    );
    describe_counter!(
        "quote_hub_subscribers_pruned_total",
        "Subscriber queues removed after their receiver went away"
    );

    describe_gauge!(
        "quote_hub_subscriptions",
        "Number of active subscriptions"
    );
    describe_gauge!(
        "quote_hub_connected_sources",
        "Number of sources currently streaming"
    );

    describe_counter!(
        "quote_hub_fetch_errors_total",
        "Failed upstream fetches by source and error type"
    );

    describe_histogram!(
        "quote_hub_dispatch_seconds",
        "Time to fan one record out to its subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a record forwarded into the ingress queue.
pub fn record_ingested(source: &str) {
    counter!(
        "quote_hub_records_ingested_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a record dropped at the ingress queue.
pub fn record_ingress_dropped(source: &str) {
    counter!(
        "quote_hub_ingress_dropped_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a fan-out pass.
pub fn record_dispatch(delivered: u64, dropped: u64, pruned: u64, duration: Duration) {
    if delivered > 0 {
        counter!("quote_hub_records_delivered_total").increment(delivered);
    }
    if dropped > 0 {
        counter!("quote_hub_records_dropped_total").increment(dropped);
    }
    if pruned > 0 {
        counter!("quote_hub_subscribers_pruned_total").increment(pruned);
    }
    histogram!("quote_hub_dispatch_seconds").record(duration.as_secs_f64());
}

/// Update the active subscription count.
pub fn set_subscriptions(count: f64) {
    gauge!("quote_hub_subscriptions").set(count);
}

/// Update the number of streaming sources.
pub fn set_connected_sources(count: f64) {
    gauge!("quote_hub_connected_sources").set(count);
}

/// Record a failed upstream fetch.
pub fn record_fetch_error(source: &str, error_type: &'static str) {
    counter!(
        "quote_hub_fetch_errors_total",
        "source" => source.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}

// =============================================================================
// Hub Sink
// =============================================================================

/// [`HubMetrics`] backed by the installed Prometheus recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

#[allow(clippy::cast_precision_loss)]
impl HubMetrics for PrometheusMetrics {
    fn record_ingested(&self, source: &str) {
        record_ingested(source);
    }

    fn record_ingress_dropped(&self, source: &str) {
        record_ingress_dropped(source);
    }

    fn record_dispatch(&self, outcome: DispatchOutcome, elapsed: Duration) {
        record_dispatch(
            outcome.delivered as u64,
            outcome.dropped as u64,
            outcome.closed as u64,
            elapsed,
        );
    }

    fn set_subscriptions(&self, count: usize) {
        set_subscriptions(count as f64);
    }

    fn set_connected_sources(&self, count: usize) {
        set_connected_sources(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_ingested("yahoo");
            record_dispatch(2, 1, 0, Duration::from_micros(40));
            record_fetch_error("yahoo", "status");
            set_subscriptions(3.0);
        });

        let output = handle.render();
        assert!(output.contains("quote_hub_records_ingested_total{source=\"yahoo\"} 1"));
        assert!(output.contains("quote_hub_records_delivered_total 2"));
        assert!(output.contains("quote_hub_records_dropped_total 1"));
        assert!(!output.contains("quote_hub_subscribers_pruned_total"));
        assert!(output.contains("error_type=\"status\""));
        assert!(output.contains("quote_hub_subscriptions 3"));
    }

    #[test]
    fn hub_sink_reports_to_prometheus() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let sink: &dyn HubMetrics = &PrometheusMetrics;

        metrics::with_local_recorder(&recorder, || {
            sink.record_ingress_dropped("feed");
            sink.record_dispatch(
                DispatchOutcome {
                    delivered: 0,
                    dropped: 0,
                    closed: 2,
                },
                Duration::from_micros(5),
            );
            sink.set_connected_sources(4);
        });

        let output = handle.render();
        assert!(output.contains("quote_hub_ingress_dropped_total{source=\"feed\"} 1"));
        assert!(output.contains("quote_hub_subscribers_pruned_total 2"));
        assert!(output.contains("quote_hub_connected_sources 4"));
    }
}
