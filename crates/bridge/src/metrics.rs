//! Prometheus metrics for the bridge
//!
//! Counters mirror the CounterTable at category granularity so dashboards
//! do not need to scrape the status endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_int_counter_vec, register_int_gauge_vec, Encoder, GaugeVec,
    IntCounterVec, IntGaugeVec, TextEncoder,
};

use mdbridge_model::Category;

/// Labels used for metrics
const LABEL_FEED: &str = "feed";
const LABEL_CATEGORY: &str = "category";

/// Total events routed per feed and category
static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdbridge_events_total",
        "Total market events routed by the bridge",
        &[LABEL_FEED, LABEL_CATEGORY]
    )
    .expect("Failed to register events_total metric")
});

/// Catalog write failures per feed and category
static WRITE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdbridge_write_failures_total",
        "Total catalog writes that failed",
        &[LABEL_FEED, LABEL_CATEGORY]
    )
    .expect("Failed to register write_failures_total metric")
});

/// Subscribe calls that failed per feed and category
static SUBSCRIPTION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdbridge_subscription_failures_total",
        "Total subscribe calls that failed",
        &[LABEL_FEED, LABEL_CATEGORY]
    )
    .expect("Failed to register subscription_failures_total metric")
});

/// Subscriptions currently active per feed
static ACTIVE_SUBSCRIPTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdbridge_active_subscriptions",
        "Number of active feed subscriptions",
        &[LABEL_FEED]
    )
    .expect("Failed to register active_subscriptions metric")
});

/// Feed connection status (1 = connected, 0 = disconnected)
static FEED_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdbridge_feed_connected",
        "Feed connection status (1=connected, 0=disconnected)",
        &[LABEL_FEED]
    )
    .expect("Failed to register feed_connected metric")
});

/// Last event timestamp (epoch seconds)
static LAST_EVENT_TIMESTAMP: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mdbridge_last_event_timestamp",
        "Unix timestamp of the last routed event",
        &[LABEL_FEED]
    )
    .expect("Failed to register last_event_timestamp metric")
});

/// Handle for recording metrics for one feed
#[derive(Clone)]
pub struct BridgeMetrics {
    feed: String,
}

impl BridgeMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    pub fn inc_event(&self, category: Category) {
        EVENTS_TOTAL
            .with_label_values(&[&self.feed, category.as_str()])
            .inc();
    }

    pub fn inc_write_failure(&self, category: Category) {
        self.add_write_failures(category, 1);
    }

    pub fn add_write_failures(&self, category: Category, n: u64) {
        WRITE_FAILURES_TOTAL
            .with_label_values(&[&self.feed, category.as_str()])
            .inc_by(n);
    }

    pub fn inc_subscription_failure(&self, category: Category) {
        SUBSCRIPTION_FAILURES_TOTAL
            .with_label_values(&[&self.feed, category.as_str()])
            .inc();
    }

    pub fn set_active_subscriptions(&self, count: usize) {
        ACTIVE_SUBSCRIPTIONS
            .with_label_values(&[&self.feed])
            .set(count as i64);
    }

    pub fn set_connected(&self, connected: bool) {
        FEED_CONNECTED
            .with_label_values(&[&self.feed])
            .set(i64::from(connected));
    }

    pub fn set_last_event(&self, epoch_secs: f64) {
        LAST_EVENT_TIMESTAMP
            .with_label_values(&[&self.feed])
            .set(epoch_secs);
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
