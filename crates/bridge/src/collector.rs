use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use mdbridge_catalog::{Catalog, LostRecords};
use mdbridge_model::{BarType, InstrumentId, MarketEvent};

use crate::counters::CounterTable;
use crate::identifiers::IdentifierResolver;
use crate::router::{EventRouter, RouteOutcome};
use crate::status::{StatusReporter, StatusSnapshot};
use crate::subscription::{ActivationReport, DeactivationReport, SubscriptionManager, SubscriptionTimeouts};
use crate::traits::FeedClient;

/// Roster and timeouts for one collector.
#[derive(Debug, Clone, Default)]
pub struct CollectorSettings {
    pub feed_name: String,
    pub instruments: Vec<String>,
    /// Explicit bar types; when empty they are derived from `bar_spec`
    pub bar_types: Vec<String>,
    pub bar_spec: Option<String>,
    pub timeouts: SubscriptionTimeouts,
}

/// Streams a resolved roster from a feed into a catalog.
///
/// `start()` subscribes, `on_event()` routes one event, `stop()` unsubscribes.
/// The host decides when each is called.
pub struct Collector {
    instruments: Vec<InstrumentId>,
    bar_types: Vec<BarType>,
    subscriptions: SubscriptionManager,
    router: EventRouter,
    reporter: Arc<StatusReporter>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Collector {
    /// Resolve the configured identifiers and wire the components. Malformed
    /// entries are logged and left out of the roster.
    pub fn new(settings: CollectorSettings, feed: Arc<dyn FeedClient>, catalog: Arc<dyn Catalog>) -> Self {
        let instruments = IdentifierResolver::instruments(&settings.instruments).handles;
        let bar_types = match (&settings.bar_spec, settings.bar_types.is_empty()) {
            (Some(spec), true) => IdentifierResolver::derive_bar_types(&instruments, spec).handles,
            _ => IdentifierResolver::bar_types(&settings.bar_types).handles,
        };

        let counters = Arc::new(CounterTable::new());
        let feed_name = settings.feed_name.as_str();

        Self {
            subscriptions: SubscriptionManager::new(feed_name, feed, settings.timeouts),
            router: EventRouter::new(feed_name, Arc::clone(&catalog), Arc::clone(&counters)),
            reporter: Arc::new(StatusReporter::new(feed_name, counters, catalog)),
            instruments,
            bar_types,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn instruments(&self) -> &[InstrumentId] {
        &self.instruments
    }

    pub fn bar_types(&self) -> &[BarType] {
        &self.bar_types
    }

    pub fn counters(&self) -> &Arc<CounterTable> {
        self.router.counters()
    }

    pub fn reporter(&self) -> Arc<StatusReporter> {
        Arc::clone(&self.reporter)
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Subscribe the whole roster
    pub async fn start(&self) -> ActivationReport {
        if self.instruments.is_empty() && self.bar_types.is_empty() {
            warn!("No valid instruments or bar types configured");
        }
        self.started.store(true, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
        info!(
            instruments = self.instruments.len(),
            bar_types = self.bar_types.len(),
            "Starting collector"
        );
        self.subscriptions
            .activate_all(&self.instruments, &self.bar_types)
            .await
    }

    /// Unsubscribe everything that is active. Only the first call after
    /// `start()` does any work.
    pub async fn stop(&self) -> Option<DeactivationReport> {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return None;
        }
        info!("Stopping collector");
        Some(self.subscriptions.deactivate_all().await)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn on_event(&self, event: MarketEvent) -> RouteOutcome {
        self.router.route(event).await
    }

    pub fn record_lost(&self, lost: &[LostRecords]) {
        self.router.record_lost(lost);
    }

    pub async fn summarize(&self) -> StatusSnapshot {
        self.reporter.summarize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FeedCall, InMemoryFeed};
    use mdbridge_catalog::InMemoryCatalog;

    fn settings(instruments: &[&str]) -> CollectorSettings {
        CollectorSettings {
            feed_name: "collector-test".to_string(),
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            bar_types: Vec::new(),
            bar_spec: Some("1-MINUTE-LAST-EXTERNAL".to_string()),
            timeouts: SubscriptionTimeouts::default(),
        }
    }

    #[test]
    fn test_bar_types_derived_from_spec() {
        let collector = Collector::new(
            settings(&["ADAUSDT-PERP.BINANCE", "nope", "SOLUSDT-PERP.BINANCE"]),
            Arc::new(InMemoryFeed::new()),
            Arc::new(InMemoryCatalog::new()),
        );
        assert_eq!(collector.instruments().len(), 2);
        assert_eq!(
            collector.bar_types()[1].to_string(),
            "SOLUSDT-PERP.BINANCE-1-MINUTE-LAST-EXTERNAL"
        );
    }

    #[test]
    fn test_explicit_bar_types_win() {
        let mut settings = settings(&["ADAUSDT-PERP.BINANCE"]);
        settings.bar_types = vec!["ADAUSDT-PERP.BINANCE-5-MINUTE-LAST-EXTERNAL".to_string()];
        let collector = Collector::new(
            settings,
            Arc::new(InMemoryFeed::new()),
            Arc::new(InMemoryCatalog::new()),
        );
        assert_eq!(collector.bar_types().len(), 1);
        assert_eq!(collector.bar_types()[0].spec().step, 5);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let feed = Arc::new(InMemoryFeed::new());
        let collector = Collector::new(
            settings(&["ADAUSDT-PERP.BINANCE"]),
            feed.clone(),
            Arc::new(InMemoryCatalog::new()),
        );

        // Stop before start does nothing
        assert!(collector.stop().await.is_none());
        assert!(!collector.is_stopped());

        let report = collector.start().await;
        assert_eq!(report.active, 5);

        let stopped = collector.stop().await.unwrap();
        assert_eq!(stopped.unsubscribed, 5);
        assert!(collector.is_stopped());
        assert!(collector.stop().await.is_none());

        let unsubscribes = feed
            .calls()
            .iter()
            .filter(|c| matches!(c, FeedCall::Unsubscribe(_)))
            .count();
        assert_eq!(unsubscribes, 5);
    }
}
