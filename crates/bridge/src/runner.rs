use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use mdbridge_catalog::{Catalog, CatalogError};
use mdbridge_model::MarketEvent;

use crate::collector::Collector;
use crate::error::{BridgeError, FeedError};
use crate::metrics::BridgeMetrics;
use crate::status::StatusReporter;
use crate::traits::FeedClient;

/// Host-side timing for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub connection_timeout: Duration,
    pub disconnection_timeout: Duration,
    /// Upper bound for draining events queued when shutdown starts
    pub post_stop_timeout: Duration,
    pub status_interval: Duration,
    pub flush_interval: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            disconnection_timeout: Duration::from_secs(10),
            post_stop_timeout: Duration::from_secs(5),
            status_interval: Duration::from_secs(300),
            flush_interval: Duration::from_secs(60),
        }
    }
}

/// Runner hosts a collector: connects the feed, routes events until
/// shutdown or disconnect, then tears down in order.
pub struct Runner {
    feed_name: String,
    feed: Arc<dyn FeedClient>,
    catalog: Arc<dyn Catalog>,
    collector: Collector,
    settings: RunnerSettings,
    metrics: BridgeMetrics,
    connected: Arc<AtomicBool>,
    /// Unix timestamp (seconds) of last event received
    last_event_epoch_secs: Arc<AtomicU64>,
}

impl Runner {
    pub fn new(
        feed_name: impl Into<String>,
        feed: Arc<dyn FeedClient>,
        catalog: Arc<dyn Catalog>,
        collector: Collector,
        settings: RunnerSettings,
    ) -> Self {
        let feed_name = feed_name.into();
        Self {
            metrics: BridgeMetrics::new(&feed_name),
            feed_name,
            feed,
            catalog,
            collector,
            settings,
            connected: Arc::new(AtomicBool::new(false)),
            last_event_epoch_secs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns whether the feed is currently connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns a handle to the connected status
    pub fn connected_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Returns a handle to the last event timestamp
    pub fn last_event_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.last_event_epoch_secs)
    }

    pub fn reporter(&self) -> Arc<StatusReporter> {
        self.collector.reporter()
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.metrics.set_connected(connected);
    }

    /// Update last event timestamp to current time
    fn update_last_event_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_event_epoch_secs.store(now, Ordering::SeqCst);
        self.metrics.set_last_event(now as f64);
    }

    async fn connect(&self) -> Result<mpsc::Receiver<MarketEvent>, BridgeError> {
        let limit = self.settings.connection_timeout;
        match tokio::time::timeout(limit, self.feed.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(FeedError::Timeout(limit).into()),
        }
        self.feed
            .events()
            .ok_or(BridgeError::Feed(FeedError::NotConnected))
    }

    /// Run the collection pipeline until shutdown is signalled or the feed
    /// disconnects. A disconnect returns `Disconnected` so a supervisor can
    /// restart the process.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
        let mut rx = self.connect().await?;
        self.set_connected(true);
        info!(feed = %self.feed_name, "Connected to data source");

        // Subscribing runs alongside intake so a full channel cannot stall
        // the feed while it waits for subscription responses.
        let start = self.collector.start();
        tokio::pin!(start);
        let mut starting = true;

        let mut status_tick = interval_at(
            Instant::now() + self.settings.status_interval,
            self.settings.status_interval,
        );
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush_tick = interval_at(
            Instant::now() + self.settings.flush_interval,
            self.settings.flush_interval,
        );
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown = shutdown;
        let mut disconnected = false;

        loop {
            select! {
                report = &mut start, if starting => {
                    starting = false;
                    info!(active = report.active, failed = report.failed, "Collector started");
                }
                changed = shutdown.changed() => {
                    // A dropped sender also means shut down
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            // route() finishes before the next select
                            self.collector.on_event(event).await;
                            self.update_last_event_time();
                        }
                        None => {
                            // Channel closed - feed disconnected unexpectedly
                            error!("Feed disconnected unexpectedly - exiting to trigger restart");
                            disconnected = true;
                            break;
                        }
                    }
                }
                _ = status_tick.tick() => {
                    self.collector.summarize().await;
                }
                _ = flush_tick.tick() => {
                    if let Err(e) = self.catalog.flush().await {
                        warn!(error = %e, "Periodic catalog flush failed");
                    }
                }
            }
        }

        self.set_connected(false);
        self.shutdown(&mut rx, disconnected).await;

        if disconnected {
            return Err(BridgeError::Disconnected("event channel closed".to_string()));
        }
        Ok(())
    }

    /// Stop intake, drain, close the catalog, report, then release the feed.
    /// The catalog closes before the final summary so rows it failed to
    /// persist show up in the reported counters.
    async fn shutdown(&self, rx: &mut mpsc::Receiver<MarketEvent>, disconnected: bool) {
        if !disconnected {
            self.stop_collector(rx).await;
            self.drain(rx).await;
        }

        match self.catalog.close().await {
            Ok(()) => {}
            Err(CatalogError::Unflushed { lost, source }) => {
                error!(partitions = lost.len(), error = %source, "Catalog lost buffered records on close");
                self.collector.record_lost(&lost);
            }
            Err(e) => error!(error = %e, "Failed to close catalog"),
        }

        self.collector.summarize().await;

        let limit = self.settings.disconnection_timeout;
        match tokio::time::timeout(limit, self.feed.close()).await {
            Ok(Ok(())) => info!(feed = %self.feed_name, "Feed closed"),
            Ok(Err(e)) => warn!(error = %e, "Failed to close feed"),
            Err(_) => warn!(timeout = ?limit, "Timed out closing feed"),
        }
    }

    /// Unsubscribe while still routing intake. The feed reads unsubscribe
    /// responses on the same task that fills the event channel, so the
    /// channel has to keep moving until every unsubscribe returns.
    async fn stop_collector(&self, rx: &mut mpsc::Receiver<MarketEvent>) {
        let stop = self.collector.stop();
        tokio::pin!(stop);
        let mut open = true;

        loop {
            select! {
                report = &mut stop => {
                    if let Some(report) = report {
                        info!(
                            unsubscribed = report.unsubscribed,
                            failed = report.failed,
                            "Collector stopped"
                        );
                    }
                    return;
                }
                event = rx.recv(), if open => {
                    match event {
                        Some(event) => {
                            self.collector.on_event(event).await;
                            self.update_last_event_time();
                        }
                        None => open = false,
                    }
                }
            }
        }
    }

    /// Route events already queued when intake stopped
    async fn drain(&self, rx: &mut mpsc::Receiver<MarketEvent>) {
        let deadline = Instant::now() + self.settings.post_stop_timeout;
        let mut drained = 0u64;

        while let Ok(event) = rx.try_recv() {
            self.collector.on_event(event).await;
            drained += 1;
            if Instant::now() >= deadline {
                warn!(drained, "Post-stop drain timed out");
                break;
            }
        }

        if drained > 0 {
            info!(drained, "Drained queued events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorSettings;
    use crate::memory::{FeedCall, InMemoryFeed};
    use crate::subscription::SubscriptionTimeouts;
    use mdbridge_catalog::InMemoryCatalog;
    use mdbridge_model::{Category, QuoteTick};
    use rust_decimal::Decimal;

    const ADA: &str = "ADAUSDT-PERP.BINANCE";

    fn quote(ts: u64) -> MarketEvent {
        MarketEvent::Quote(QuoteTick {
            instrument_id: ADA.parse().unwrap(),
            bid_price: Decimal::new(3501, 4),
            ask_price: Decimal::new(3502, 4),
            bid_size: Decimal::new(1000, 0),
            ask_size: Decimal::new(900, 0),
            ts_event: ts,
            ts_init: ts,
        })
    }

    fn runner(feed: Arc<InMemoryFeed>, catalog: Arc<InMemoryCatalog>) -> Runner {
        runner_with(feed, catalog, SubscriptionTimeouts::default(), RunnerSettings::default())
    }

    fn runner_with(
        feed: Arc<InMemoryFeed>,
        catalog: Arc<InMemoryCatalog>,
        timeouts: SubscriptionTimeouts,
        settings: RunnerSettings,
    ) -> Runner {
        let collector = Collector::new(
            CollectorSettings {
                feed_name: "runner-test".to_string(),
                instruments: vec![ADA.to_string()],
                bar_types: Vec::new(),
                bar_spec: None,
                timeouts,
            },
            feed.clone(),
            catalog.clone(),
        );
        Runner::new("runner-test", feed, catalog, collector, settings)
    }

    #[tokio::test]
    async fn test_runner_routes_events_and_shuts_down_in_order() {
        let feed = Arc::new(InMemoryFeed::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let mut runner = runner(feed.clone(), catalog.clone());
        let connected = runner.connected_handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tx = feed.sender().unwrap();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        for ts in 0..10 {
            tx.send(quote(ts)).await.unwrap();
        }

        // Wait a bit for processing
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connected.load(Ordering::SeqCst));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(!connected.load(Ordering::SeqCst));
        assert_eq!(catalog.records(Category::Quote, ADA).await.len(), 10);
        assert!(catalog.is_closed());

        let calls = feed.calls();
        assert_eq!(calls.first(), Some(&FeedCall::Connect));
        assert_eq!(calls.last(), Some(&FeedCall::Close));
        let last_unsubscribe = calls
            .iter()
            .rposition(|c| matches!(c, FeedCall::Unsubscribe(_)))
            .unwrap();
        assert_eq!(last_unsubscribe, calls.len() - 2);
    }

    #[tokio::test]
    async fn test_queued_events_drained_before_close() {
        let feed = Arc::new(InMemoryFeed::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let mut runner = runner(feed.clone(), catalog.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Queue events and the shutdown before the runner gets a chance to poll
        let tx = feed.sender().unwrap();
        for ts in 0..25 {
            tx.send(quote(ts)).await.unwrap();
        }
        shutdown_tx.send(true).unwrap();

        runner.run(shutdown_rx).await.unwrap();
        assert_eq!(catalog.records(Category::Quote, ADA).await.len(), 25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsubscribe_completes_while_intake_is_busy() {
        const ECHO: &str = "ECHOUSDT-PERP.BINANCE";
        let limit = Duration::from_secs(2);

        // Each unsubscribe pushes a frame through the shared 8-slot channel
        let feed = Arc::new(InMemoryFeed::with_capacity(8));
        let MarketEvent::Quote(mut echo) = quote(0) else {
            unreachable!()
        };
        echo.instrument_id = ECHO.parse().unwrap();
        feed.echo_on_unsubscribe(MarketEvent::Quote(echo));

        let catalog = Arc::new(InMemoryCatalog::new());
        let mut runner = runner_with(
            feed.clone(),
            catalog.clone(),
            SubscriptionTimeouts {
                subscribe: limit,
                unsubscribe: limit,
            },
            RunnerSettings {
                post_stop_timeout: Duration::from_millis(100),
                ..RunnerSettings::default()
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tx = feed.sender().unwrap();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        while feed.calls().len() < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Keep the channel saturated until the runner lets go of it
        let pump = tokio::spawn(async move {
            let mut ts = 1;
            while tx.send(quote(ts)).await.is_ok() {
                ts += 1;
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(started.elapsed() < limit, "shutdown took {:?}", started.elapsed());

        // Every unsubscribe got its frame through
        assert_eq!(catalog.records(Category::Quote, ECHO).await.len(), 5);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_returns_error() {
        let feed = Arc::new(InMemoryFeed::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let mut runner = runner(feed.clone(), catalog.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let tx = feed.sender().unwrap();
        tx.send(quote(1)).await.unwrap();
        drop(tx);
        feed.disconnect();

        let result = runner.run(shutdown_rx).await;
        assert!(matches!(result, Err(BridgeError::Disconnected(_))));
        assert_eq!(catalog.records(Category::Quote, ADA).await.len(), 1);
        assert!(catalog.is_closed());
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        let feed = Arc::new(InMemoryFeed::new());
        feed.fail_connects(true);
        let mut runner = runner(feed.clone(), Arc::new(InMemoryCatalog::new()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = runner.run(shutdown_rx).await;
        assert!(matches!(
            result,
            Err(BridgeError::Feed(FeedError::ConnectionFailed(_)))
        ));
        assert!(!runner.is_connected());
    }
}
