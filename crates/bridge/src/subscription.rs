use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use mdbridge_model::{BarType, BookType, InstrumentId};

use crate::error::{BridgeError, FeedError};
use crate::metrics::BridgeMetrics;
use crate::traits::{FeedClient, Subscription};

/// Order-book subscriptions use L2 market-by-price
pub const BOOK_TYPE: BookType = BookType::L2Mbp;
/// Zero requests the feed's full depth
pub const BOOK_DEPTH: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    /// Subscribe failed; terminal and excluded from the active roster
    Failed,
    Unsubscribing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub subscription: Subscription,
    pub state: SubscriptionState,
}

/// Bounds for feed calls, supplied by the host.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionTimeouts {
    pub subscribe: Duration,
    pub unsubscribe: Duration,
}

impl Default for SubscriptionTimeouts {
    fn default() -> Self {
        Self {
            subscribe: Duration::from_secs(10),
            unsubscribe: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActivationReport {
    pub active: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeactivationReport {
    pub unsubscribed: usize,
    pub failed: usize,
}

/// Subscriptions requested for a roster: instrument metadata, quotes, trades
/// and full-depth book deltas per instrument, then one bar stream per bar type.
pub fn plan(instruments: &[InstrumentId], bar_types: &[BarType]) -> Vec<Subscription> {
    let mut plan = Vec::with_capacity(instruments.len() * 4 + bar_types.len());
    for id in instruments {
        plan.push(Subscription::Instrument(id.clone()));
        plan.push(Subscription::Quotes(id.clone()));
        plan.push(Subscription::Trades(id.clone()));
        plan.push(Subscription::BookDeltas {
            instrument_id: id.clone(),
            book_type: BOOK_TYPE,
            depth: BOOK_DEPTH,
        });
    }
    plan.extend(bar_types.iter().cloned().map(Subscription::Bars));
    plan
}

async fn with_timeout<F>(limit: Duration, call: F) -> Result<(), FeedError>
where
    F: Future<Output = Result<(), FeedError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout(limit)),
    }
}

/// Owns the subscription roster and keeps subscribe/unsubscribe symmetric.
pub struct SubscriptionManager {
    feed: Arc<dyn FeedClient>,
    timeouts: SubscriptionTimeouts,
    entries: Mutex<Vec<SubscriptionEntry>>,
    metrics: BridgeMetrics,
}

impl SubscriptionManager {
    pub fn new(feed_name: &str, feed: Arc<dyn FeedClient>, timeouts: SubscriptionTimeouts) -> Self {
        Self {
            feed,
            timeouts,
            entries: Mutex::new(Vec::new()),
            metrics: BridgeMetrics::new(feed_name),
        }
    }

    async fn set_state(&self, idx: usize, state: SubscriptionState) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(idx) {
            entry.state = state;
        }
    }

    /// Entry index to subscribe: a new entry, or an `Unsubscribed` one being
    /// reused. Entries in any other state are left alone.
    async fn claim(&self, subscription: &Subscription) -> Option<usize> {
        let mut entries = self.entries.lock().await;
        match entries.iter().position(|e| &e.subscription == subscription) {
            Some(idx) if entries[idx].state != SubscriptionState::Unsubscribed => None,
            Some(idx) => {
                entries[idx].state = SubscriptionState::Subscribing;
                Some(idx)
            }
            None => {
                entries.push(SubscriptionEntry {
                    subscription: subscription.clone(),
                    state: SubscriptionState::Subscribing,
                });
                Some(entries.len() - 1)
            }
        }
    }

    /// Subscribe every planned stream. Each call is independent: a failure is
    /// logged, the entry is marked `Failed` and the rest carry on.
    pub async fn activate_all(&self, instruments: &[InstrumentId], bar_types: &[BarType]) -> ActivationReport {
        let mut report = ActivationReport::default();

        for subscription in plan(instruments, bar_types) {
            let Some(idx) = self.claim(&subscription).await else {
                continue;
            };

            match with_timeout(self.timeouts.subscribe, self.feed.subscribe(&subscription)).await {
                Ok(()) => {
                    self.set_state(idx, SubscriptionState::Active).await;
                    report.active += 1;
                    info!(subscription = %subscription, "Subscribed");
                }
                Err(source) => {
                    self.set_state(idx, SubscriptionState::Failed).await;
                    self.metrics.inc_subscription_failure(subscription.category());
                    report.failed += 1;
                    let err = BridgeError::SubscriptionFailed {
                        category: subscription.category(),
                        target: subscription.target(),
                        source,
                    };
                    error!(error = %err, "Subscription failed");
                }
            }
        }

        let active = self.active_count().await;
        self.metrics.set_active_subscriptions(active);
        info!(active = report.active, failed = report.failed, "Subscriptions activated");
        report
    }

    /// Unsubscribe every `Active` entry. Best effort: failures are logged and
    /// the entry still ends `Unsubscribed`. Calling it again is a no-op.
    pub async fn deactivate_all(&self) -> DeactivationReport {
        let active: Vec<(usize, Subscription)> = {
            let mut entries = self.entries.lock().await;
            entries
                .iter_mut()
                .enumerate()
                .filter(|(_, e)| e.state == SubscriptionState::Active)
                .map(|(idx, e)| {
                    e.state = SubscriptionState::Unsubscribing;
                    (idx, e.subscription.clone())
                })
                .collect()
        };

        let mut report = DeactivationReport::default();
        for (idx, subscription) in active {
            match with_timeout(self.timeouts.unsubscribe, self.feed.unsubscribe(&subscription)).await {
                Ok(()) => report.unsubscribed += 1,
                Err(source) => {
                    report.failed += 1;
                    let err = BridgeError::UnsubscribeFailed {
                        category: subscription.category(),
                        target: subscription.target(),
                        source,
                    };
                    warn!(error = %err, "Unsubscribe failed");
                }
            }
            self.set_state(idx, SubscriptionState::Unsubscribed).await;
        }

        self.metrics.set_active_subscriptions(0);
        if report.unsubscribed + report.failed > 0 {
            info!(
                unsubscribed = report.unsubscribed,
                failed = report.failed,
                "Subscriptions deactivated"
            );
        }
        report
    }

    pub async fn entries(&self) -> Vec<SubscriptionEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.state == SubscriptionState::Active)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::IdentifierResolver;
    use crate::memory::{FeedCall, InMemoryFeed};

    fn manager(feed: Arc<InMemoryFeed>) -> SubscriptionManager {
        SubscriptionManager::new("subscription-test", feed, SubscriptionTimeouts::default())
    }

    #[test]
    fn test_plan_covers_every_stream() {
        let instruments = IdentifierResolver::instruments(&["ADAUSDT-PERP.BINANCE"]).handles;
        let bar_types =
            IdentifierResolver::derive_bar_types(&instruments, "1-MINUTE-LAST-EXTERNAL").handles;
        let plan = plan(&instruments, &bar_types);

        assert_eq!(plan.len(), 5);
        assert!(matches!(plan[0], Subscription::Instrument(_)));
        assert!(matches!(plan[1], Subscription::Quotes(_)));
        assert!(matches!(plan[2], Subscription::Trades(_)));
        assert!(matches!(
            plan[3],
            Subscription::BookDeltas { book_type: BookType::L2Mbp, depth: 0, .. }
        ));
        assert!(matches!(plan[4], Subscription::Bars(_)));
    }

    #[tokio::test]
    async fn test_malformed_instrument_gets_no_entries() {
        let raw = [
            "ADAUSDT-PERP.BINANCE",
            "SOLUSDT-PERP.BINANCE",
            "BAD INSTRUMENT",
            "LTCUSDT-PERP.BINANCE",
            "XRPUSDT-PERP.BINANCE",
        ];
        let instruments = IdentifierResolver::instruments(&raw).handles;
        assert_eq!(instruments.len(), 4);

        let feed = Arc::new(InMemoryFeed::new());
        let manager = manager(feed.clone());
        let report = manager.activate_all(&instruments, &[]).await;

        assert_eq!(report, ActivationReport { active: 16, failed: 0 });
        let entries = manager.entries().await;
        assert!(entries.iter().all(|e| e.state == SubscriptionState::Active));
        assert!(entries.iter().all(|e| !e.subscription.target().contains("BAD")));
    }

    #[tokio::test]
    async fn test_failed_subscribe_does_not_block_others() {
        let instruments =
            IdentifierResolver::instruments(&["ADAUSDT-PERP.BINANCE", "SUIUSDT-PERP.BINANCE"]).handles;
        let feed = Arc::new(InMemoryFeed::new());
        feed.reject("SUIUSDT-PERP.BINANCE");

        let manager = manager(feed.clone());
        let report = manager.activate_all(&instruments, &[]).await;
        assert_eq!(report, ActivationReport { active: 4, failed: 4 });
        assert_eq!(manager.active_count().await, 4);

        let failed: Vec<_> = manager
            .entries()
            .await
            .into_iter()
            .filter(|e| e.state == SubscriptionState::Failed)
            .collect();
        assert!(failed
            .iter()
            .all(|e| e.subscription.target() == "SUIUSDT-PERP.BINANCE"));
    }

    #[tokio::test]
    async fn test_deactivate_all_is_symmetric_and_idempotent() {
        let instruments = IdentifierResolver::instruments(&["ADAUSDT-PERP.BINANCE"]).handles;
        let bar_types =
            IdentifierResolver::derive_bar_types(&instruments, "1-MINUTE-LAST-EXTERNAL").handles;
        let feed = Arc::new(InMemoryFeed::new());
        let manager = manager(feed.clone());

        manager.activate_all(&instruments, &bar_types).await;
        let first = manager.deactivate_all().await;
        assert_eq!(first, DeactivationReport { unsubscribed: 5, failed: 0 });
        assert!(manager
            .entries()
            .await
            .iter()
            .all(|e| e.state == SubscriptionState::Unsubscribed));

        let second = manager.deactivate_all().await;
        assert_eq!(second, DeactivationReport::default());

        let subscribed: Vec<_> = feed
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                FeedCall::Subscribe(s) => Some(s),
                _ => None,
            })
            .collect();
        let unsubscribed: Vec<_> = feed
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                FeedCall::Unsubscribe(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(subscribed, unsubscribed);
    }

    #[tokio::test]
    async fn test_failed_unsubscribe_still_ends_unsubscribed() {
        let instruments = IdentifierResolver::instruments(&["ADAUSDT-PERP.BINANCE"]).handles;
        let feed = Arc::new(InMemoryFeed::new());
        let manager = manager(feed.clone());

        manager.activate_all(&instruments, &[]).await;
        feed.fail_unsubscribes(true);
        let report = manager.deactivate_all().await;

        assert_eq!(report, DeactivationReport { unsubscribed: 0, failed: 4 });
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_entries_are_not_unsubscribed() {
        let instruments = IdentifierResolver::instruments(&["ADAUSDT-PERP.BINANCE"]).handles;
        let feed = Arc::new(InMemoryFeed::new());
        feed.reject("ADAUSDT-PERP.BINANCE");
        let manager = manager(feed.clone());

        manager.activate_all(&instruments, &[]).await;
        let report = manager.deactivate_all().await;
        assert_eq!(report, DeactivationReport::default());
    }

    #[tokio::test]
    async fn test_subscribe_timeout_marks_failed() {
        let instruments = IdentifierResolver::instruments(&["ADAUSDT-PERP.BINANCE"]).handles;
        let feed = Arc::new(InMemoryFeed::new());
        feed.delay_subscribes(Duration::from_millis(200));
        let manager = SubscriptionManager::new(
            "subscription-test",
            feed.clone(),
            SubscriptionTimeouts {
                subscribe: Duration::from_millis(10),
                unsubscribe: Duration::from_millis(10),
            },
        );

        let report = manager.activate_all(&instruments, &[]).await;
        assert_eq!(report, ActivationReport { active: 0, failed: 4 });
    }
}
