use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mdbridge_model::MarketEvent;

use crate::error::FeedError;
use crate::traits::{FeedClient, Subscription};

const CHANNEL_BUFFER_SIZE: usize = 1024;

/// A call made against an [`InMemoryFeed`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCall {
    Connect,
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Close,
}

/// Feed that records every call and delivers whatever events are pushed
/// through [`InMemoryFeed::sender`]. Used for tests and dry runs.
pub struct InMemoryFeed {
    tx: Mutex<Option<mpsc::Sender<MarketEvent>>>,
    rx: Mutex<Option<mpsc::Receiver<MarketEvent>>>,
    calls: Mutex<Vec<FeedCall>>,
    rejected_targets: Mutex<HashSet<String>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_unsubscribe: AtomicBool,
    subscribe_delay_ms: AtomicU64,
    /// Pushed through the event channel by every unsubscribe
    unsubscribe_echo: Mutex<Option<MarketEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            calls: Mutex::new(Vec::new()),
            rejected_targets: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
            subscribe_delay_ms: AtomicU64::new(0),
            unsubscribe_echo: Mutex::new(None),
        }
    }

    /// Sender for pushing events to the consumer. `None` after `disconnect()`.
    pub fn sender(&self) -> Option<mpsc::Sender<MarketEvent>> {
        lock(&self.tx).clone()
    }

    /// Reject every subscribe whose target equals `target`
    pub fn reject(&self, target: impl Into<String>) {
        lock(&self.rejected_targets).insert(target.into());
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unsubscribes(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn delay_subscribes(&self, delay: Duration) {
        self.subscribe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every unsubscribe deliver `event` through the event channel
    /// before it returns, the way a socket feed reads its responses on the
    /// same task that delivers data.
    pub fn echo_on_unsubscribe(&self, event: MarketEvent) {
        *lock(&self.unsubscribe_echo) = Some(event);
    }

    /// Drop the feed's own sender so the event channel closes once every
    /// clone handed out by `sender()` is gone too.
    pub fn disconnect(&self) {
        lock(&self.tx).take();
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<FeedCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: FeedCall) {
        lock(&self.calls).push(call);
    }
}

impl Default for InMemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedClient for InMemoryFeed {
    async fn connect(&self) -> Result<(), FeedError> {
        self.record(FeedCall::Connect);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(FeedError::ConnectionFailed("connect refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), FeedError> {
        self.record(FeedCall::Subscribe(subscription.clone()));

        let delay = self.subscribe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if lock(&self.rejected_targets).contains(&subscription.target()) {
            return Err(FeedError::Rejected(format!("{} rejected", subscription)));
        }
        Ok(())
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), FeedError> {
        self.record(FeedCall::Unsubscribe(subscription.clone()));
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(FeedError::NotConnected);
        }

        let echo = lock(&self.unsubscribe_echo).clone();
        if let Some(event) = echo {
            let tx = self.sender().ok_or(FeedError::NotConnected)?;
            tx.send(event)
                .await
                .map_err(|_| FeedError::Disconnected("event channel closed".to_string()))?;
        }
        Ok(())
    }

    fn events(&self) -> Option<mpsc::Receiver<MarketEvent>> {
        lock(&self.rx).take()
    }

    async fn close(&self) -> Result<(), FeedError> {
        self.record(FeedCall::Close);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdbridge_model::InstrumentId;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let feed = InMemoryFeed::new();
        let id: InstrumentId = "ADAUSDT-PERP.BINANCE".parse().unwrap();

        feed.connect().await.unwrap();
        feed.subscribe(&Subscription::Quotes(id.clone())).await.unwrap();
        feed.unsubscribe(&Subscription::Quotes(id.clone())).await.unwrap();
        feed.close().await.unwrap();

        assert_eq!(
            feed.calls(),
            vec![
                FeedCall::Connect,
                FeedCall::Subscribe(Subscription::Quotes(id.clone())),
                FeedCall::Unsubscribe(Subscription::Quotes(id)),
                FeedCall::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_events_taken_once_and_closed_on_disconnect() {
        let feed = InMemoryFeed::new();
        let mut rx = feed.events().unwrap();
        assert!(feed.events().is_none());

        feed.disconnect();
        assert!(feed.sender().is_none());
        assert!(rx.recv().await.is_none());
    }
}
