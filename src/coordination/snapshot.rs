use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::coordination::breaker::CircuitBreaker;
use crate::error::{FetchError, FetchResult};
use crate::market::MarketSnapshot;

/// Anything able to produce a whole-universe snapshot. The market data
/// service implements this; tests substitute stubs.
pub trait SnapshotSource: Send + Sync {
    fn market_snapshot(&self) -> BoxFuture<'static, FetchResult<MarketSnapshot>>;
}

/// Immutable read model handed to observers. Cloned out of the manager on
/// every read; never a live reference into manager state.
#[derive(Debug, Clone, Default)]
pub struct SnapshotState {
    pub snapshot: Option<MarketSnapshot>,
    pub loading: bool,
    pub error: Option<String>,
    pub last_update: Option<chrono::DateTime<Utc>>,
    pub credits_exhausted: bool,
}

type SubscriberFn = Arc<dyn Fn(&SnapshotState) + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult<MarketSnapshot>>>;

/// Owns the current market snapshot and the observer set. Deduplicates
/// concurrent refreshes into one shared operation and records a Blocked
/// state once the upstream reports its credits exhausted; automatic fetches
/// stay suppressed until `reset_credits`.
pub struct SnapshotManager {
    source: Arc<dyn SnapshotSource>,
    breaker: Arc<CircuitBreaker>,
    state: Mutex<SnapshotState>,
    subscribers: Mutex<HashMap<u64, SubscriberFn>>,
    next_subscriber: AtomicU64,
    pending: Mutex<Option<SharedFetch>>,
}

impl SnapshotManager {
    pub fn new(source: Arc<dyn SnapshotSource>, breaker: Arc<CircuitBreaker>) -> Arc<Self> {
        Arc::new(Self {
            source,
            breaker,
            state: Mutex::new(SnapshotState::default()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
            pending: Mutex::new(None),
        })
    }

    /// Register an observer invoked after every state transition. Dropping
    /// the returned subscription (or calling `unsubscribe`) removes it.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&SnapshotState) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));
        Subscription {
            id,
            manager: Arc::downgrade(self),
        }
    }

    pub fn get_state(&self) -> SnapshotState {
        self.state.lock().unwrap().clone()
    }

    /// Refresh the snapshot. Calls made while a refresh is pending join the
    /// existing operation instead of starting a second one.
    pub async fn fetch_snapshot(self: &Arc<Self>) -> FetchResult<MarketSnapshot> {
        let shared = {
            let mut pending = self.pending.lock().unwrap();
            match pending.as_ref() {
                Some(existing) => {
                    log::debug!("joining pending snapshot refresh");
                    existing.clone()
                }
                None => {
                    if self.state.lock().unwrap().credits_exhausted {
                        return Err(FetchError::RateLimited {
                            retry_after: self.breaker.remaining(),
                        });
                    }
                    let this = Arc::clone(self);
                    let fut = async move {
                        let result = this.perform_fetch().await;
                        this.pending.lock().unwrap().take();
                        result
                    }
                    .boxed()
                    .shared();
                    *pending = Some(fut.clone());
                    fut
                }
            }
        };

        shared.await
    }

    /// Clear the Blocked state after an administrative reset (e.g. the daily
    /// credit budget rolled over).
    pub fn reset_credits(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            state.credits_exhausted = false;
            state.error = None;
        }
        log::info!("credit budget reset; snapshot refreshes allowed again");
        self.notify();
    }

    async fn perform_fetch(self: &Arc<Self>) -> FetchResult<MarketSnapshot> {
        {
            let mut state = self.state.lock().unwrap();
            state.loading = true;
        }
        self.notify();

        let result = self.source.market_snapshot().await;

        {
            let mut state = self.state.lock().unwrap();
            state.loading = false;
            match &result {
                Ok(snapshot) => {
                    state.snapshot = Some(snapshot.clone());
                    state.error = None;
                    state.last_update = Some(Utc::now());
                    state.credits_exhausted = false;
                }
                Err(err) => {
                    state.error = Some(err.to_string());
                    if err.is_rate_limited() {
                        log::warn!("snapshot refresh blocked: {err}");
                        state.credits_exhausted = true;
                    }
                }
            }
        }
        self.notify();

        result
    }

    // Callbacks run outside the registry lock so an observer may subscribe
    // or drop its own subscription while being notified.
    fn notify(&self) {
        let state = self.get_state();
        let callbacks: Vec<SubscriberFn> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(&state);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }
}

/// Handle tying an observer to the manager; unregisters on drop.
pub struct Subscription {
    id: u64,
    manager: Weak<SnapshotManager>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::SymbolQuote;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Duration};

    struct StubSource {
        calls: AtomicUsize,
        fail_with: Mutex<Option<FetchError>>,
        delay: Duration,
    }

    impl StubSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
                delay: Duration::from_millis(20),
            })
        }

        fn sample_snapshot() -> MarketSnapshot {
            MarketSnapshot {
                symbols: vec![SymbolQuote {
                    symbol: "SPY".to_string(),
                    name: "SPDR S&P 500 ETF".to_string(),
                    kind: "ETF".to_string(),
                    price: 512.34,
                    change: 1.2,
                    percent_change: 0.23,
                    volume: 55_000_000,
                    series: Vec::new(),
                    error: None,
                }],
                last_updated: Utc::now(),
            }
        }
    }

    impl SnapshotSource for StubSource {
        fn market_snapshot(&self) -> BoxFuture<'static, FetchResult<MarketSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failure = self.fail_with.lock().unwrap().clone();
            let delay = self.delay;
            async move {
                sleep(delay).await;
                match failure {
                    Some(err) => Err(err),
                    None => Ok(StubSource::sample_snapshot()),
                }
            }
            .boxed()
        }
    }

    fn test_manager(source: Arc<StubSource>) -> Arc<SnapshotManager> {
        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(180)));
        SnapshotManager::new(source, breaker)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_share_one_upstream_call() {
        let source = StubSource::new();
        let manager = test_manager(Arc::clone(&source));

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.fetch_snapshot().await })
        };
        tokio::task::yield_now().await;
        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.fetch_snapshot().await })
        };

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a.symbols[0].symbol, b.symbols[0].symbol);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_transitions_to_ready_and_notifies() {
        let source = StubSource::new();
        let manager = test_manager(source);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = manager.subscribe({
            let seen = Arc::clone(&seen);
            move |state: &SnapshotState| {
                seen.lock().unwrap().push((state.loading, state.snapshot.is_some()));
            }
        });

        manager.fetch_snapshot().await.unwrap();

        let state = manager.get_state();
        assert!(!state.loading);
        assert!(state.snapshot.is_some());
        assert!(state.error.is_none());
        assert!(state.last_update.is_some());

        let seen = seen.lock().unwrap();
        // Fetching transition first, Ready transition last.
        assert_eq!(seen.first(), Some(&(true, false)));
        assert_eq!(seen.last(), Some(&(false, true)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_failure_enters_blocked_state() {
        let source = StubSource::new();
        *source.fail_with.lock().unwrap() = Some(FetchError::RateLimited {
            retry_after: Duration::from_secs(120),
        });
        let manager = test_manager(Arc::clone(&source));

        let result = manager.fetch_snapshot().await;
        assert!(matches!(result, Err(FetchError::RateLimited { .. })));

        let state = manager.get_state();
        assert!(state.credits_exhausted);
        assert!(state.error.is_some());

        // Further fetches are suppressed without touching the source.
        let suppressed = manager.fetch_snapshot().await;
        assert!(matches!(suppressed, Err(FetchError::RateLimited { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        manager.reset_credits();
        assert!(!manager.get_state().credits_exhausted);
        manager.fetch_snapshot().await.unwrap_err();
        // Source consulted again after the reset (still failing here).
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_return_to_idle_with_error() {
        let source = StubSource::new();
        *source.fail_with.lock().unwrap() =
            Some(FetchError::Upstream("503 from provider".to_string()));
        let manager = test_manager(Arc::clone(&source));

        let result = manager.fetch_snapshot().await;
        assert!(matches!(result, Err(FetchError::Upstream(_))));

        let state = manager.get_state();
        assert!(!state.credits_exhausted);
        assert!(state.error.is_some());

        // Caller may retry; the source is consulted again.
        *source.fail_with.lock().unwrap() = None;
        manager.fetch_snapshot().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_may_change_registrations_during_notify() {
        let source = StubSource::new();
        let manager = test_manager(source);

        let late_calls = Arc::new(AtomicUsize::new(0));
        let extra: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&manager);

        // Registers a second observer from inside a notification; replacing
        // the held subscription also drops the previous one mid-notify.
        let _sub = manager.subscribe({
            let late_calls = Arc::clone(&late_calls);
            let extra = Arc::clone(&extra);
            move |_state: &SnapshotState| {
                if let Some(manager) = weak.upgrade() {
                    let late_calls = Arc::clone(&late_calls);
                    let sub = manager.subscribe(move |_state: &SnapshotState| {
                        late_calls.fetch_add(1, Ordering::SeqCst);
                    });
                    *extra.lock().unwrap() = Some(sub);
                }
            }
        });

        manager.fetch_snapshot().await.unwrap();

        // Each fetch notifies twice; the observer added during the first
        // notification saw the second one.
        assert!(late_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_notifications() {
        let source = StubSource::new();
        let manager = test_manager(source);

        let count = Arc::new(AtomicUsize::new(0));
        let sub = manager.subscribe({
            let count = Arc::clone(&count);
            move |_state: &SnapshotState| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.fetch_snapshot().await.unwrap();
        let after_first = count.load(Ordering::SeqCst);
        assert!(after_first >= 2);

        sub.unsubscribe();
        manager.fetch_snapshot().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), after_first);
    }
}
