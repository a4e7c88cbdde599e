use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::time::{Duration, Instant};

use crate::coordination::breaker::CircuitBreaker;
use crate::coordination::queue::RequestQueue;
use crate::error::{FetchError, FetchResult};
use crate::records::DurableCache;

type SharedFetch = Shared<BoxFuture<'static, FetchResult<Value>>>;

#[derive(Default)]
struct CacheEntry {
    payload: Option<Value>,
    fetched_at: Option<Instant>,
    in_flight: Option<SharedFetch>,
}

/// Deterministic key for a logical request: endpoint plus sorted parameter
/// pairs, so insertion order never produces a second key.
pub fn cache_key(endpoint: &str, params: &[(&str, String)]) -> String {
    let mut pairs: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    format!("{endpoint}?{}", pairs.join("&"))
}

/// Per-key memory of the last successful payload plus the shared handle of
/// any refresh already under way. All upstream traffic this cache generates
/// goes through the request queue; the breaker is consulted before anything
/// new is submitted.
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    queue: Arc<RequestQueue>,
    breaker: Arc<CircuitBreaker>,
    freshness: Duration,
    min_interval: Duration,
    store: Option<Arc<DurableCache>>,
}

enum Lookup {
    Done(FetchResult<Value>),
    Join(SharedFetch),
}

impl ResponseCache {
    pub fn new(
        queue: Arc<RequestQueue>,
        breaker: Arc<CircuitBreaker>,
        freshness: Duration,
        min_interval: Duration,
    ) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            queue,
            breaker,
            freshness,
            min_interval,
            store: None,
        }
    }

    /// Attach an optional durable store that seeds cold entries and records
    /// successful payloads across processes.
    pub fn with_store(mut self, store: Option<Arc<DurableCache>>) -> Self {
        self.store = store;
        self
    }

    /// Resolve `key` according to the coordination policy:
    /// fresh hit → in-flight join → stale-serve / fail while blocked or
    /// inside the minimum interval → otherwise one queued fetch shared by
    /// every concurrent caller.
    pub async fn get<Fut>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        fetcher: Fut,
    ) -> FetchResult<Value>
    where
        Fut: Future<Output = FetchResult<Value>> + Send + 'static,
    {
        let key = cache_key(endpoint, params);

        let lookup = {
            let mut map = self.entries.lock().unwrap();
            let entry = map.entry(key.clone()).or_default();

            if entry.payload.is_none() {
                self.seed_from_store(&key, entry);
            }

            let now = Instant::now();

            if let (Some(payload), Some(at)) = (&entry.payload, entry.fetched_at) {
                if now.duration_since(at) < self.freshness {
                    log::debug!("cache hit for {key}");
                    return Ok(payload.clone());
                }
            }

            if let Some(shared) = &entry.in_flight {
                log::debug!("joining in-flight request for {key}");
                Lookup::Join(shared.clone())
            } else if self.breaker.is_blocked() {
                match &entry.payload {
                    Some(payload) => {
                        log::info!("serving stale data for {key} while globally blocked");
                        Lookup::Done(Ok(payload.clone()))
                    }
                    None => Lookup::Done(Err(FetchError::RateLimited {
                        retry_after: self.breaker.remaining(),
                    })),
                }
            } else if let Some(wait) = self.interval_wait(entry, now) {
                match &entry.payload {
                    Some(payload) => {
                        log::debug!("serving stale data for {key} inside minimum interval");
                        Lookup::Done(Ok(payload.clone()))
                    }
                    None => Lookup::Done(Err(FetchError::RateLimited { retry_after: wait })),
                }
            } else {
                let shared = self.launch(&key, fetcher);
                entry.in_flight = Some(shared.clone());
                Lookup::Join(shared)
            }
        };

        match lookup {
            Lookup::Done(result) => result,
            Lookup::Join(shared) => shared.await,
        }
    }

    /// Drop every entry. Test and debugging aid.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of keyed entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn interval_wait(&self, entry: &CacheEntry, now: Instant) -> Option<Duration> {
        let at = entry.fetched_at?;
        let since = now.duration_since(at);
        if since < self.min_interval {
            Some(self.min_interval - since)
        } else {
            None
        }
    }

    fn seed_from_store(&self, key: &str, entry: &mut CacheEntry) {
        let Some(store) = &self.store else {
            return;
        };
        if let Some((age, payload)) = store.get(key) {
            log::debug!("seeded {key} from durable cache (age {}s)", age.as_secs());
            entry.payload = Some(payload);
            entry.fetched_at = Some(Instant::now().checked_sub(age).unwrap_or_else(Instant::now));
        }
    }

    /// Submit the fetcher to the request queue and wrap the pending result in
    /// a shared future. Completion updates the entry: success replaces the
    /// payload and timestamp, failure only clears the in-flight marker so any
    /// stale payload survives for later stale-serves.
    fn launch<Fut>(&self, key: &str, operation: Fut) -> SharedFetch
    where
        Fut: Future<Output = FetchResult<Value>> + Send + 'static,
    {
        log::debug!("queueing upstream request for {key}");
        let entries = Arc::clone(&self.entries);
        let queue = Arc::clone(&self.queue);
        let store = self.store.clone();
        let key = key.to_string();

        async move {
            let result = queue.enqueue(operation, key.clone()).await;

            {
                let mut map = entries.lock().unwrap();
                let entry = map.entry(key.clone()).or_default();
                match &result {
                    Ok(payload) => {
                        entry.payload = Some(payload.clone());
                        entry.fetched_at = Some(Instant::now());
                        entry.in_flight = None;
                    }
                    Err(err) => {
                        log::debug!("request for {key} failed: {err}");
                        entry.in_flight = None;
                    }
                }
            }

            if let (Some(store), Ok(payload)) = (&store, &result) {
                store.put(&key, payload, false);
            }

            result
        }
        .boxed()
        .shared()
    }
}
