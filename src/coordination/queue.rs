use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Duration};

use crate::coordination::breaker::CircuitBreaker;
use crate::error::{FetchError, FetchResult};

struct QueueItem {
    label: String,
    operation: BoxFuture<'static, FetchResult<Value>>,
    reply: oneshot::Sender<FetchResult<Value>>,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueStatus {
    pub depth: usize,
    pub blocked: bool,
    pub remaining_block: Duration,
}

/// Single-lane FIFO executor for every outbound upstream call. One worker
/// task runs at most one operation at a time, sleeps a fixed spacing delay
/// between operations, and discards everything still queued the moment an
/// operation comes back rate-limited.
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    breaker: Arc<CircuitBreaker>,
    depth: Arc<AtomicUsize>,
}

impl RequestQueue {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        spacing: Duration,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        tokio::spawn(drain_loop(
            rx,
            Arc::clone(&breaker),
            Arc::clone(&depth),
            spacing,
            request_timeout,
        ));

        Arc::new(Self { tx, breaker, depth })
    }

    /// Append an operation to the tail of the queue and wait for its outcome.
    /// The operation never runs synchronously; the worker task executes it in
    /// arrival order. Returns RateLimited without queueing when the breaker
    /// is already active.
    pub async fn enqueue<F>(&self, operation: F, label: impl Into<String>) -> FetchResult<Value>
    where
        F: Future<Output = FetchResult<Value>> + Send + 'static,
    {
        if self.breaker.is_blocked() {
            return Err(FetchError::RateLimited {
                retry_after: self.breaker.remaining(),
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let item = QueueItem {
            label: label.into(),
            operation: Box::pin(operation),
            reply: reply_tx,
        };

        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(item)
            .map_err(|_| FetchError::Upstream("request queue worker stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| FetchError::Upstream("request queue worker stopped".to_string()))?
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            depth: self.depth.load(Ordering::SeqCst),
            blocked: self.breaker.is_blocked(),
            remaining_block: self.breaker.remaining(),
        }
    }
}

async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    breaker: Arc<CircuitBreaker>,
    depth: Arc<AtomicUsize>,
    spacing: Duration,
    request_timeout: Duration,
) {
    while let Some(item) = rx.recv().await {
        depth.fetch_sub(1, Ordering::SeqCst);

        // Items that slipped in before a trip are discarded, not executed.
        if breaker.is_blocked() {
            let _ = item.reply.send(Err(FetchError::RateLimited {
                retry_after: breaker.remaining(),
            }));
            continue;
        }

        log::debug!("executing queued request: {}", item.label);
        let result = match timeout(request_timeout, item.operation).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(request_timeout)),
        };

        if let Err(FetchError::RateLimited { .. }) = &result {
            breaker.trip();
            log::warn!(
                "rate limit signalled by `{}`; discarding {} queued request(s)",
                item.label,
                depth.load(Ordering::SeqCst)
            );

            // Normalise the retry hint to the breaker deadline just set.
            let _ = item.reply.send(Err(FetchError::RateLimited {
                retry_after: breaker.remaining(),
            }));

            while let Ok(pending) = rx.try_recv() {
                depth.fetch_sub(1, Ordering::SeqCst);
                let _ = pending.reply.send(Err(FetchError::RateLimited {
                    retry_after: breaker.remaining(),
                }));
            }
            continue;
        }

        if let Err(err) = &result {
            log::debug!("queued request `{}` failed: {}", item.label, err);
        }
        let _ = item.reply.send(result);

        sleep(spacing).await;
    }
}
