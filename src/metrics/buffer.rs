use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;

use super::percentiles::{summarize, RouteSummary};
use super::record::MetricRecord;
use crate::config::{DEFAULT_BUFFER_CAPACITY, DEFAULT_LIVE_QUEUE_CAPACITY};

/// Window used when a caller does not name one.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

// ─── Public types ────────────────────────────────────────────────

/// Fixed-capacity ring of the most recent request records.
///
/// The timing middleware calls `add()`, query handlers call `get_summary()`, and
/// every live observer holds a [`Subscription`]. Storage and cursor sit behind
/// one mutex. Fan-out happens while it is held, so observers see records in
/// ring order, and it never waits on a slow observer.
///
/// Lock order is `inner` then `observers`.
pub struct MetricsBuffer {
    inner: Mutex<Inner>,
    observers: Arc<ObserverRegistry>,
    queue_capacity: usize,
}

/// Response body of the windowed summary query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub window_ms: u64,
    pub routes: Vec<RouteSummary>,
    pub total_requests: u64,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    slots: Vec<Arc<MetricRecord>>,
    capacity: usize,
    /// Next slot to overwrite once `slots` is full.
    cursor: usize,
}

type ObserverId = u64;

#[derive(Default)]
struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, mpsc::Sender<Arc<MetricRecord>>)>>,
    dropped: AtomicU64,
    /// Set on shutdown; later subscriptions start out ended.
    closed: AtomicBool,
}

// ─── MetricsBuffer impl ──────────────────────────────────────────

impl MetricsBuffer {
    /// A zero `capacity` or `queue_capacity` falls back to its default. The
    /// ring is never resized.
    pub fn new(capacity: usize, queue_capacity: usize) -> Self {
        let capacity = or_default(capacity, DEFAULT_BUFFER_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::with_capacity(capacity.min(65_536)),
                capacity,
                cursor: 0,
            }),
            observers: Arc::new(ObserverRegistry::default()),
            queue_capacity: or_default(queue_capacity, DEFAULT_LIVE_QUEUE_CAPACITY),
        }
    }

    /// Store a record, evicting the oldest once full, then notify observers.
    /// Returns the shared handle that was stored.
    pub fn add(&self, record: MetricRecord) -> Arc<MetricRecord> {
        let record = Arc::new(record);
        let mut inner = self.inner.lock();
        inner.push(record.clone());
        self.observers.notify(&record);
        drop(inner);
        record
    }

    /// Records whose timestamp falls in `[now - window, now]`, unordered.
    pub fn get_metrics(&self, window: Duration) -> Vec<Arc<MetricRecord>> {
        self.get_metrics_at(window, Utc::now())
    }

    pub fn get_metrics_at(&self, window: Duration, now: DateTime<Utc>) -> Vec<Arc<MetricRecord>> {
        let since = window_start(now, window);
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|r| r.timestamp >= since && r.timestamp <= now)
            .cloned()
            .collect()
    }

    /// Per-route statistics over the trailing window.
    pub fn get_summary(&self, window: Duration) -> WindowSummary {
        let records = self.get_metrics(window);
        WindowSummary {
            window_ms: window.as_millis() as u64,
            total_requests: records.len() as u64,
            routes: summarize(records.iter().map(|r| r.as_ref())),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.cursor = 0;
    }

    pub fn size(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Register a live observer. Dropping the returned handle deregisters it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.observers.register(tx);
        Subscription {
            id,
            receiver: rx,
            registry: self.observers.clone(),
        }
    }

    /// End every live subscription and refuse new ones. Used on shutdown so
    /// open SSE streams finish instead of holding the server open.
    pub fn close_subscriptions(&self) {
        let closed = self.observers.close();
        if closed > 0 {
            tracing::info!(observers = closed, "closed live subscriptions");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.observers.lock().len()
    }

    /// Notifications discarded because an observer's queue was full.
    pub fn dropped_notifications(&self) -> u64 {
        self.observers.dropped.load(Ordering::Relaxed)
    }
}

fn or_default(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn push(&mut self, record: Arc<MetricRecord>) {
        if self.slots.len() < self.capacity {
            self.slots.push(record);
        } else {
            self.slots[self.cursor] = record;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }
}

// ─── Observers ───────────────────────────────────────────────────

impl ObserverRegistry {
    fn register(&self, tx: mpsc::Sender<Arc<MetricRecord>>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut observers = self.observers.lock();
        // Once closed, `tx` is dropped here and the receiver ends at once.
        if !self.closed.load(Ordering::Acquire) {
            observers.push((id, tx));
        }
        id
    }

    /// Drop every sender. Returns how many observers were registered.
    fn close(&self) -> usize {
        let mut observers = self.observers.lock();
        self.closed.store(true, Ordering::Release);
        let count = observers.len();
        observers.clear();
        count
    }

    fn unregister(&self, id: ObserverId) {
        self.observers.lock().retain(|(oid, _)| *oid != id);
    }

    /// Best-effort fan-out: a full queue loses this record, a closed one is removed.
    fn notify(&self, record: &Arc<MetricRecord>) {
        let mut observers = self.observers.lock();
        if observers.is_empty() {
            return;
        }
        observers.retain(|(id, tx)| match tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(observer = id, "live observer lagging, notification dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// Handle for one live observer.
///
/// Yields every record added after it was created, in insertion order, minus
/// whatever was dropped while its queue was full.
pub struct Subscription {
    id: ObserverId,
    receiver: mpsc::Receiver<Arc<MetricRecord>>,
    registry: Arc<ObserverRegistry>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<MetricRecord>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<MetricRecord>> {
        self.receiver.try_recv().ok()
    }

    /// Explicit form of dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Stream for Subscription {
    type Item = Arc<MetricRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
