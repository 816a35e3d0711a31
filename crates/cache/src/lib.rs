//! Bounded key/value cache whose values are produced by async factories.
//!
//! At most one creation runs per key; concurrent callers for a missing key
//! wait on the same task. Entries past the capacity are evicted least
//! recently used first, by a background task that only one caller schedules
//! at a time.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Debug)]
pub enum CacheError<E> {
    /// The factory failed; every caller waiting on that creation sees the same error.
    Create(Arc<E>),
    /// The creation was aborted by `invalidate` or `clear`.
    Cancelled,
}

impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            CacheError::Create(err) => CacheError::Create(Arc::clone(err)),
            CacheError::Cancelled => CacheError::Cancelled,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CacheError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Create(err) => write!(f, "cache value creation failed: {}", err),
            CacheError::Cancelled => write!(f, "cache value creation was cancelled"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CacheError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Create(err) => Some(err.as_ref()),
            CacheError::Cancelled => None,
        }
    }
}

type Slot<V, E> = Option<Result<V, Arc<E>>>;

struct InFlight<V, E> {
    id: u64,
    result: watch::Receiver<Slot<V, E>>,
    /// `None` until the creating caller has spawned the task.
    task: Option<AbortHandle>,
}

struct State<K: Hash + Eq, V, E> {
    entries: LruCache<K, V>,
    in_flight: HashMap<K, InFlight<V, E>>,
}

struct Inner<K: Hash + Eq, V, E> {
    capacity: usize,
    state: Mutex<State<K, V, E>>,
    next_id: AtomicU64,
    evicting: AtomicBool,
    settled: Notify,
}

pub struct BoundedCache<K: Hash + Eq, V, E = std::convert::Infallible> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K: Hash + Eq, V, E> Clone for BoundedCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> BoundedCache<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                state: Mutex::new(State {
                    entries: LruCache::unbounded(),
                    in_flight: HashMap::new(),
                }),
                next_id: AtomicU64::new(0),
                evicting: AtomicBool::new(false),
                settled: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Resident entries. May briefly exceed the capacity until the pending
    /// eviction runs.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a resident value and marks it recently used. Never creates.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.state.lock().entries.get(key).cloned()
    }

    /// Returns the value for `key`, running `factory` on a spawned task if it
    /// is neither resident nor already being created. Only the caller that
    /// registers the creation invokes `factory`. Must be called from within a
    /// tokio runtime.
    pub async fn get_or_create<F, Fut>(&self, key: K, factory: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (mut receiver, registered) = {
            let mut state = self.inner.state.lock();
            if let Some(value) = state.entries.get(&key) {
                return Ok(value.clone());
            }
            match state.in_flight.get(&key) {
                Some(flight) => (flight.result.clone(), None),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let (sender, receiver) = watch::channel(None);
                    state.in_flight.insert(
                        key.clone(),
                        InFlight {
                            id,
                            result: receiver.clone(),
                            task: None,
                        },
                    );
                    (receiver, Some(Creation::new(&self.inner, key.clone(), id, sender)))
                }
            }
        };

        if let Some(creation) = registered {
            let id = creation.id;
            // The guard is already armed, so a panicking factory unregisters.
            let future = factory();
            let task = tokio::spawn(async move {
                let result = future.await.map_err(Arc::new);
                creation.finish(result);
            });
            self.inner.attach(&key, id, task.abort_handle());
        }

        let slot = match receiver.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => return Err(CacheError::Cancelled),
        };
        match slot {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(CacheError::Create(err)),
            None => Err(CacheError::Cancelled),
        }
    }

    /// Drops `key` and aborts a creation in progress for it.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        let (flight, value) = {
            let mut state = self.inner.state.lock();
            (state.in_flight.remove(key), state.entries.pop(key))
        };
        if let Some(task) = flight.and_then(|flight| flight.task) {
            task.abort();
        }
        value
    }

    pub fn clear(&self) {
        let flights: Vec<InFlight<V, E>> = {
            let mut state = self.inner.state.lock();
            state.entries.clear();
            state.in_flight.drain().map(|(_, flight)| flight).collect()
        };
        for task in flights.into_iter().filter_map(|flight| flight.task) {
            task.abort();
        }
    }

    /// Waits until no eviction is pending.
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            if !self.inner.evicting.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// Owned by the creating task. Dropping it before `finish` (panic, abort)
/// unregisters the key so a later request retries, and closes the channel so
/// waiters see `Cancelled`.
struct Creation<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    inner: Arc<Inner<K, V, E>>,
    key: K,
    id: u64,
    sender: watch::Sender<Slot<V, E>>,
    finished: bool,
}

impl<K, V, E> Creation<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn new(inner: &Arc<Inner<K, V, E>>, key: K, id: u64, sender: watch::Sender<Slot<V, E>>) -> Self {
        Self {
            inner: Arc::clone(inner),
            key,
            id,
            sender,
            finished: false,
        }
    }

    fn finish(mut self, result: Result<V, Arc<E>>) {
        self.finished = true;
        let over_capacity = {
            let mut state = self.inner.state.lock();
            let current = state
                .in_flight
                .get(&self.key)
                .map(|flight| flight.id == self.id)
                .unwrap_or(false);
            if current {
                state.in_flight.remove(&self.key);
                if let Ok(value) = &result {
                    state.entries.put(self.key.clone(), value.clone());
                }
            }
            state.entries.len() > self.inner.capacity
        };
        // Mark the eviction pending before any waiter wakes up.
        if over_capacity {
            self.inner.schedule_eviction();
        }
        let _ = self.sender.send(Some(result));
    }
}

impl<K, V, E> Drop for Creation<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.finished && self.inner.unregister(&self.key, self.id) {
            debug!("Cache creation {} ended without a value", self.id);
        }
    }
}

impl<K, V, E> Inner<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn attach(&self, key: &K, id: u64, task: AbortHandle) {
        let rejected = {
            let mut state = self.state.lock();
            match state.in_flight.get_mut(key) {
                Some(flight) if flight.id == id => {
                    flight.task = Some(task);
                    None
                }
                // Invalidated before the task was spawned.
                _ => Some(task),
            }
        };
        if let Some(task) = rejected {
            task.abort();
        }
    }

    /// Removes the in-flight entry `id` if it is still the registered one.
    fn unregister(&self, key: &K, id: u64) -> bool {
        let mut state = self.state.lock();
        let current = state
            .in_flight
            .get(key)
            .map(|flight| flight.id == id)
            .unwrap_or(false);
        if current {
            state.in_flight.remove(key);
        }
        current
    }

    /// No-op while an eviction is already pending; that one sees the latest size.
    fn schedule_eviction(self: &Arc<Self>) {
        if self.evicting.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            inner.evict();
        });
    }

    fn evict(&self) {
        let evicted = {
            let mut state = self.state.lock();
            let mut evicted = 0usize;
            while state.entries.len() > self.capacity {
                if state.entries.pop_lru().is_none() {
                    break;
                }
                evicted += 1;
            }
            self.evicting.store(false, Ordering::Release);
            evicted
        };
        if evicted > 0 {
            debug!("Evicted {} cache entries", evicted);
        }
        self.settled.notify_waiters();
    }
}
