//! Single-flight origin fetches
//!
//! Concurrent callers asking for the same key share one upstream fetch: the
//! caller that takes the per-key lock without waiting fetches, everyone else
//! queues on the lock and first re-checks the cache the leader just filled.
//! A failed leader gets exactly one retry from the first follower; the rest of
//! the queue receives that retry's error.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use oddsfeed_core::{CoalescerConfig, FetchError};

/// Fetch attempts per burst before queued callers stop hitting the origin
const MAX_ATTEMPTS: u32 = 2;

/// Outcome of the current burst, guarded by the per-key lock
struct Flight<E> {
    attempts: u32,
    last_error: Option<E>,
}

impl<E> Flight<E> {
    fn new() -> Self {
        Self {
            attempts: 0,
            last_error: None,
        }
    }
}

struct LockEntry<E> {
    lock: Arc<AsyncMutex<Flight<E>>>,
    last_used: Instant,
}

pub struct RequestCoalescer<E = FetchError> {
    locks: DashMap<String, LockEntry<E>>,
    stale_window: Duration,
    last_sweep: Mutex<Instant>,
}

impl<E: Clone> RequestCoalescer<E> {
    pub fn new(stale_window: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            stale_window,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(config: &CoalescerConfig) -> Self {
        Self::new(config.stale_window())
    }

    /// Run `fetch` at most twice per burst of callers for `key`.
    ///
    /// Waiters call `recheck` once they get the lock and return its value if
    /// present. The first waiter after a failed fetch retries while holding
    /// the lock; waiters after a failed retry get its error back.
    pub async fn coalesce<T, F, Fut, R>(&self, key: &str, fetch: F, recheck: R) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce() -> Option<T>,
    {
        self.maybe_sweep();
        let lock = self.lock_for(key);

        if let Ok(mut flight) = lock.try_lock() {
            trace!(key, "Coalescer leader fetching");
            *flight = Flight::new();
            return Self::attempt(&mut flight, fetch).await;
        }

        let mut flight = lock.lock().await;
        if let Some(value) = recheck() {
            trace!(key, "Coalesced onto leader result");
            return Ok(value);
        }

        if flight.attempts >= MAX_ATTEMPTS {
            if let Some(error) = flight.last_error.clone() {
                trace!(key, "Retry already failed, sharing its error");
                return Err(error);
            }
        }

        debug!(key, attempt = flight.attempts + 1, "Leader left no value, fetching as follower");
        Self::attempt(&mut flight, fetch).await
    }

    async fn attempt<T, F, Fut>(flight: &mut Flight<E>, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        flight.attempts += 1;
        let result = fetch().await;
        flight.last_error = result.as_ref().err().cloned();
        result
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<Flight<E>>> {
        let now = Instant::now();
        let mut entry = self.locks.entry(key.to_string()).or_insert_with(|| LockEntry {
            lock: Arc::new(AsyncMutex::new(Flight::new())),
            last_used: now,
        });
        entry.last_used = now;
        Arc::clone(&entry.lock)
    }

    /// Drop idle, unheld locks; runs at most once per stale window
    fn maybe_sweep(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < self.stale_window {
                return;
            }
            *last = now;
        }

        let before = self.locks.len();
        self.locks.retain(|_, entry| {
            let held = Arc::strong_count(&entry.lock) > 1;
            held || now.saturating_duration_since(entry.last_used) < self.stale_window
        });
        let swept = before.saturating_sub(self.locks.len());
        if swept > 0 {
            debug!(swept, remaining = self.locks.len(), "Swept idle coalescer locks");
        }
    }

    /// Number of live per-key locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<E: Clone> Default for RequestCoalescer<E> {
    fn default() -> Self {
        Self::from_config(&CoalescerConfig::default())
    }
}
