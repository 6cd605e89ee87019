//! Request deduplication.
//!
//! [`Deduplicator`] guarantees at most one in-flight operation per
//! normalized [`DedupKey`]:
//!
//! - a fresh cached result is returned without running anything;
//! - a caller arriving while an operation for the same key is running joins
//!   that operation's shared future and receives the same value;
//! - otherwise the caller's operation is registered as the pending future,
//!   and its success is cached for the TTL once it settles.
//!
//! Failures are propagated to every joined caller and never cached. When
//! every caller waiting on an operation has gone away, the pending slot is
//! released and the operation is dropped with it.
//!
//! The cache is bounded. When full, the entry inserted longest ago is evicted
//! before a new one goes in; overwriting a key counts as a fresh insertion.
//!
//! ```text
//! get_or_run(key, op)
//!        │
//!        ▼
//!   cached & fresh? ──yes──► return cached value
//!        │ no
//!        ▼
//!   pending for key? ──yes──► await shared future
//!        │ no
//!        ▼
//!   register shared(op()) ──► settle: clear pending, cache Ok
//! ```
//!
//! All state sits behind one mutex that is never held across an `.await`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::debug;

use crate::maintenance::{self, SweepHandle};
use crate::sync::lock;
use crate::telemetry;
use crate::types::GenerationRequest;
use crate::Result;

/// Configuration for a [`Deduplicator`].
///
/// ```rust
/// # use imagegate::DedupConfig;
/// # use std::time::Duration;
/// let config = DedupConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    /// Maximum number of cached results. Default: 100.
    pub max_entries: usize,
    /// How long a cached result may be served. Default: 5 minutes.
    pub ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(300),
        }
    }
}

impl DedupConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached results.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached results.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Normalized identity of a request.
///
/// The prompt is trimmed and lowercased; options are rendered in sorted
/// name order, so equivalent requests produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl DedupKey {
    /// Key for a bare prompt with no options.
    pub fn from_prompt(prompt: &str) -> Self {
        Self::from_parts(prompt, std::iter::empty::<(&str, String)>())
    }

    /// Key for a prompt plus named option values, in any order.
    pub fn from_parts<'a, I>(prompt: &str, options: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let options: BTreeMap<&str, String> = options.into_iter().collect();
        let mut key = prompt.trim().to_lowercase();
        if !options.is_empty() {
            let rendered: Vec<String> = options
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            key.push('|');
            key.push_str(&rendered.join("&"));
        }
        Self(key)
    }

    /// Key for a full generation request.
    pub fn for_request(request: &GenerationRequest) -> Self {
        let options = &request.options;
        let mut parts = vec![("image_size", options.image_size.to_string())];
        if let Some(n) = options.num_images {
            parts.push(("num_images", n.to_string()));
        }
        if let Some(seed) = options.seed {
            parts.push(("seed", seed.to_string()));
        }
        Self::from_parts(&request.prompt, parts)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type SharedOperation<T> = Shared<BoxFuture<'static, Result<T>>>;

struct CacheEntry<T> {
    result: T,
    expires_at: Instant,
    seq: u64,
}

struct Pending<T> {
    id: u64,
    future: SharedOperation<T>,
    /// Callers currently awaiting `future`.
    waiters: usize,
}

struct State<T> {
    entries: HashMap<DedupKey, CacheEntry<T>>,
    /// Insertion order; records whose `seq` no longer matches are stale.
    order: VecDeque<(DedupKey, u64)>,
    pending: HashMap<DedupKey, Pending<T>>,
    next_seq: u64,
}

impl<T: Clone> State<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn fresh(&mut self, key: &DedupKey, now: Instant) -> Option<T> {
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.result.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: DedupKey, result: T, now: Instant, config: &DedupConfig) {
        if config.max_entries == 0 {
            return;
        }
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= config.max_entries {
                let Some((oldest, seq)) = self.order.pop_front() else {
                    break;
                };
                if self.entries.get(&oldest).is_some_and(|e| e.seq == seq) {
                    self.entries.remove(&oldest);
                    debug!(key = %oldest, "evicted oldest cached result");
                }
            }
        }

        let seq = self.next_seq();
        self.order.push_back((key.clone(), seq));
        self.entries.insert(
            key,
            CacheEntry {
                result,
                expires_at: now + config.ttl,
                seq,
            },
        );
        if self.order.len() > self.entries.len() * 2 {
            self.compact();
        }
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.pending.clear();
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    config: DedupConfig,
}

impl<T> Inner<T> {
    /// Forget one waiter of the slot registered as `id`; the last one out
    /// releases the slot.
    fn leave(&self, key: &DedupKey, id: u64) -> Option<Pending<T>> {
        let mut state = lock(&self.state);
        let pending = state.pending.get_mut(key).filter(|p| p.id == id)?;
        pending.waiters = pending.waiters.saturating_sub(1);
        if pending.waiters > 0 {
            return None;
        }
        debug!(key = %key, "all waiters gone, releasing in-flight operation");
        state.pending.remove(key)
    }
}

/// Registered for each caller awaiting a shared operation.
struct Waiter<T> {
    inner: Arc<Inner<T>>,
    key: DedupKey,
    id: u64,
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        // Dropped after the lock is released.
        let _released = self.inner.leave(&self.key, self.id);
    }
}

impl<T: Clone> Inner<T> {
    /// Clear the pending slot registered as `id` and cache a success.
    ///
    /// A slot that was invalidated (or replaced) while the operation ran is
    /// left alone and its result is not cached.
    fn settle(&self, key: &DedupKey, id: u64, result: &Result<T>) {
        let mut state = lock(&self.state);
        if state.pending.get(key).is_none_or(|p| p.id != id) {
            return;
        }
        state.pending.remove(key);
        if let Ok(value) = result {
            state.insert(key.clone(), value.clone(), Instant::now(), &self.config);
        }
    }

    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|_, entry| now < entry.expires_at);
        let removed = before - state.entries.len();
        if removed > 0 {
            state.compact();
        }
        removed
    }
}

/// Shares in-flight work and caches results per [`DedupKey`].
///
/// `T` is cloned out to every caller, so wrap large values in an `Arc`;
/// joined callers then hold the very same allocation.
pub struct Deduplicator<T> {
    inner: Arc<Inner<T>>,
    sweeper: Mutex<Option<SweepHandle>>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty deduplicator.
    pub fn new(config: DedupConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                config,
            }),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.inner.config
    }

    /// Return the cached result for `key`, join the in-flight operation for
    /// it, or run `operation` as the new in-flight operation.
    ///
    /// `operation` is invoked only on the last path, and is not called until
    /// the shared future is first polled.
    pub async fn get_or_run<F, Fut>(&self, key: &DedupKey, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (shared, id) = {
            let mut state = lock(&self.inner.state);
            if let Some(hit) = state.fresh(key, Instant::now()) {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                debug!(key = %key, "serving cached result");
                return Ok(hit);
            }

            if let Some(pending) = state.pending.get_mut(key) {
                metrics::counter!(telemetry::INFLIGHT_JOINS_TOTAL).increment(1);
                debug!(key = %key, "joining in-flight operation");
                pending.waiters += 1;
                (pending.future.clone(), pending.id)
            } else {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                let id = state.next_seq();
                let inner = Arc::downgrade(&self.inner);
                let owned_key = key.clone();
                let future = async move {
                    let result = operation().await;
                    if let Some(inner) = Weak::upgrade(&inner) {
                        inner.settle(&owned_key, id, &result);
                    }
                    result
                }
                .boxed()
                .shared();
                state.pending.insert(
                    key.clone(),
                    Pending {
                        id,
                        future: future.clone(),
                        waiters: 1,
                    },
                );
                (future, id)
            }
        };

        let _waiter = Waiter {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            id,
        };
        shared.await
    }

    /// Fresh cached result for `key`, without running anything.
    pub fn get(&self, key: &DedupKey) -> Option<T> {
        lock(&self.inner.state).fresh(key, Instant::now())
    }

    /// Drop the cached result and pending slot for `key`.
    ///
    /// An operation already running for `key` still resolves for the callers
    /// awaiting it, but its result is not cached. Returns whether anything
    /// was removed.
    pub fn invalidate(&self, key: &DedupKey) -> bool {
        let mut state = lock(&self.inner.state);
        let cached = state.entries.remove(key).is_some();
        let pending = state.pending.remove(key).is_some();
        cached || pending
    }

    /// Number of cached results, fresh or not yet swept.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    /// Remove expired results. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Drop every cached result and pending slot.
    pub fn clear(&self) {
        lock(&self.inner.state).clear();
    }

    /// Alias for [`clear`](Self::clear).
    pub fn reset(&self) {
        self.clear();
    }

    /// Start (or restart) the periodic TTL sweep.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn start_sweeper(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let handle = maintenance::spawn_periodic("dedup", interval, move || {
            weak.upgrade().map(|inner| inner.sweep_expired())
        });
        if let Some(previous) = lock(&self.sweeper).replace(handle) {
            previous.stop();
        }
    }

    /// Stop the periodic sweep, if running.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.stop();
        }
    }

    /// Stop background work and drop all state.
    pub fn dispose(&self) {
        self.stop_sweeper();
        self.clear();
    }
}

impl<T> Default for Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
