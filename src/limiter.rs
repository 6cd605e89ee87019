//! Per-client admission control.
//!
//! [`RateLimiter`] keeps one [`RateLimitBucket`] per client key. Buckets
//! refill in whole-window steps rather than continuously: once at least one
//! full window has passed since the last refill, the bucket gets
//! `floor(elapsed / window) * capacity` tokens back (capped at capacity) and
//! the refill clock restarts at *now*. A burst right before a window
//! boundary therefore waits a full window from the refill, not from the
//! burst. Existing callers depend on this quantized behaviour.
//!
//! # Fallback key
//!
//! Requests whose client identity cannot be resolved are all accounted to
//! [`FALLBACK_CLIENT_KEY`]. They share a single bucket, which is coarse on
//! purpose: an unidentifiable caller gets no bucket of its own to reset by
//! dropping headers.
//!
//! # Concurrency
//!
//! Buckets live in a sharded lock table. A key always hashes to the same
//! shard, so check-and-consume for one key is atomic while unrelated keys
//! mostly proceed in parallel. The idle sweep locks one shard at a time.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::debug;

use crate::maintenance::{self, SweepHandle};
use crate::sync::lock;
use crate::telemetry;

/// Key shared by every caller without a resolvable identity.
pub const FALLBACK_CLIENT_KEY: &str = "unknown";

const SHARD_COUNT: usize = 16;

/// Configuration for a [`RateLimiter`].
///
/// ```rust
/// # use imagegate::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .capacity(3)
///     .window(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Tokens per window. Default: 10.
    pub capacity: u32,
    /// Refill window. Default: 60s.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of tokens granted per window.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the refill window.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Token state for one client key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitBucket {
    pub key: String,
    pub tokens: u32,
    pub last_refill: Instant,
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimitBucket {
    fn new(key: &str, config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            key: key.to_owned(),
            tokens: config.capacity,
            last_refill: now,
            capacity: config.capacity,
            window: config.window,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed < self.window {
            return;
        }
        let windows = elapsed.as_nanos() / self.window.as_nanos();
        let granted = windows.saturating_mul(u128::from(self.capacity));
        let tokens = (u128::from(self.tokens) + granted).min(u128::from(self.capacity));
        self.tokens = tokens as u32;
        self.last_refill = now;
    }

    fn consume(&mut self, now: Instant) -> RateLimitDecision {
        self.refill(now);
        let reset_at = self.last_refill + self.window;

        if self.tokens > 0 {
            self.tokens -= 1;
            return RateLimitDecision {
                allowed: true,
                remaining: self.tokens,
                limit: self.capacity,
                reset_at,
                retry_after_secs: None,
            };
        }

        let wait = reset_at.saturating_duration_since(now);
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            limit: self.capacity,
            reset_at,
            retry_after_secs: Some(wait.as_millis().div_ceil(1000) as u64),
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_refill) > self.window * 2
    }
}

/// Outcome of [`RateLimiter::check_and_consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Tokens left in the current window after this call.
    pub remaining: u32,
    pub limit: u32,
    /// When the bucket next refills.
    pub reset_at: Instant,
    /// Whole seconds to wait before retrying; set only when denied.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    /// Time left until the bucket refills.
    pub fn reset_in(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// Response headers describing this decision.
    ///
    /// `X-RateLimit-Reset` is a unix timestamp in seconds. `Retry-After` is
    /// present only on denial, alongside an HTTP 429.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let reset_unix = (SystemTime::now() + self.reset_in())
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", reset_unix.to_string()),
        ];
        if let Some(secs) = self.retry_after_secs {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }
}

type Shard = Mutex<HashMap<String, RateLimitBucket>>;

/// Sharded per-key token buckets.
pub struct RateLimiter {
    config: RateLimitConfig,
    shards: Box<[Shard]>,
    sweeper: Mutex<Option<SweepHandle>>,
}

impl RateLimiter {
    /// Create an empty limiter. A zero window is raised to one millisecond.
    pub fn new(mut config: RateLimitConfig) -> Self {
        config.window = config.window.max(Duration::from_millis(1));
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            config,
            shards,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one token from `key`'s bucket if available.
    ///
    /// Blank keys are accounted to [`FALLBACK_CLIENT_KEY`].
    pub fn check_and_consume(&self, key: &str) -> RateLimitDecision {
        self.check_and_consume_at(key, Instant::now())
    }

    fn check_and_consume_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let key = normalize_key(key);
        let decision = {
            let mut shard = lock(self.shard_for(key));
            shard
                .entry(key.to_owned())
                .or_insert_with(|| RateLimitBucket::new(key, &self.config, now))
                .consume(now)
        };

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        metrics::counter!(telemetry::RATE_LIMIT_DECISIONS_TOTAL, "outcome" => outcome)
            .increment(1);
        if !decision.allowed {
            debug!(
                key,
                retry_after_secs = decision.retry_after_secs,
                "rate limit exceeded"
            );
        }
        decision
    }

    /// Snapshot of a key's bucket, if one exists.
    pub fn bucket(&self, key: &str) -> Option<RateLimitBucket> {
        let key = normalize_key(key);
        lock(self.shard_for(key)).get(key).cloned()
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| lock(s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget one key's bucket; its next request starts with a full bucket.
    pub fn reset_key(&self, key: &str) {
        let key = normalize_key(key);
        lock(self.shard_for(key)).remove(key);
    }

    /// Forget every bucket.
    pub fn reset(&self) {
        for shard in self.shards.iter() {
            lock(shard).clear();
        }
    }

    /// Remove buckets untouched for more than two windows.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = lock(shard);
                let before = shard.len();
                shard.retain(|_, bucket| !bucket.is_idle(now));
                before - shard.len()
            })
            .sum()
    }

    /// Start (or restart) the periodic idle sweep.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let handle = maintenance::spawn_periodic("rate_limiter", interval, move || {
            weak.upgrade().map(|limiter| limiter.sweep_idle())
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

    /// Stop background work and drop all buckets.
    pub fn dispose(&self) {
        self.stop_sweeper();
        self.reset();
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn normalize_key(key: &str) -> &str {
    let key = key.trim();
    if key.is_empty() { FALLBACK_CLIENT_KEY } else { key }
}

/// Resolve a client key from forwarding headers.
///
/// Uses the first non-blank entry of an `X-Forwarded-For` list, then
/// `X-Real-IP`, and falls back to [`FALLBACK_CLIENT_KEY`].
pub fn client_key<'a>(forwarded_for: Option<&'a str>, real_ip: Option<&'a str>) -> &'a str {
    forwarded_for
        .and_then(|list| list.split(',').map(str::trim).find(|s| !s.is_empty()))
        .or_else(|| real_ip.map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or(FALLBACK_CLIENT_KEY)
}
