//! Telemetry metric name constants.
//!
//! Centralised metric names for imagegate operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `imagegate_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: what was being retried (e.g. "generate")
//! - `outcome`: "allowed" | "denied" for rate limiting, "ok" | "partial" | "error" for generation
//! - `category`: [`ErrorCategory`](crate::ErrorCategory) name of a failure

/// Rate limiter admission decisions.
///
/// Labels: `outcome` ("allowed" | "denied").
pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "imagegate_rate_limit_decisions_total";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `operation`, `category`.
pub const RETRIES_TOTAL: &str = "imagegate_retries_total";

/// Deduplicator hits on a fresh cached result.
pub const CACHE_HITS_TOTAL: &str = "imagegate_cache_hits_total";

/// Deduplicator misses that started a new operation.
pub const CACHE_MISSES_TOTAL: &str = "imagegate_cache_misses_total";

/// Callers that joined an operation already in flight for the same key.
pub const INFLIGHT_JOINS_TOTAL: &str = "imagegate_inflight_joins_total";

/// Completed fan-out batches.
///
/// Labels: `outcome` ("ok" | "partial" | "error").
pub const GENERATIONS_TOTAL: &str = "imagegate_generations_total";

/// Wall-clock duration of a fan-out batch in seconds.
pub const GENERATION_DURATION_SECONDS: &str = "imagegate_generation_duration_seconds";

/// Individual upstream image calls that failed or returned no URL.
///
/// Labels: `category`.
pub const IMAGE_FAILURES_TOTAL: &str = "imagegate_image_failures_total";
