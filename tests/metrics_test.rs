//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use imagegate::telemetry;
use imagegate::{
    CancellationToken, GenerationRequest, Imagegate, ImageProvider, ProviderImage,
    ProviderRequest, RateLimitConfig, RateLimiter, RawError, RetryConfig,
};

// ============================================================================
// Mock providers
// ============================================================================

/// Fails every odd seed.
struct HalfFailingProvider;

#[async_trait]
impl ImageProvider for HalfFailingProvider {
    fn name(&self) -> &str {
        "half-failing"
    }

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderImage, RawError> {
        if request.seed % 2 == 1 {
            Err(RawError::with_status(502, "bad gateway"))
        } else {
            Ok(ProviderImage::url("https://cdn.example.com/ok.png"))
        }
    }
}

struct DownProvider;

#[async_trait]
impl ImageProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    async fn invoke(&self, _request: &ProviderRequest) -> Result<ProviderImage, RawError> {
        Err(RawError::with_status(503, "Service Unavailable"))
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for a metric name carrying a specific label value.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn partial_generation_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let gateway = Imagegate::builder()
                    .provider(HalfFailingProvider)
                    .build()?;
                let request = GenerationRequest::new("a fox").num_images(4).seed(0);
                gateway.generate(request.clone(), &CancellationToken::new()).await?;
                gateway.generate(request, &CancellationToken::new()).await
            })
        })
    });
    assert_eq!(result.unwrap().images.len(), 2);

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::GENERATIONS_TOTAL, "outcome", "partial"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::IMAGE_FAILURES_TOTAL, "category", "server"),
        2
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert!(
        has_histogram(&snapshot, telemetry::GENERATION_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failed_batches_record_retries() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let gateway = Imagegate::builder()
                    .provider(DownProvider)
                    .retry(
                        RetryConfig::new()
                            .max_attempts(3)
                            .initial_delay(Duration::from_millis(1))
                            .jitter(false),
                    )
                    .build()?;
                gateway
                    .generate(
                        GenerationRequest::new("a fox").num_images(1),
                        &CancellationToken::new(),
                    )
                    .await
            })
        })
    });
    assert!(result.is_err());

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::RETRIES_TOTAL, "category", "generation"),
        2
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::GENERATIONS_TOTAL, "outcome", "error"),
        3
    );
}

#[test]
fn rate_limit_decisions_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new().capacity(1)));
        limiter.check_and_consume("a");
        limiter.check_and_consume("a");
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RATE_LIMIT_DECISIONS_TOTAL, "outcome", "allowed"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RATE_LIMIT_DECISIONS_TOTAL, "outcome", "denied"),
        1
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let gateway = Imagegate::builder()
        .provider(HalfFailingProvider)
        .build()
        .unwrap();
    let _result = gateway
        .generate(
            GenerationRequest::new("a fox").num_images(2).seed(0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
}
