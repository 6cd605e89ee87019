use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use imagegate::{
    CancellationToken, ErrorCategory, ImagegateError, RawError, Result, RetryConfig,
    RetryExecutor, RetryHooks,
};

/// Operation that fails N times then succeeds.
struct FailThenSucceed {
    fail_count: AtomicU32,
    fail_with: fn() -> ImagegateError,
    total_calls: AtomicU32,
}

impl FailThenSucceed {
    fn new(failures: u32, fail_with: fn() -> ImagegateError) -> Self {
        Self {
            fail_count: AtomicU32::new(failures),
            fail_with,
            total_calls: AtomicU32::new(0),
        }
    }

    async fn call(&self) -> Result<&'static str> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let remaining = self.fail_count.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_count.fetch_sub(1, Ordering::Relaxed);
            return Err((self.fail_with)());
        }
        Ok("ok")
    }

    fn call_count(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

fn server_error() -> ImagegateError {
    RawError::with_status(503, "Service Unavailable").into()
}

fn unauthorized() -> ImagegateError {
    RawError::new("Unauthorized: invalid api key").into()
}

fn fast(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
}

#[tokio::test]
async fn retries_on_transient_error_then_succeeds() {
    let op = FailThenSucceed::new(2, server_error);
    let executor = RetryExecutor::new("test", fast(3));

    let result = executor.run(&CancellationToken::new(), || op.call()).await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(op.call_count(), 3);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let op = FailThenSucceed::new(10, server_error);
    let executor = RetryExecutor::new("test", fast(3));

    let err = executor
        .run(&CancellationToken::new(), || op.call())
        .await
        .unwrap_err();

    assert_eq!(err.category(), Some(ErrorCategory::Server));
    assert_eq!(op.call_count(), 3);
}

#[tokio::test]
async fn permanent_error_runs_exactly_once() {
    let op = FailThenSucceed::new(10, unauthorized);
    let executor = RetryExecutor::new("test", fast(5));

    let err = executor
        .run(&CancellationToken::new(), || op.call())
        .await
        .unwrap_err();

    assert_eq!(err.category(), Some(ErrorCategory::Authentication));
    assert!(!err.is_retryable());
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn disabled_retry_runs_once() {
    let op = FailThenSucceed::new(1, server_error);
    let executor = RetryExecutor::new("test", RetryConfig::disabled());

    assert!(executor.run(&CancellationToken::new(), || op.call()).await.is_err());
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn hooks_observe_each_transition() {
    let op = FailThenSucceed::new(1, server_error);
    let retries = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let successes = Arc::new(AtomicU32::new(0));

    let hooks = RetryHooks::new()
        .on_retry({
            let retries = Arc::clone(&retries);
            move |attempt, max| retries.lock().unwrap().push((attempt, max))
        })
        .on_error({
            let errors = Arc::clone(&errors);
            move |_err, ctx| errors.lock().unwrap().push((ctx.attempt, ctx.will_retry))
        })
        .on_success({
            let successes = Arc::clone(&successes);
            move |_value: &&'static str, attempts| successes.store(attempts, Ordering::SeqCst)
        });
    let executor = RetryExecutor::new("test", fast(3)).with_hooks(hooks);

    executor
        .run(&CancellationToken::new(), || op.call())
        .await
        .unwrap();

    assert_eq!(*retries.lock().unwrap(), vec![(2, 3)]);
    assert_eq!(*errors.lock().unwrap(), vec![(1, true)]);
    assert_eq!(successes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn final_failure_reports_will_not_retry() {
    let op = FailThenSucceed::new(10, server_error);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let hooks = RetryHooks::new().on_error({
        let errors = Arc::clone(&errors);
        move |_err, ctx| errors.lock().unwrap().push(ctx.will_retry)
    });
    let executor: RetryExecutor<&'static str> =
        RetryExecutor::new("test", fast(2)).with_hooks(hooks);

    let _ = executor.run(&CancellationToken::new(), || op.call()).await;

    assert_eq!(*errors.lock().unwrap(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_overrides_backoff() {
    let op = FailThenSucceed::new(1, || {
        RawError::with_status(429, "Too Many Requests")
            .retry_after(Duration::from_secs(20))
            .into()
    });
    let executor = RetryExecutor::new(
        "test",
        RetryConfig::new()
            .max_attempts(2)
            .initial_delay(Duration::from_millis(10))
            .jitter(false),
    );

    let start = tokio::time::Instant::now();
    executor
        .run(&CancellationToken::new(), || op.call())
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn huge_retry_after_hint_sleeps_for_max_delay() {
    let op = FailThenSucceed::new(1, || {
        RawError::with_status(429, "Too Many Requests")
            .retry_after(Duration::from_secs(u64::MAX))
            .into()
    });
    let executor = RetryExecutor::new("test", RetryConfig::new().max_attempts(2));

    let start = tokio::time::Instant::now();
    let result = executor.run(&CancellationToken::new(), || op.call()).await;

    assert_eq!(result.unwrap(), "ok");
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert!(start.elapsed() < Duration::from_secs(31));
    assert_eq!(op.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_backoff_sleep() {
    let op = Arc::new(FailThenSucceed::new(10, server_error));
    let executor = RetryExecutor::new(
        "test",
        RetryConfig::new()
            .max_attempts(5)
            .initial_delay(Duration::from_secs(60))
            .jitter(false),
    );
    let cancel = CancellationToken::new();

    let task = {
        let op = Arc::clone(&op);
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.run(&cancel, || op.call()).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn cancelled_error_is_never_retried() {
    let op = FailThenSucceed::new(10, || ImagegateError::Cancelled);
    let executor = RetryExecutor::new("test", fast(5));

    let err = executor
        .run(&CancellationToken::new(), || op.call())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(op.call_count(), 1);
}

#[test]
fn jitter_stays_within_ten_percent() {
    let config = RetryConfig::new()
        .initial_delay(Duration::from_millis(1000))
        .max_delay(Duration::from_secs(60));
    for _ in 0..100 {
        let delay = config.effective_delay(0, None);
        assert!(delay >= Duration::from_millis(1000));
        assert!(delay <= Duration::from_millis(1101));
    }
}
