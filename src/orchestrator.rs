//! Fan-out image generation with partial-failure tolerance.
//!
//! One [`GenerationRequest`] becomes `n` independent provider calls, image
//! `i` seeded with `base_seed + i`. Every call races its own timeout and all
//! of them are joined (no short-circuit on the first failure):
//!
//! - all `n` succeed: a full result;
//! - some succeed: a **successful** partial result, logged as degraded;
//! - none succeed: a retryable `generation` error, unless every call failed
//!   with the same non-retryable classification (say, a bad API key), in
//!   which case that classification is surfaced and nothing is retried.
//!
//! The whole fan-out runs inside a [`RetryExecutor`], so a systemic
//! upstream failure is retried as one batch rather than image by image.
//!
//! # Ordering
//!
//! Sub-calls are index-tagged and joined positionally, so `images` is in
//! seed order with failed slots removed.
//!
//! # Cancellation
//!
//! Cancelling the token drops every in-flight sub-call and any pending
//! retry sleep; partial results gathered so far are discarded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::classify::{ClassifiedError, ErrorCategory, RawError, classify};
use crate::providers::{ImageProvider, ProviderImage, ProviderRequest};
use crate::retry::{RetryConfig, RetryExecutor, RetryHooks};
use crate::telemetry;
use crate::types::{
    DEFAULT_MAX_PROMPT_LEN, GenerationMetadata, GenerationRequest, GenerationResult, MAX_IMAGES,
};
use crate::{ImagegateError, Result};

/// Upper bound (exclusive) of randomly chosen base seeds.
const RANDOM_SEED_BOUND: u64 = 1_000_000_000;

/// Configuration for a [`GenerationOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Images per request when the request does not say. Default: 4.
    pub default_num_images: u32,
    /// Timeout for each upstream call. Default: 60s.
    pub per_call_timeout: Duration,
    /// Longest accepted prompt, in characters. Default: 1000.
    pub max_prompt_len: usize,
    /// Reported in result metadata.
    pub model_version: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_num_images: 4,
            per_call_timeout: Duration::from_secs(60),
            max_prompt_len: DEFAULT_MAX_PROMPT_LEN,
            model_version: "unknown".to_string(),
        }
    }
}

impl GenerationConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_num_images(mut self, n: u32) -> Self {
        self.default_num_images = n;
        self
    }

    pub fn per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    pub fn max_prompt_len(mut self, len: usize) -> Self {
        self.max_prompt_len = len;
        self
    }

    pub fn model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }
}

/// Retry budget for whole batches: two attempts.
pub fn default_batch_retry() -> RetryConfig {
    RetryConfig::new().max_attempts(2)
}

/// Issues and aggregates the parallel provider calls for one request.
pub struct GenerationOrchestrator {
    provider: Arc<dyn ImageProvider>,
    config: GenerationConfig,
    retry: RetryExecutor<GenerationResult>,
}

impl GenerationOrchestrator {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        config: GenerationConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            provider,
            config,
            retry: RetryExecutor::new("generate", retry),
        }
    }

    /// Attach hooks to the batch retry executor.
    pub fn with_hooks(mut self, hooks: RetryHooks<GenerationResult>) -> Self {
        self.retry = self.retry.with_hooks(hooks);
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate images for `request`, retrying failed batches.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        self.retry
            .run(cancel, || self.fan_out(request, cancel))
            .await
    }

    /// Run one batch of provider calls, without retry.
    pub async fn fan_out(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let requested = request
            .options
            .num_images
            .unwrap_or(self.config.default_num_images)
            .clamp(1, MAX_IMAGES);
        let base_seed = request
            .options
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..RANDOM_SEED_BOUND));

        debug!(
            provider = self.provider.name(),
            requested,
            base_seed,
            size = %request.options.image_size,
            "starting fan-out"
        );

        let calls = (0..requested).map(|index| {
            let call = ProviderRequest {
                prompt: request.prompt.clone(),
                seed: base_seed.wrapping_add(u64::from(index)),
                image_size: request.options.image_size,
            };
            async move { (index, self.invoke_one(index, call).await) }
        });

        let outcomes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ImagegateError::Cancelled),
            outcomes = join_all(calls) => outcomes,
        };

        let mut images = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(url) => images.push(url),
                Err(e) => {
                    metrics::counter!(telemetry::IMAGE_FAILURES_TOTAL,
                        "category" => e.category.as_str(),
                    )
                    .increment(1);
                    debug!(index, category = %e.category, error = %e.message, "image call failed");
                    failures.push(e);
                }
            }
        }

        let elapsed = start.elapsed();
        metrics::histogram!(telemetry::GENERATION_DURATION_SECONDS).record(elapsed.as_secs_f64());

        if images.is_empty() {
            metrics::counter!(telemetry::GENERATIONS_TOTAL, "outcome" => "error").increment(1);
            let error = batch_failure(requested, failures);
            warn!(requested, category = %error.category, error = %error.message, "every image call failed");
            return Err(error.into());
        }

        let outcome = if images.len() < requested as usize {
            warn!(
                succeeded = images.len(),
                requested,
                "partial generation: returning surviving images"
            );
            "partial"
        } else {
            "ok"
        };
        metrics::counter!(telemetry::GENERATIONS_TOTAL, "outcome" => outcome).increment(1);

        Ok(GenerationResult {
            images,
            metadata: GenerationMetadata {
                prompt: request.prompt.clone(),
                generation_time_ms: elapsed.as_millis() as u64,
                model_version: self.config.model_version.clone(),
                requested_images: requested,
            },
            generation_id: Uuid::new_v4(),
        })
    }

    /// One provider call under the per-call timeout, classified on failure.
    async fn invoke_one(
        &self,
        index: u32,
        request: ProviderRequest,
    ) -> std::result::Result<String, ClassifiedError> {
        let timeout = self.config.per_call_timeout;
        let outcome = match tokio::time::timeout(timeout, self.provider.invoke(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RawError::new(format!(
                "image request timeout after {}ms",
                timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(ProviderImage { url: Some(url) }) if !url.trim().is_empty() => Ok(url),
            Ok(_) => Err(
                ClassifiedError::new(ErrorCategory::Generation, "provider returned no image URL")
                    .with_context("index", index)
                    .with_context("seed", request.seed),
            ),
            Err(raw) => Err(classify(&raw)
                .with_context("index", index)
                .with_context("seed", request.seed)),
        }
    }
}

/// Error for a batch in which no image survived.
fn batch_failure(requested: u32, failures: Vec<ClassifiedError>) -> ClassifiedError {
    if let Some(first) = failures.first() {
        let uniform = failures.iter().all(|f| f.category == first.category);
        if uniform && !first.retryable {
            return first.clone().with_context("failed_images", requested);
        }
    }

    let mut error = ClassifiedError::new(
        ErrorCategory::Generation,
        format!("all {requested} image generations failed"),
    )
    .with_context("failed_images", requested);
    if let Some(first) = failures.first() {
        error = error.with_context("first_error", first.message.clone());
    }
    error.retry_after = failures.iter().filter_map(|f| f.retry_after).max();
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_failures_become_generation_error() {
        let error = batch_failure(
            2,
            vec![
                classify(&RawError::new("connection reset")),
                classify(&RawError::with_status(503, "down")),
            ],
        );
        assert_eq!(error.category, ErrorCategory::Generation);
        assert!(error.retryable);
        assert_eq!(error.context["first_error"], "connection reset");
    }

    #[test]
    fn uniform_permanent_failure_is_surfaced() {
        let auth = classify(&RawError::with_status(401, "nope"));
        let error = batch_failure(2, vec![auth.clone(), auth]);
        assert_eq!(error.category, ErrorCategory::Authentication);
        assert!(!error.retryable);
    }

    #[test]
    fn uniform_retryable_failure_stays_generation() {
        let limited =
            classify(&RawError::with_status(429, "slow").retry_after(Duration::from_secs(3)));
        let error = batch_failure(2, vec![limited.clone(), limited]);
        assert_eq!(error.category, ErrorCategory::Generation);
        assert_eq!(error.retry_after, Some(Duration::from_secs(3)));
    }

    #[test]
    fn empty_failure_list_is_generation_error() {
        let error = batch_failure(1, Vec::new());
        assert_eq!(error.category, ErrorCategory::Generation);
    }
}
