//! The assembled request pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::ImageGatewayBuilder;
use crate::classify::{ClassifiedError, RawError, classify};
use crate::dedup::{DedupKey, Deduplicator};
use crate::limiter::{RateLimitDecision, RateLimiter};
use crate::orchestrator::{GenerationConfig, GenerationOrchestrator};
use crate::types::{GenerationRequest, GenerationResult};
use crate::{ImagegateError, Result};

/// Admission, validation, deduplication and fan-out behind one handle.
///
/// The gateway does not consume rate-limit tokens on its own; the surrounding
/// service calls [`check_rate_limit`](Self::check_rate_limit) with whatever
/// client identity it resolved and decides how to answer a denial.
///
/// Results are shared as `Arc`s, so callers that were deduplicated onto the
/// same operation hold the same allocation.
pub struct ImageGateway {
    pub(super) limiter: Arc<RateLimiter>,
    pub(super) dedup: Deduplicator<Arc<GenerationResult>>,
    pub(super) orchestrator: Arc<GenerationOrchestrator>,
    pub(super) sweep_interval: Duration,
}

impl ImageGateway {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> ImageGatewayBuilder {
        ImageGatewayBuilder::new()
    }

    /// Build a gateway with an HTTP provider from file configuration.
    #[cfg(feature = "http")]
    pub fn from_config(config: &crate::config::Config, secrets: &crate::config::Secrets) -> Result<Self> {
        use crate::providers::HttpImageProvider;

        let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
            ImagegateError::configuration("provider endpoint not configured")
        })?;
        let provider = match config.provider.timeout_secs {
            Some(secs) => {
                HttpImageProvider::with_timeout(endpoint, secrets.api_key(), Duration::from_secs(secs))?
            }
            None => HttpImageProvider::new(endpoint, secrets.api_key())?,
        };

        Self::builder()
            .provider(provider)
            .rate_limit(config.rate_limit.to_config())
            .retry(config.retry.to_config())
            .dedup(config.dedup.to_config())
            .generation(config.generation.to_config())
            .sweep_interval(config.rate_limit.sweep_interval())
            .build()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn deduplicator(&self) -> &Deduplicator<Arc<GenerationResult>> {
        &self.dedup
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        self.orchestrator.config()
    }

    /// Interval [`start_maintenance`](Self::start_maintenance) sweeps at.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Consume one token for `client_key`.
    pub fn check_rate_limit(&self, client_key: &str) -> RateLimitDecision {
        self.limiter.check_and_consume(client_key)
    }

    /// Classify an upstream failure.
    pub fn classify(&self, error: &RawError) -> ClassifiedError {
        classify(error)
    }

    /// Validate `request`, then serve it from cache, join an identical
    /// in-flight request, or fan out to the provider.
    ///
    /// Cancelling `cancel` abandons this caller's wait. An operation other
    /// callers joined keeps running for them unless it was started under
    /// this caller's token, in which case the survivors restart it under
    /// their own.
    #[instrument(name = "imagegate.generate", skip_all, fields(prompt_len = request.prompt.len()))]
    pub async fn generate(
        &self,
        mut request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<GenerationResult>> {
        let config = self.orchestrator.config();
        if request.options.num_images.is_none() {
            request.options.num_images = Some(config.default_num_images);
        }
        request.validate(config.max_prompt_len)?;

        let key = DedupKey::for_request(&request);
        let request = Arc::new(request);
        loop {
            let orchestrator = Arc::clone(&self.orchestrator);
            let req = Arc::clone(&request);
            let token = cancel.clone();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ImagegateError::Cancelled),
                outcome = self.dedup.get_or_run(&key, move || async move {
                    orchestrator.generate(&req, &token).await.map(Arc::new)
                }) => outcome,
            };

            match outcome {
                Err(ImagegateError::Cancelled) if !cancel.is_cancelled() => {
                    debug!(key = %key, "joined operation was cancelled by its owner, restarting");
                }
                other => return other,
            }
        }
    }

    /// Start the background sweeps at the configured interval.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn start_maintenance(&self) {
        self.spawn_maintenance(self.sweep_interval);
    }

    /// Start the idle-bucket and expired-result sweeps.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn spawn_maintenance(&self, interval: Duration) {
        self.limiter.start_sweeper(interval);
        self.dedup.start_sweeper(interval);
    }

    /// Drop all buckets and cached results.
    pub fn reset(&self) {
        self.limiter.reset();
        self.dedup.reset();
    }

    /// Stop background sweeps and drop all state.
    pub fn dispose(&self) {
        self.limiter.dispose();
        self.dedup.dispose();
    }
}

impl Drop for ImageGateway {
    fn drop(&mut self) {
        self.limiter.stop_sweeper();
        self.dedup.stop_sweeper();
    }
}
