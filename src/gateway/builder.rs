//! Builder for configuring gateway instances

use std::sync::Arc;
use std::time::Duration;

use super::ImageGateway;
use crate::dedup::{DedupConfig, Deduplicator};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::orchestrator::{GenerationConfig, GenerationOrchestrator, default_batch_retry};
use crate::providers::ImageProvider;
use crate::retry::{RetryConfig, RetryHooks};
use crate::types::{GenerationResult, MAX_IMAGES};
use crate::{ImagegateError, Result};

/// Main entry point for creating gateway instances.
pub struct Imagegate;

/// Default interval of the background sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl Imagegate {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> ImageGatewayBuilder {
        ImageGatewayBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// ```rust,no_run
/// # use imagegate::{Imagegate, RateLimitConfig};
/// # fn provider() -> imagegate::providers::HttpImageProvider { unimplemented!() }
/// let gateway = Imagegate::builder()
///     .provider(provider())
///     .rate_limit(RateLimitConfig::new().capacity(5))
///     .build()?;
/// # Ok::<(), imagegate::ImagegateError>(())
/// ```
pub struct ImageGatewayBuilder {
    provider: Option<Arc<dyn ImageProvider>>,
    rate_limit: RateLimitConfig,
    retry: RetryConfig,
    dedup: DedupConfig,
    generation: GenerationConfig,
    hooks: RetryHooks<GenerationResult>,
    sweep_interval: Duration,
}

impl ImageGatewayBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            rate_limit: RateLimitConfig::default(),
            retry: default_batch_retry(),
            dedup: DedupConfig::default(),
            generation: GenerationConfig::default(),
            hooks: RetryHooks::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set the upstream image provider.
    pub fn provider(mut self, provider: impl ImageProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Set an already shared upstream image provider.
    pub fn shared_provider(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Set the whole-batch retry policy (default: two attempts).
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn dedup(mut self, config: DedupConfig) -> Self {
        self.dedup = config;
        self
    }

    pub fn generation(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    /// Observe batch retries.
    pub fn retry_hooks(mut self, hooks: RetryHooks<GenerationResult>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Interval used by [`ImageGateway::start_maintenance`] (default: 60s).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<ImageGateway> {
        let provider = self
            .provider
            .ok_or_else(|| ImagegateError::configuration("no image provider configured"))?;
        if self.rate_limit.capacity == 0 {
            return Err(ImagegateError::configuration(
                "rate limit capacity must be at least 1",
            ));
        }
        let default_images = self.generation.default_num_images;
        if !(1..=MAX_IMAGES).contains(&default_images) {
            return Err(ImagegateError::configuration(format!(
                "default_num_images must be between 1 and {MAX_IMAGES}, got {default_images}"
            )));
        }

        let orchestrator =
            GenerationOrchestrator::new(provider, self.generation, self.retry).with_hooks(self.hooks);

        Ok(ImageGateway {
            limiter: Arc::new(RateLimiter::new(self.rate_limit)),
            dedup: Deduplicator::new(self.dedup),
            orchestrator: Arc::new(orchestrator),
            sweep_interval: self.sweep_interval,
        })
    }
}

impl Default for ImageGatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
