//! imagegate - request orchestration for image generation backends
//!
//! This crate sits between an HTTP front end and an upstream image model.
//! It admits requests per client, collapses identical requests onto one
//! upstream operation, fans each request out into parallel seeded calls,
//! tolerates partial failure, and retries whole batches on transient errors.
//!
//! # Example
//!
//! ```rust,no_run
//! use imagegate::{GenerationRequest, Imagegate};
//! use imagegate::providers::HttpImageProvider;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> imagegate::Result<()> {
//!     let gateway = Imagegate::builder()
//!         .provider(HttpImageProvider::new(
//!             "https://images.example.com/v1/generate",
//!             Some("sk-your-key".to_string()),
//!         )?)
//!         .build()?;
//!
//!     let decision = gateway.check_rate_limit("203.0.113.7");
//!     if !decision.allowed {
//!         eprintln!("retry in {:?}s", decision.retry_after_secs);
//!         return Ok(());
//!     }
//!
//!     let result = gateway
//!         .generate(
//!             GenerationRequest::new("a lighthouse at dusk").num_images(2),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!
//!     for url in &result.images {
//!         println!("{url}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod maintenance;
pub mod orchestrator;
pub mod providers;
pub mod retry;
mod sync;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use classify::{ClassifiedError, ErrorCategory, Presentation, RawError, Severity, classify};
pub use config::{Config, Secrets};
pub use dedup::{DedupConfig, DedupKey, Deduplicator};
pub use error::{ImagegateError, Result};
pub use gateway::{ImageGateway, ImageGatewayBuilder, Imagegate};
pub use limiter::{
    FALLBACK_CLIENT_KEY, RateLimitBucket, RateLimitConfig, RateLimitDecision, RateLimiter,
    client_key,
};
pub use maintenance::SweepHandle;
pub use orchestrator::{GenerationConfig, GenerationOrchestrator, default_batch_retry};
pub use providers::{ImageProvider, ProviderImage, ProviderRequest};
pub use retry::{RetryConfig, RetryContext, RetryExecutor, RetryHooks};
pub use types::{
    GenerationMetadata, GenerationOptions, GenerationRequest, GenerationResult, ImageSize,
};
pub use version::{PKG_VERSION, version_string};

// Re-exported so callers can cancel without naming tokio-util themselves.
pub use tokio_util::sync::CancellationToken;
