//! Provider trait for a single upstream image call.
//!
//! # Error contract
//!
//! Providers report failures as unclassified [`RawError`]s: a message plus
//! the upstream status when there is one (`0` for transport failures that
//! never got a response). The orchestrator classifies each failure the
//! moment it is observed, so providers should pass upstream wording through
//! rather than paraphrasing it.
//!
//! # Example
//!
//! ```ignore
//! async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderImage, RawError> {
//!     if self.api_key.is_none() {
//!         return Err(RawError::new("API key not configured"));
//!     }
//!     // ... call upstream
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classify::RawError;
use crate::types::ImageSize;

/// Input for one upstream call: one prompt, one seed, one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub prompt: String,
    pub seed: u64,
    pub image_size: ImageSize,
}

/// What a provider hands back for one call.
///
/// A missing or blank `url` counts as a failed image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderImage {
    #[serde(default)]
    pub url: Option<String>,
}

impl ProviderImage {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
        }
    }

    pub fn empty() -> Self {
        Self { url: None }
    }
}

/// An upstream image generator.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Generate one image.
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderImage, RawError>;
}
