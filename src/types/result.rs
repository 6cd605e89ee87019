//! Generation result types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a successful generation.
///
/// `images` holds between one and the requested number of URLs, in seed
/// order. Fewer than requested means some upstream calls failed and the
/// batch degraded to a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub images: Vec<String>,
    pub metadata: GenerationMetadata,
    pub generation_id: Uuid,
}

impl GenerationResult {
    /// Whether fewer images came back than were requested.
    pub fn is_partial(&self) -> bool {
        (self.images.len() as u32) < self.metadata.requested_images
    }
}

/// Facts about how a result was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub prompt: String,
    /// Wall-clock time of the fan-out, in milliseconds.
    pub generation_time_ms: u64,
    pub model_version: String,
    pub requested_images: u32,
}
