//! Inbound generation request types.

use serde::{Deserialize, Serialize};

use crate::classify::{ClassifiedError, ErrorCategory};

/// Upper bound on images per request.
pub const MAX_IMAGES: u32 = 10;

/// Default upper bound on prompt length, in characters.
pub const DEFAULT_MAX_PROMPT_LEN: usize = 1000;

/// Output dimensions in pixels. Each side must lie in `256..=2048`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const MIN_SIDE: u32 = 256;
    pub const MAX_SIDE: u32 = 2048;

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    fn is_valid(self) -> bool {
        let range = Self::MIN_SIDE..=Self::MAX_SIDE;
        range.contains(&self.width) && range.contains(&self.height)
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::square(1024)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Tunables for a generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Base seed; image `i` uses `seed + i`. Random when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Images to generate (1..=10). The orchestrator's default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_images: Option<u32>,

    #[serde(default)]
    pub image_size: ImageSize,
}

/// A prompt plus its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl GenerationRequest {
    /// Create a request with default options.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    /// Set the number of images.
    pub fn num_images(mut self, n: u32) -> Self {
        self.options.num_images = Some(n);
        self
    }

    /// Set the base seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }

    /// Set the output size.
    pub fn image_size(mut self, size: ImageSize) -> Self {
        self.options.image_size = size;
        self
    }

    /// Check prompt length and option bounds.
    ///
    /// Callers normally validate before reaching the gateway; this is the
    /// last line that keeps out-of-range requests away from the provider.
    pub fn validate(&self, max_prompt_len: usize) -> Result<(), ClassifiedError> {
        let prompt_len = self.prompt.trim().chars().count();
        if prompt_len == 0 {
            return Err(invalid("prompt is required", "prompt"));
        }
        if prompt_len > max_prompt_len {
            return Err(
                invalid(
                    format!("prompt is too long ({prompt_len} > {max_prompt_len} characters)"),
                    "prompt",
                )
                .with_context("max_len", max_prompt_len),
            );
        }
        if let Some(n) = self.options.num_images {
            if !(1..=MAX_IMAGES).contains(&n) {
                return Err(invalid(
                    format!("num_images must be between 1 and {MAX_IMAGES}, got {n}"),
                    "num_images",
                ));
            }
        }
        if !self.options.image_size.is_valid() {
            return Err(invalid(
                format!(
                    "image_size {} is outside {}..={} pixels per side",
                    self.options.image_size,
                    ImageSize::MIN_SIDE,
                    ImageSize::MAX_SIDE
                ),
                "image_size",
            ));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>, field: &str) -> ClassifiedError {
    ClassifiedError::new(ErrorCategory::Validation, message).with_context("field", field)
}
