//! Public types for the imagegate API.

mod request;
mod result;

pub use request::{
    DEFAULT_MAX_PROMPT_LEN, GenerationOptions, GenerationRequest, ImageSize, MAX_IMAGES,
};
pub use result::{GenerationMetadata, GenerationResult};
