//! Upstream image providers.
//!
//! The orchestrator talks to providers only through the [`ImageProvider`]
//! trait. [`HttpImageProvider`] is a generic JSON-over-HTTP implementation;
//! anything speaking a vendor-specific protocol implements the trait itself.

#[cfg(feature = "http")]
pub mod http;
pub mod traits;

#[cfg(feature = "http")]
pub use http::HttpImageProvider;
pub use traits::{ImageProvider, ProviderImage, ProviderRequest};
