//! imagegate error types

use std::time::Duration;

use crate::classify::{ClassifiedError, ErrorCategory, RawError, classify};

/// imagegate error types
///
/// Every failure that leaves this crate is either a [`ClassifiedError`]
/// (with its category fixed at the point it was first observed) or a
/// cancellation requested by the caller. Cancellation is never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImagegateError {
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    #[error("operation cancelled")]
    Cancelled,
}

impl ImagegateError {
    /// Shorthand for a configuration failure.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Classified(ClassifiedError::new(ErrorCategory::Configuration, message))
    }

    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Classified(ClassifiedError::new(ErrorCategory::Validation, message))
    }

    /// Whether the retry executor may try the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Classified(e) => e.retryable,
            Self::Cancelled => false,
        }
    }

    /// The classified error, unless this is a cancellation.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Classified(e) => Some(e),
            Self::Cancelled => None,
        }
    }

    /// Category of the underlying failure, unless this is a cancellation.
    pub fn category(&self) -> Option<ErrorCategory> {
        self.classified().map(|e| e.category)
    }

    /// Upstream retry-after hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.classified().and_then(|e| e.retry_after)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<RawError> for ImagegateError {
    fn from(err: RawError) -> Self {
        Self::Classified(classify(&err))
    }
}

/// Result type alias for imagegate operations
pub type Result<T> = std::result::Result<T, ImagegateError>;
