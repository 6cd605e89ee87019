//! Error classification taxonomy.
//!
//! [`classify`] maps a raw upstream failure (message plus optional status
//! code) onto a fixed set of [`ErrorCategory`] values. The category decides
//! whether the failure is worth retrying, which HTTP status the calling layer
//! should answer with, and what the user gets to read.
//!
//! Classification happens exactly once, at the point a failure is first
//! observed. Everything above that point (retry executor, deduplicator,
//! gateway) consults the resulting [`ClassifiedError`] and never
//! re-classifies it.
//!
//! # Matching rules
//!
//! Matching is case-insensitive and first-match-wins, with one exception:
//! an explicit "unauthorized"/"authentication" in the message outranks rows
//! 1 and 2, so "Unauthorized: invalid api key" is an authentication failure
//! rather than a configuration or validation one.
//!
//! | # | message contains                                | status      | category         | retryable |
//! |---|--------------------------------------------------|-------------|------------------|-----------|
//! | 1 | "configuration", "api key", "not configured"     |             | `configuration`  | no        |
//! | 2 | "validation", "invalid", "required"              | 400         | `validation`     | no        |
//! | 3 | "unauthorized", "authentication"                 | 401, 403    | `authentication` | no        |
//! | 4 | "rate limit", "too many requests"                | 429         | `rate_limit`     | yes       |
//! | 5 | "network", "connection", "timeout"               | 0           | `network`        | yes       |
//! | 6 | "server", "internal"                             | 500..=599   | `server`         | yes       |
//! | 7 |                                                  | 400..=499   | `client`         | no        |
//! | 8 | anything else                                    |             | `unknown`        | yes       |
//!
//! `generation` is never produced by [`classify`]; the orchestrator raises it
//! when every image in a batch failed.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An unclassified failure as reported by a collaborator.
///
/// `status` is the upstream HTTP status when one exists. Transport failures
/// that never produced a response use status `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Upstream `Retry-After` hint, carried through classification.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl RawError {
    /// A failure carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// A failure with an upstream status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            retry_after: None,
        }
    }

    /// Attach a retry-after hint.
    pub fn retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Failure taxonomy shared by every layer of the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Authentication,
    RateLimit,
    Network,
    Server,
    Client,
    Generation,
    Unknown,
}

impl ErrorCategory {
    /// Stable snake_case name, used for metric labels and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Server => "server",
            Self::Client => "client",
            Self::Generation => "generation",
            Self::Unknown => "unknown",
        }
    }

    /// Whether failures in this category are retried automatically.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Server | Self::Generation | Self::Unknown
        )
    }

    /// Suggested HTTP status for surfacing this category to a client.
    ///
    /// `client` errors keep their upstream status when one is known, see
    /// [`ClassifiedError::http_status`].
    pub fn http_status(self) -> u16 {
        match self {
            Self::Configuration => 500,
            Self::Validation => 400,
            Self::Authentication => 401,
            Self::RateLimit => 429,
            Self::Network => 408,
            Self::Server => 500,
            Self::Client => 400,
            Self::Generation => 422,
            Self::Unknown => 500,
        }
    }

    /// Fixed, user-facing description of the category.
    pub fn presentation(self) -> Presentation {
        match self {
            Self::Configuration => Presentation {
                title: "Configuration Error",
                user_message: "The image service is not configured correctly. Please contact support.",
                severity: Severity::Critical,
            },
            Self::Validation => Presentation {
                title: "Invalid Input",
                user_message: "Please check your prompt and settings and try again.",
                severity: Severity::Low,
            },
            Self::Authentication => Presentation {
                title: "Authentication Error",
                user_message: "The image service rejected our credentials. Please contact support.",
                severity: Severity::High,
            },
            Self::RateLimit => Presentation {
                title: "Too Many Requests",
                user_message: "You are sending requests too quickly. Please wait a moment and try again.",
                severity: Severity::Medium,
            },
            Self::Network => Presentation {
                title: "Connection Problem",
                user_message: "We could not reach the image service. Check your connection and try again.",
                severity: Severity::Medium,
            },
            Self::Server => Presentation {
                title: "Service Unavailable",
                user_message: "The image service is having trouble right now. Please try again shortly.",
                severity: Severity::High,
            },
            Self::Client => Presentation {
                title: "Request Failed",
                user_message: "The request could not be completed. Please adjust it and try again.",
                severity: Severity::Medium,
            },
            Self::Generation => Presentation {
                title: "Generation Failed",
                user_message: "No images could be generated. Please try again.",
                severity: Severity::Medium,
            },
            Self::Unknown => Presentation {
                title: "Something Went Wrong",
                user_message: "An unexpected error occurred. Please try again.",
                severity: Severity::Medium,
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How loudly the presentation layer should report a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Title, message and severity shown to end users for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Presentation {
    pub title: &'static str,
    pub user_message: &'static str,
    pub severity: Severity,
}

/// A failure with its category and retry verdict attached.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{category} error: {message}")]
pub struct ClassifiedError {
    pub message: String,
    pub category: ErrorCategory,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
    /// Upstream hint for how long to wait before retrying.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl ClassifiedError {
    /// Build an error directly in a category; retryability follows the category.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category,
            retryable: category.is_retryable(),
            status: None,
            context: BTreeMap::new(),
            retry_after: None,
        }
    }

    /// Attach the upstream status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a structured context value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// HTTP status the calling layer should respond with.
    pub fn http_status(&self) -> u16 {
        match (self.category, self.status) {
            (ErrorCategory::Client, Some(status)) if (400..500).contains(&status) => status,
            (category, _) => category.http_status(),
        }
    }

    /// User-facing description of this error's category.
    pub fn presentation(&self) -> Presentation {
        self.category.presentation()
    }
}

const CONFIGURATION_MARKERS: &[&str] = &["configuration", "api key", "not configured"];
const VALIDATION_MARKERS: &[&str] = &["validation", "invalid", "required"];
const AUTHENTICATION_MARKERS: &[&str] = &["unauthorized", "authentication"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests"];
const NETWORK_MARKERS: &[&str] = &["network", "connection", "timeout"];
const SERVER_MARKERS: &[&str] = &["server", "internal"];

/// Classify a raw failure.
///
/// Pure and deterministic: the same `(message, status)` always produces the
/// same category and retry verdict.
pub fn classify(error: &RawError) -> ClassifiedError {
    let category = categorize(&error.message, error.status);
    let mut classified = ClassifiedError::new(category, error.message.clone());
    classified.status = error.status;
    classified.retry_after = error.retry_after;
    classified
}

fn categorize(message: &str, status: Option<u16>) -> ErrorCategory {
    let message = message.to_lowercase();
    let mentions = |markers: &[&str]| markers.iter().any(|m| message.contains(m));
    let status_is = |codes: &[u16]| status.is_some_and(|s| codes.contains(&s));

    if mentions(AUTHENTICATION_MARKERS) {
        ErrorCategory::Authentication
    } else if mentions(CONFIGURATION_MARKERS) {
        ErrorCategory::Configuration
    } else if mentions(VALIDATION_MARKERS) || status_is(&[400]) {
        ErrorCategory::Validation
    } else if status_is(&[401, 403]) {
        ErrorCategory::Authentication
    } else if mentions(RATE_LIMIT_MARKERS) || status_is(&[429]) {
        ErrorCategory::RateLimit
    } else if mentions(NETWORK_MARKERS) || status_is(&[0]) {
        ErrorCategory::Network
    } else if mentions(SERVER_MARKERS) || status.is_some_and(|s| (500..600).contains(&s)) {
        ErrorCategory::Server
    } else if status.is_some_and(|s| (400..500).contains(&s)) {
        ErrorCategory::Client
    } else {
        ErrorCategory::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(message: &str, status: Option<u16>) -> ErrorCategory {
        classify(&RawError {
            message: message.into(),
            status,
            retry_after: None,
        })
        .category
    }

    #[test]
    fn configuration_wins_over_everything() {
        assert_eq!(
            category_of("API key not configured", Some(429)),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(category_of("RATE LIMIT hit", None), ErrorCategory::RateLimit);
        assert_eq!(category_of("Connection Reset", None), ErrorCategory::Network);
    }

    #[test]
    fn status_only_rules() {
        assert_eq!(category_of("nope", Some(400)), ErrorCategory::Validation);
        assert_eq!(category_of("nope", Some(403)), ErrorCategory::Authentication);
        assert_eq!(category_of("nope", Some(429)), ErrorCategory::RateLimit);
        assert_eq!(category_of("nope", Some(0)), ErrorCategory::Network);
        assert_eq!(category_of("nope", Some(503)), ErrorCategory::Server);
        assert_eq!(category_of("nope", Some(404)), ErrorCategory::Client);
        assert_eq!(category_of("nope", Some(302)), ErrorCategory::Unknown);
        assert_eq!(category_of("nope", None), ErrorCategory::Unknown);
    }

    #[test]
    fn explicit_auth_wording_outranks_api_key() {
        assert_eq!(
            category_of("Unauthorized: invalid api key", None),
            ErrorCategory::Authentication
        );
        assert_eq!(category_of("invalid api key", None), ErrorCategory::Configuration);
        assert_eq!(category_of("prompt is required", Some(401)), ErrorCategory::Validation);
    }

    #[test]
    fn client_status_preserved_for_http() {
        let err = classify(&RawError::with_status(404, "not found"));
        assert_eq!(err.http_status(), 404);
        let err = classify(&RawError::with_status(503, "unavailable"));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn retryable_follows_category() {
        for category in [
            ErrorCategory::Configuration,
            ErrorCategory::Validation,
            ErrorCategory::Authentication,
            ErrorCategory::Client,
        ] {
            assert!(!ClassifiedError::new(category, "x").retryable);
        }
        for category in [
            ErrorCategory::RateLimit,
            ErrorCategory::Network,
            ErrorCategory::Server,
            ErrorCategory::Generation,
            ErrorCategory::Unknown,
        ] {
            assert!(ClassifiedError::new(category, "x").retryable);
        }
    }

    #[test]
    fn serializes_category_snake_case() {
        let err = ClassifiedError::new(ErrorCategory::RateLimit, "slow down")
            .with_context("provider", "mock");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["category"], "rate_limit");
        assert_eq!(json["retryable"], true);
        assert_eq!(json["context"]["provider"], "mock");
    }
}
