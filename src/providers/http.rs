//! Generic JSON-over-HTTP image provider.
//!
//! Sends `POST {endpoint}` with a JSON body
//! `{"prompt": .., "seed": .., "image_size": {"width": .., "height": ..}}`
//! and a bearer token, and expects `{"url": ".."}` back. Non-2xx responses
//! become [`RawError`]s carrying the status and the upstream error text;
//! transport failures use status `0`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::traits::{ImageProvider, ProviderImage, ProviderRequest};
use crate::classify::RawError;
use crate::{ImagegateError, Result};

/// Default whole-request timeout for the HTTP client.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest `Retry-After` hint accepted from upstream.
const MAX_RETRY_AFTER_SECS: u64 = 3600;

/// Client for a JSON image-generation endpoint.
#[derive(Clone)]
pub struct HttpImageProvider {
    endpoint: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpImageProvider {
    /// Create a provider for `endpoint`.
    ///
    /// Without an API key every call fails with a configuration error.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        Self::with_timeout(endpoint, api_key, DEFAULT_TIMEOUT)
    }

    /// Create a provider with a custom client timeout.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            ImagegateError::configuration(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            http,
        })
    }

    async fn error_from_response(response: reqwest::Response) -> RawError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)));

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("upstream returned status {status}")
                } else {
                    body.trim().to_string()
                }
            });

        let error = RawError::with_status(status, message);
        match retry_after {
            Some(delay) => error.retry_after(delay),
            None => error,
        }
    }
}

#[async_trait]
impl ImageProvider for HttpImageProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, request: &ProviderRequest) -> std::result::Result<ProviderImage, RawError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RawError::new("API key not configured"))?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response.json::<ProviderImage>().await.map_err(|e| {
            RawError::new(format!("unreadable provider response: {e}"))
        })
    }
}

fn transport_error(e: reqwest::Error) -> RawError {
    let message = if e.is_timeout() {
        format!("request timeout: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        format!("network error: {e}")
    };
    RawError::with_status(0, message)
}

/// Common shapes of JSON error bodies.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    detail: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        let nested = self.error.and_then(|e| match e {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        });
        self.message.or(nested).or(self.detail)
    }
}
