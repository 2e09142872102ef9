//! HTTP client for an upstream job service
//!
//! One client per job kind. Each call is a single attempt with a bounded
//! timeout; retrying is the caller's job.

use std::time::Duration;

use serde_json::Value;

use super::retry::Retryable;
use crate::error::{AppError, Result};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Stable error code, e.g. `upstream_503`
    pub fn code(&self) -> String {
        match self {
            UpstreamError::Network(_) => "upstream_network".to_string(),
            UpstreamError::Status { status, .. } => format!("upstream_{}", status),
            UpstreamError::Decode(_) => "upstream_invalid_response".to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for UpstreamError {
    /// Network failures, 429 and 5xx are transient; any other status is final
    fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Network(_) => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            UpstreamError::Decode(e.to_string())
        } else {
            UpstreamError::Network(e.to_string())
        }
    }
}

/// Send a request and read a JSON body, classifying failures.
/// An empty 2xx body reads as `null`.
pub async fn send_json(request: reqwest::RequestBuilder) -> std::result::Result<Value, UpstreamError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(format!("{}: {}", e, body)))
}

/// Client for one upstream provider
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ProviderClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// `POST {base}/jobs`
    pub async fn start_job(&self, body: &Value) -> std::result::Result<Value, UpstreamError> {
        let url = format!("{}/jobs", self.base_url);
        tracing::debug!("Starting upstream job at {}", url);
        send_json(self.authorize(self.http.post(&url).json(body))).await
    }

    /// `GET {base}/jobs/{external_id}`
    pub async fn get_job(&self, external_id: &str) -> std::result::Result<Value, UpstreamError> {
        let url = format!("{}/jobs/{}", self.base_url, external_id);
        tracing::debug!("Polling upstream job at {}", url);
        send_json(self.authorize(self.http.get(&url))).await
    }
}
