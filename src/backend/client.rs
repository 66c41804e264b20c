use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{EvalBackend, RunTestsBody};
use crate::engine::types::AvailableModel;
use crate::error::AppError;

/// Longest slice of a non-JSON error body echoed back in `AppError::Backend`.
const MAX_DETAIL_CHARS: usize = 500;

// ============================================================================
// Helpers
// ============================================================================

/// Classify a transport failure. Anything that kept us from getting a status line
/// means the backend is unavailable.
fn transport_err(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::BackendUnavailable(format!("request timed out after {}s", timeout.as_secs()))
    } else if e.is_connect() {
        AppError::BackendUnavailable(format!("connection failed: {e}"))
    } else {
        AppError::BackendUnavailable(e.to_string())
    }
}

/// Pull a human-readable detail out of an error body: the backend's
/// `{"detail": ...}` when present, else the (truncated) body text.
fn error_detail(status: reqwest::StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| match v.get("detail") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => None,
    });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            trimmed.chars().take(MAX_DETAIL_CHARS).collect()
        }
    })
}

// ============================================================================
// EvalClient
// ============================================================================

/// HTTP client for the evaluation backend.
pub struct EvalClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl EvalClient {
    /// Create a client for `base_url` whose requests give up after `timeout`.
    pub fn new(base_url: &url::Url, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, check the status code, and parse the body as JSON.
    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value, AppError> {
        let resp = req.send().await.map_err(|e| transport_err(e, self.timeout))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport_err(e, self.timeout))?;

        if !status.is_success() {
            return Err(AppError::Backend {
                status: Some(status.as_u16()),
                detail: error_detail(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|e| AppError::Backend {
            status: Some(status.as_u16()),
            detail: format!("malformed payload: {e}"),
        })
    }
}

#[async_trait]
impl EvalBackend for EvalClient {
    /// `POST /tests/run` -- evaluate every requested model in one round trip.
    async fn run_tests(&self, body: &RunTestsBody) -> Result<Value, AppError> {
        tracing::debug!(url = %self.url("/tests/run"), models = body.models.len(), "Dispatching test run");
        self.send_json(self.http.post(self.url("/tests/run")).json(body)).await
    }

    /// `GET /models` -- the backend's model catalogue.
    async fn list_models(&self) -> Result<Vec<AvailableModel>, AppError> {
        let v = self.send_json(self.http.get(self.url("/models"))).await?;
        match v.get("models") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(models) => serde_json::from_value(models.clone()).map_err(|e| AppError::Backend {
                status: None,
                detail: format!("malformed payload: {e}"),
            }),
        }
    }
}
