//! REST client for the remote worker's HTTP endpoints.
//!
//! The worker's address can change mid-provisioning (port remaps), so
//! every call takes the base URL explicitly instead of binding it at
//! construction time.

use std::time::Duration;

use gazer_core::credentials::StorageCredentials;
use serde::{Deserialize, Serialize};

/// HTTP client shared across every worker call.
#[derive(Clone, Default)]
pub struct WorkerApi {
    client: reqwest::Client,
}

/// `GET /health` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub models_loaded: bool,
}

/// `POST /generate` request body.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    /// The job id; the worker calls it a session.
    pub session_id: String,
    pub image_base64: String,
    pub remove_background: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_credentials: Option<StorageCredentials>,
}

/// `POST /generate` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub artifacts_uploaded_directly: bool,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl GenerateResponse {
    pub fn is_complete(&self) -> bool {
        self.status.eq_ignore_ascii_case("complete")
    }
}

/// `GET /progress/{session_id}` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerProgress {
    pub stage: String,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub partition_statuses: Option<Vec<serde_json::Value>>,
}

/// Errors from the worker REST layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkerApiError {
    /// The HTTP request itself failed (network, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The worker returned a non-2xx status code.
    #[error("Worker API error ({status}): {body}")]
    ApiError {
        status: u16,
        /// The `detail` field when the body carries one, otherwise the raw
        /// body text.
        body: String,
    },

    /// `/health` answered but did not report `ok`.
    #[error("Worker unhealthy: {0}")]
    Unhealthy(String),
}

impl WorkerApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `GET /health`. Succeeds only when the worker reports `ok`.
    pub async fn health(
        &self,
        base: &str,
        timeout: Duration,
    ) -> Result<HealthResponse, WorkerApiError> {
        let response = self
            .client
            .get(format!("{base}/health"))
            .timeout(timeout)
            .send()
            .await?;

        let health: HealthResponse = Self::parse_response(response).await?;
        if !health.status.eq_ignore_ascii_case("ok") {
            return Err(WorkerApiError::Unhealthy(health.status));
        }
        Ok(health)
    }

    /// Submit a generation request and wait for the worker to finish it.
    pub async fn generate(
        &self,
        base: &str,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<GenerateResponse, WorkerApiError> {
        let response = self
            .client
            .post(format!("{base}/generate"))
            .json(request)
            .timeout(timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the worker's progress record for a job.
    pub async fn progress(
        &self,
        base: &str,
        job_id: &str,
        timeout: Duration,
    ) -> Result<WorkerProgress, WorkerApiError> {
        let response = self
            .client
            .get(format!("{base}/progress/{job_id}"))
            .timeout(timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the zipped artifacts of a job.
    pub async fn download(
        &self,
        base: &str,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, WorkerApiError> {
        let response = self
            .client
            .get(format!("{base}/download/{job_id}"))
            .timeout(timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an
    /// [`WorkerApiError::ApiError`] carrying the status and the worker's
    /// `detail` message.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, WorkerApiError> {
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(WorkerApiError::ApiError {
                status: status.as_u16(),
                body: extract_detail(&text),
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, WorkerApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

fn extract_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| body.to_string())
}
