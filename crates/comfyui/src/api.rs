//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (liveness probe, image upload, workflow
//! submission, history retrieval, artifact download) using [`reqwest`].
//! Nothing here retries: each call either succeeds or reports the
//! transport/status error to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timeout for the liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for uploads, submissions and history lookups.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Artifacts can be large videos, so downloads get a longer window.
const VIEW_TIMEOUT: Duration = Duration::from_secs(60);

/// Message used when a 400 body does not name the failure.
const DEFAULT_VALIDATION_MESSAGE: &str = "Workflow validation failed";

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt. A response
    /// without one is a protocol violation the caller must reject.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
    /// Per-node validation problems that did not block queuing.
    #[serde(default)]
    pub node_errors: Value,
}

/// Outcome of a liveness probe. Probing never fails; an unreachable server
/// is reported through `reachable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub reachable: bool,
    /// HTTP status or transport error text.
    pub detail: String,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// ComfyUI rejected the workflow with a 400.
    #[error("{0}")]
    Validation(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP URL this client talks to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Check whether the server answers `GET /` with a 200.
    pub async fn check_reachable(&self) -> ServerStatus {
        let result = self
            .client
            .get(format!("{}/", self.api_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => ServerStatus {
                reachable: response.status() == reqwest::StatusCode::OK,
                detail: format!("HTTP {}", response.status().as_u16()),
            },
            Err(e) => ServerStatus {
                reachable: false,
                detail: e.to_string(),
            },
        }
    }

    /// Upload an input image.
    ///
    /// Sends a multipart `POST /upload/image` with the bytes in the `image`
    /// field and `overwrite=true`, so a re-run replaces any earlier upload
    /// of the same name.
    pub async fn upload_image(&self, name: &str, bytes: Vec<u8>) -> Result<(), ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. A 400 is turned into [`ComfyUIApiError::Validation`]
    /// carrying the server's explanation.
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(body = %body, "ComfyUI rejected workflow");
            return Err(ComfyUIApiError::Validation(validation_message(&body)));
        }

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The returned document
    /// is keyed by prompt ID and contains node outputs and status.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the raw bytes of an output file via `GET /view`.
    pub async fn fetch_view(
        &self,
        filename: &str,
        subfolder: &str,
        file_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", file_type),
            ])
            .timeout(VIEW_TIMEOUT)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Build the user-facing message for a `/prompt` 400 response.
///
/// ComfyUI answers with `{"error": {"message": ...}, "node_errors": ...}`;
/// older builds put a plain string in `error`.
fn validation_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return format!("ComfyUI validation failed (could not parse error response): {body}");
    };

    let message = match json.get("error") {
        Some(Value::Object(info)) => info
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_VALIDATION_MESSAGE)
            .to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => DEFAULT_VALIDATION_MESSAGE.to_string(),
    };

    format!("{message}. Raw response: {body}")
}
