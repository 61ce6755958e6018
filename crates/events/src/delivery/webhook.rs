//! Single-attempt webhook delivery.
//!
//! [`WebhookDelivery`] POSTs a JSON-encoded [`CallbackEvent`] to the
//! configured endpoint with the shared secret in `X-API-Key`. Failures are
//! returned to the dispatcher, which logs them; nothing is retried.

use std::time::Duration;

use genrelay_core::config::CallbackConfig;

use crate::event::CallbackEvent;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers callback events to the configured endpoint.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    endpoint: String,
    secret: String,
}

impl WebhookDelivery {
    pub fn new(config: &CallbackConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            secret: config.secret.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute a single POST request and check the response status.
    pub async fn deliver(&self, event: &CallbackEvent) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.secret)
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_keeps_endpoint() {
        let delivery = WebhookDelivery::new(&CallbackConfig {
            endpoint: "https://hooks.example.com/cb".into(),
            secret: "s".into(),
        })
        .unwrap();
        assert_eq!(delivery.endpoint(), "https://hooks.example.com/cb");
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        let delivery = WebhookDelivery::new(&CallbackConfig {
            endpoint: "http://127.0.0.1:9/cb".into(),
            secret: String::new(),
        })
        .unwrap();
        let result = delivery.deliver(&CallbackEvent::accepted("j")).await;
        assert!(matches!(result, Err(WebhookError::Request(_))));
    }
}
