//! Labelary-style HTTP renderer
//!
//! This module implements the Renderer trait for a Labelary compatible API:
//! `POST {base_url}/{dpmm}dpmm/labels/{size}/0/` with the ZPL document as the
//! body and the wanted output type in the `Accept` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::config::{OutputFormat, RendererConfig};
use crate::domain::LabelPayload;
use crate::error::{LabelqError, Result};
use crate::renderer::client::{RenderError, RenderOutput, Renderer};

/// HTTP client for the external label renderer
pub struct LabelaryRenderer {
    client: Client,
    config: RendererConfig,
}

impl LabelaryRenderer {
    pub fn new(config: RendererConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LabelqError::Renderer(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Endpoint for a given label size
    fn endpoint(&self, label_size: &str) -> String {
        format!(
            "{}/{}dpmm/labels/{}/0/",
            self.config.base_url.trim_end_matches('/'),
            self.config.dpmm,
            label_size.to_lowercase().replace(' ', "")
        )
    }

    fn format(&self) -> OutputFormat {
        self.config.format
    }

    fn map_transport_error(&self, e: reqwest::Error) -> RenderError {
        if e.is_timeout() {
            RenderError::Timeout(Duration::from_millis(self.config.timeout_ms))
        } else {
            RenderError::Network(e.to_string())
        }
    }
}

/// Classify a non-success HTTP status
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> RenderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RenderError::RateLimited { retry_after };
    }
    if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT {
        return RenderError::InvalidInput(format!("HTTP {}: {}", status.as_u16(), body));
    }
    RenderError::Provider {
        status: status.as_u16(),
        message: body,
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl Renderer for LabelaryRenderer {
    async fn render(&self, payload: &LabelPayload) -> std::result::Result<RenderOutput, RenderError> {
        let url = self.endpoint(&payload.label_size);
        let format = self.format();

        tracing::debug!(url = %url, format = ?format, "Sending render request");

        let response = self
            .client
            .post(&url)
            .header("accept", format.mime_type())
            .header("content-type", "application/x-www-form-urlencoded")
            .body(payload.document.clone())
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status, retry_after, body));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .unwrap_or(format.mime_type())
            .to_string();

        let bytes = response.bytes().await.map_err(|e| self.map_transport_error(e))?;

        Ok(RenderOutput::new(content_type, bytes.to_vec()))
    }

    fn name(&self) -> &str {
        "labelary"
    }
}

impl std::fmt::Debug for LabelaryRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelaryRenderer")
            .field("base_url", &self.config.base_url)
            .field("dpmm", &self.config.dpmm)
            .field("format", &self.config.format)
            .finish()
    }
}
