//! Core renderer types and trait definitions

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::LabelPayload;

/// External label renderer - each call renders one document
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render a document into image/PDF bytes
    async fn render(&self, payload: &LabelPayload) -> Result<RenderOutput, RenderError>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// Rendered output returned to the submitting caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl RenderOutput {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Errors that can occur during a render call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Rate limited by provider, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Renderer aborted: {0}")]
    Aborted(String),
}

impl RenderError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RenderError::RateLimited { .. } => true,
            RenderError::Provider { status, .. } => *status >= 500 || *status == 408,
            RenderError::Network(_) => true,
            RenderError::Timeout(_) => true,
            RenderError::InvalidInput(_) => false,
            RenderError::Aborted(_) => true,
        }
    }

    /// Provider-suggested wait before the next call
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RenderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Scripted response for [`MockRenderer`]
#[derive(Debug, Clone)]
pub enum MockResponse {
    Ok(Vec<u8>),
    Err(RenderError),
}

/// One recorded call to [`MockRenderer`]
#[derive(Debug, Clone)]
pub struct MockCall {
    pub document: String,
    pub label_size: String,
    pub started_at: Instant,
}

/// In-process renderer for tests and dry runs.
///
/// Responses are taken from, in order: the first rule whose marker appears in
/// the document, the scripted queue, then the fallback.
pub struct MockRenderer {
    rules: Vec<(String, MockResponse)>,
    script: Mutex<VecDeque<MockResponse>>,
    fallback: MockResponse,
    latency: Duration,
    calls: Mutex<Vec<MockCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRenderer {
    /// Renderer that answers every call instantly with a tiny PNG body
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            fallback: MockResponse::Ok(b"\x89PNG mock".to_vec()),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Renderer that always fails with the given error
    pub fn failing(error: RenderError) -> Self {
        Self::new().with_fallback(MockResponse::Err(error))
    }

    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = response;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer any document containing `marker` with `response`
    pub fn with_rule(mut self, marker: impl Into<String>, response: MockResponse) -> Self {
        self.rules.push((marker.into(), response));
        self
    }

    /// Queue responses consumed one per call
    pub fn with_script(self, responses: impl IntoIterator<Item = MockResponse>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(responses);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Highest number of overlapping calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, document: &str) -> MockResponse {
        if let Some((_, response)) = self.rules.iter().find(|(marker, _)| document.contains(marker.as_str())) {
            return response.clone();
        }
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn render(&self, payload: &LabelPayload) -> Result<RenderOutput, RenderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                document: payload.document.clone(),
                label_size: payload.label_size.clone(),
                started_at: Instant::now(),
            });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = self.next_response(&payload.document);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            MockResponse::Ok(bytes) => Ok(RenderOutput::new("image/png", bytes)),
            MockResponse::Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
