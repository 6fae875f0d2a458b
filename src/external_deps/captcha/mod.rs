//! Solving-service integrations.
//!
//! Two kinds of external service are involved: a synchronous OCR endpoint that
//! turns an encoded captcha image into text, and an asynchronous token service
//! that accepts a site key, hands back a task id, and is polled until the task
//! produces a token. The dispatch layer only sees the [`OcrProvider`] and
//! [`TokenProvider`] traits, so vendors can be swapped without touching the
//! engine.

mod ocr_http;
mod task_http;

pub use ocr_http::HttpOcrClient;
pub use task_http::{HttpTaskTransport, TokenSolverClient};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Budgets applied to the asynchronous submit/poll cycle.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// Fixed delay between result polls.
    pub poll_interval: Duration,
    /// Maximum number of result polls for a single task.
    pub poll_budget: u32,
    /// Hard wall-clock bound on one solve, regardless of poll count.
    pub solve_deadline: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(6),
            poll_budget: 24,
            solve_deadline: Duration::from_secs(150),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Description of a token-based challenge submitted to the solving service.
#[derive(Debug, Clone)]
pub struct TokenTask {
    pub site_key: String,
    pub page_url: Url,
    pub action: Option<String>,
    pub cdata: Option<String>,
}

impl TokenTask {
    pub fn new(site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            site_key: site_key.into(),
            page_url,
            action: None,
            cdata: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_cdata(mut self, cdata: impl Into<String>) -> Self {
        self.cdata = Some(cdata.into());
        self
    }
}

/// State of a submitted solving task as reported by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still being worked on; poll again.
    Pending,
    /// Solved; carries the token.
    Ready(String),
    /// Definitive failure. The task must never be polled again.
    Errored(String),
}

/// Errors surfaced by solving-service clients.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("solving service unreachable: {0}")]
    Unreachable(String),
    #[error("solving service rejected the task: {0}")]
    Rejected(String),
    #[error("solving service returned a malformed response: {0}")]
    Malformed(String),
    #[error("solving timed out after {0:?}")]
    Timeout(Duration),
}

/// Synchronous image-recognition service.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognise the text in a self-contained encoded image.
    async fn recognize(&self, image: &str) -> Result<String, CaptchaError>;
}

/// Asynchronous token-solving service (submit, then poll to completion).
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Solve a token challenge end to end and return the token.
    async fn solve(&self, task: &TokenTask) -> Result<String, CaptchaError>;
}

/// Low-level wire operations of the token service. Split out from
/// [`TokenProvider`] so the bounded poll loop can be exercised against a
/// scripted transport.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Submit a task and return its opaque id.
    async fn create_task(&self, task: &TokenTask) -> Result<String, CaptchaError>;

    /// Fetch the current status of a previously submitted task.
    async fn task_result(&self, task_id: &str) -> Result<TaskStatus, CaptchaError>;
}
