//! Page-automation driver seam.
//!
//! The resolution engine never talks to a browser protocol directly. Everything
//! it needs from the driven page goes through [`PageDriver`], an opaque
//! capability set (queries, attribute reads, clicks, script evaluation, bounded
//! waits). Concrete implementations wrap whatever automation stack drives the
//! session; tests substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Opaque handle to an element previously located on the page.
///
/// The engine only ever passes handles back to the driver that produced them;
/// the identifier format is the driver's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Errors surfaced by a page driver.
#[derive(Debug, Error)]
pub enum PageError {
    /// The page handle is closed or detached. Nothing further can be done with
    /// this session; callers must abort rather than retry.
    #[error("page handle is closed or detached")]
    Closed,
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("page driver error: {0}")]
    Driver(String),
}

impl PageError {
    /// `true` for errors that make the whole session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PageError::Closed)
    }
}

/// Capability set the engine requires from the page-automation layer.
///
/// All waits are bounded by the supplied timeout and resolve to `false` rather
/// than erroring when the condition never holds. Implementations must keep
/// session state (cookies, frames) consistent between calls.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Current top-level document URL.
    async fn current_url(&self) -> Result<Url, PageError>;

    /// First element matching the CSS selector, if any.
    async fn query(&self, selector: &str) -> Result<Option<ElementRef>, PageError>;

    /// All elements matching the CSS selector.
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementRef>, PageError>;

    /// Read an attribute from a located element.
    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, PageError>;

    /// Visible text content of a located element.
    async fn text(&self, element: &ElementRef) -> Result<String, PageError>;

    /// Simulate a click on a located element.
    async fn click(&self, element: &ElementRef) -> Result<(), PageError>;

    /// Replace the value of an input element (overwrite, never append).
    async fn fill(&self, element: &ElementRef, value: &str) -> Result<(), PageError>;

    /// Evaluate a script in page context and return its JSON-converted result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, PageError>;

    /// Wait until an element matching the selector is visible, up to `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, PageError>;

    /// Wait for a top-level navigation to commit, up to `timeout`.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<bool, PageError>;

    /// URLs of all subframes currently attached to the page.
    async fn frame_urls(&self) -> Result<Vec<String>, PageError>;

    /// Reload the page and wait for it to settle.
    async fn reload(&self) -> Result<(), PageError>;
}
