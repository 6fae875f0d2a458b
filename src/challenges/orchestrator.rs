//! Resolution orchestration.
//!
//! Drives classification, solving, injection, and verification through a
//! bounded-retry state machine and reports a single terminal outcome to the
//! calling workflow. This is the only loop in the engine: every other
//! component runs at most once per pass. An unresolved pass re-detects from
//! scratch (the challenge may have rotated) instead of blindly re-solving the
//! stale observation, and the retry ceiling is held in one local
//! [`RetryState`] value rather than recursive re-entry.

use crate::challenges::detectors::Classifier;
use crate::challenges::inject::Injector;
use crate::challenges::solvers::{SolveError, SolverDispatch};
use crate::page::{PageDriver, PageError};

/// Terminal outcome of one resolution call. Exactly one of these is returned
/// on every non-fatal exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// A challenge was present and accepted; carries the solution token, or
    /// [`Self::INTERACTION_MARKER`] when verification came from direct
    /// interaction.
    Resolved(String),
    /// No challenge blocks the workflow.
    NotPresent,
    /// Retries exhausted; carries the last concrete error.
    Failed(String),
}

impl ResolutionOutcome {
    /// Value carried by [`ResolutionOutcome::Resolved`] when the challenge
    /// passed through direct interaction and no token exists.
    pub const INTERACTION_MARKER: &'static str = "";

    /// The solution token, when resolution produced one. Interaction-verified
    /// resolutions carry none.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Resolved(token) if token != Self::INTERACTION_MARKER => Some(token),
            _ => None,
        }
    }
}

/// Retry bookkeeping for one resolution call. `attempt` never exceeds
/// `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    last_error: Option<String>,
}

impl RetryState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error: None,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn begin_pass(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        true
    }

    fn record(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }

    fn into_failure(self) -> ResolutionOutcome {
        ResolutionOutcome::Failed(
            self.last_error
                .unwrap_or_else(|| "challenge unresolved".into()),
        )
    }
}

/// Drives detect → solve → inject → verify passes to a terminal outcome.
///
/// Holds no mutable state between calls; independent sessions get independent
/// orchestrators and nothing is shared across them.
pub struct Orchestrator {
    classifier: Classifier,
    dispatch: SolverDispatch,
    injector: Injector,
    max_attempts: u32,
    reload_between_attempts: bool,
}

impl Orchestrator {
    pub fn new(
        classifier: Classifier,
        dispatch: SolverDispatch,
        injector: Injector,
        max_attempts: u32,
    ) -> Self {
        Self {
            classifier,
            dispatch,
            injector,
            max_attempts: max_attempts.max(1),
            reload_between_attempts: false,
        }
    }

    /// Reload the page before each retry pass so a rotated challenge is
    /// served fresh.
    pub fn with_reload_between_attempts(mut self, reload: bool) -> Self {
        self.reload_between_attempts = reload;
        self
    }

    /// Resolve the challenge currently blocking the page, if any.
    ///
    /// Fatal page errors (a closed handle) propagate as `Err` without
    /// consuming a retry; every other failure is absorbed into the bounded
    /// retry loop and ends in `ResolutionOutcome::Failed` at worst.
    pub async fn resolve(&self, page: &dyn PageDriver) -> Result<ResolutionOutcome, PageError> {
        let mut retry = RetryState::new(self.max_attempts);

        while retry.begin_pass() {
            if retry.attempt() > 1 && self.reload_between_attempts {
                page.reload().await?;
            }
            log::debug!(
                "resolution attempt {}/{}",
                retry.attempt(),
                self.max_attempts
            );

            let observation = self.classifier.classify(page).await?;
            if !observation.is_present() {
                log::info!("no challenge present on {}", observation.page_url);
                return Ok(ResolutionOutcome::NotPresent);
            }

            let solution = match self.dispatch.solve(page, &observation).await {
                Ok(solution) => solution,
                Err(SolveError::Page(err)) if err.is_fatal() => return Err(err),
                Err(err) => {
                    log::warn!("attempt {}: solve failed: {err}", retry.attempt());
                    retry.record(failure_reason(&err));
                    continue;
                }
            };

            let injection = match self.injector.inject(page, &observation, &solution).await {
                Ok(result) => result,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    log::warn!("attempt {}: injection failed: {err}", retry.attempt());
                    retry.record(err.to_string());
                    continue;
                }
            };

            if injection.verified {
                let token = solution
                    .value()
                    .unwrap_or(ResolutionOutcome::INTERACTION_MARKER)
                    .to_string();
                log::info!(
                    "challenge resolved on attempt {}/{}",
                    retry.attempt(),
                    self.max_attempts
                );
                return Ok(ResolutionOutcome::Resolved(token));
            }

            retry.record(if injection.applied {
                "solution applied but the page never confirmed it"
            } else {
                "solution could not be applied to the page"
            });
            log::warn!(
                "attempt {}: {}",
                retry.attempt(),
                retry.last_error().unwrap_or_default()
            );
        }

        Ok(retry.into_failure())
    }

    /// Resolve every challenge on the page, in whatever order the classifier
    /// reports them, until a pass finds none.
    ///
    /// Per-challenge resolution is independent; the list is bounded by
    /// `max_attempts` full passes so a page that keeps presenting markers
    /// still terminates. A failed challenge ends the sweep, since the next
    /// workflow step is blocked anyway.
    pub async fn resolve_all(
        &self,
        page: &dyn PageDriver,
    ) -> Result<Vec<ResolutionOutcome>, PageError> {
        let mut outcomes = Vec::new();
        for _ in 0..self.max_attempts {
            match self.resolve(page).await? {
                ResolutionOutcome::NotPresent => break,
                outcome @ ResolutionOutcome::Resolved(_) => outcomes.push(outcome),
                outcome @ ResolutionOutcome::Failed(_) => {
                    outcomes.push(outcome);
                    break;
                }
            }
        }
        Ok(outcomes)
    }
}

/// `ServiceRejected` keeps the service's own reason verbatim so the caller
/// sees the concrete error code; everything else renders through `Display`.
fn failure_reason(err: &SolveError) -> String {
    match err {
        SolveError::ServiceRejected(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::challenges::core::Selectors;
    use crate::page::ElementRef;

    fn orchestrator(max_attempts: u32) -> Orchestrator {
        let selectors = Selectors::default();
        Orchestrator::new(
            Classifier::new(selectors.clone(), Duration::from_secs(5)),
            SolverDispatch::new(selectors.clone(), Duration::from_secs(1), 4),
            Injector::new(selectors, Duration::from_secs(1), Duration::from_millis(100), 20)
                .with_settle_range(Duration::ZERO, Duration::ZERO),
            max_attempts,
        )
    }

    /// Page that always presents an image captcha; no solver is configured in
    /// these tests, so every pass fails the same way.
    struct StubbornPage {
        closed: bool,
        classify_passes: Mutex<u32>,
        reloads: Mutex<u32>,
    }

    impl StubbornPage {
        fn new() -> Self {
            Self {
                closed: false,
                classify_passes: Mutex::new(0),
                reloads: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl PageDriver for StubbornPage {
        async fn current_url(&self) -> Result<Url, PageError> {
            if self.closed {
                return Err(PageError::Closed);
            }
            *self.classify_passes.lock().unwrap() += 1;
            Ok(Url::parse("https://portal.example/renew").unwrap())
        }

        async fn query(&self, selector: &str) -> Result<Option<ElementRef>, PageError> {
            if selector == Selectors::default().image {
                return Ok(Some(ElementRef::new("img1")));
            }
            Ok(None)
        }

        async fn query_all(&self, selector: &str) -> Result<Vec<ElementRef>, PageError> {
            Ok(self.query(selector).await?.into_iter().collect())
        }

        async fn attribute(
            &self,
            _element: &ElementRef,
            name: &str,
        ) -> Result<Option<String>, PageError> {
            if name == "src" {
                return Ok(Some("data:image/png;base64,AAAA".into()));
            }
            Ok(None)
        }

        async fn text(&self, _element: &ElementRef) -> Result<String, PageError> {
            Ok(String::new())
        }

        async fn click(&self, _element: &ElementRef) -> Result<(), PageError> {
            Ok(())
        }

        async fn fill(&self, _element: &ElementRef, _value: &str) -> Result<(), PageError> {
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, PageError> {
            Ok(serde_json::Value::Null)
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<bool, PageError> {
            Ok(false)
        }

        async fn wait_for_navigation(&self, _timeout: Duration) -> Result<bool, PageError> {
            Ok(false)
        }

        async fn frame_urls(&self) -> Result<Vec<String>, PageError> {
            Ok(Vec::new())
        }

        async fn reload(&self) -> Result<(), PageError> {
            *self.reloads.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// Page whose inline checkbox verifies on direct interaction.
    struct CheckboxPage;

    #[async_trait]
    impl PageDriver for CheckboxPage {
        async fn current_url(&self) -> Result<Url, PageError> {
            Ok(Url::parse("https://portal.example/renew").unwrap())
        }

        async fn query(&self, selector: &str) -> Result<Option<ElementRef>, PageError> {
            if selector == Selectors::default().checkbox {
                return Ok(Some(ElementRef::new("cb1")));
            }
            Ok(None)
        }

        async fn query_all(&self, selector: &str) -> Result<Vec<ElementRef>, PageError> {
            Ok(self.query(selector).await?.into_iter().collect())
        }

        async fn attribute(
            &self,
            _element: &ElementRef,
            _name: &str,
        ) -> Result<Option<String>, PageError> {
            Ok(None)
        }

        async fn text(&self, _element: &ElementRef) -> Result<String, PageError> {
            Ok(String::new())
        }

        async fn click(&self, _element: &ElementRef) -> Result<(), PageError> {
            Ok(())
        }

        async fn fill(&self, _element: &ElementRef, _value: &str) -> Result<(), PageError> {
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, PageError> {
            Ok(serde_json::Value::Null)
        }

        async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<bool, PageError> {
            Ok(selector == Selectors::default().success_indicator)
        }

        async fn wait_for_navigation(&self, _timeout: Duration) -> Result<bool, PageError> {
            Ok(false)
        }

        async fn frame_urls(&self) -> Result<Vec<String>, PageError> {
            Ok(Vec::new())
        }

        async fn reload(&self) -> Result<(), PageError> {
            Ok(())
        }
    }

    /// Page with no challenge markers at all.
    struct EmptyPage;

    #[async_trait]
    impl PageDriver for EmptyPage {
        async fn current_url(&self) -> Result<Url, PageError> {
            Ok(Url::parse("https://portal.example/renew").unwrap())
        }

        async fn query(&self, _selector: &str) -> Result<Option<ElementRef>, PageError> {
            Ok(None)
        }

        async fn query_all(&self, _selector: &str) -> Result<Vec<ElementRef>, PageError> {
            Ok(Vec::new())
        }

        async fn attribute(
            &self,
            _element: &ElementRef,
            _name: &str,
        ) -> Result<Option<String>, PageError> {
            Ok(None)
        }

        async fn text(&self, _element: &ElementRef) -> Result<String, PageError> {
            Ok(String::new())
        }

        async fn click(&self, _element: &ElementRef) -> Result<(), PageError> {
            Ok(())
        }

        async fn fill(&self, _element: &ElementRef, _value: &str) -> Result<(), PageError> {
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, PageError> {
            Ok(serde_json::Value::Null)
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<bool, PageError> {
            Ok(false)
        }

        async fn wait_for_navigation(&self, _timeout: Duration) -> Result<bool, PageError> {
            Ok(false)
        }

        async fn frame_urls(&self) -> Result<Vec<String>, PageError> {
            Ok(Vec::new())
        }

        async fn reload(&self) -> Result<(), PageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn clean_page_is_not_present() {
        let outcome = orchestrator(3).resolve(&EmptyPage).await.unwrap();
        assert_eq!(outcome, ResolutionOutcome::NotPresent);
    }

    #[tokio::test]
    async fn interaction_resolution_carries_the_marker_and_no_token() {
        let outcome = orchestrator(3).resolve(&CheckboxPage).await.unwrap();
        assert_eq!(
            outcome,
            ResolutionOutcome::Resolved(ResolutionOutcome::INTERACTION_MARKER.into())
        );
        assert_eq!(outcome.token(), None);
    }

    #[test]
    fn token_accessor_distinguishes_interaction_resolutions() {
        assert_eq!(
            ResolutionOutcome::Resolved("tok-XYZ".into()).token(),
            Some("tok-XYZ")
        );
        assert_eq!(
            ResolutionOutcome::Resolved(ResolutionOutcome::INTERACTION_MARKER.into()).token(),
            None
        );
        assert_eq!(ResolutionOutcome::NotPresent.token(), None);
    }

    #[tokio::test]
    async fn retry_ceiling_is_honored_and_failure_has_a_reason() {
        let page = StubbornPage::new();
        let outcome = orchestrator(3).resolve(&page).await.unwrap();

        match outcome {
            ResolutionOutcome::Failed(reason) => assert!(!reason.is_empty()),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(*page.classify_passes.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn reload_runs_between_passes_but_not_before_the_first() {
        let page = StubbornPage::new();
        let outcome = orchestrator(3)
            .with_reload_between_attempts(true)
            .resolve(&page)
            .await
            .unwrap();

        assert!(matches!(outcome, ResolutionOutcome::Failed(_)));
        assert_eq!(*page.reloads.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn closed_page_aborts_without_retrying() {
        let mut page = StubbornPage::new();
        page.closed = true;
        let err = orchestrator(3)
            .resolve(&page)
            .await
            .expect_err("fatal page error must propagate");
        assert!(err.is_fatal());
        assert_eq!(*page.classify_passes.lock().unwrap(), 0);
    }

    #[test]
    fn retry_state_never_exceeds_its_ceiling() {
        let mut retry = RetryState::new(2);
        assert!(retry.begin_pass());
        assert!(retry.begin_pass());
        assert!(!retry.begin_pass());
        assert_eq!(retry.attempt(), 2);

        retry.record("last concrete error");
        assert_eq!(
            retry.into_failure(),
            ResolutionOutcome::Failed("last concrete error".into())
        );
    }
}
