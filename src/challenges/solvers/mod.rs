//! Solver dispatch.
//!
//! Routes a classified observation to the appropriate solving strategy:
//! a synchronous OCR call for inline images, the asynchronous token service
//! for widget and managed-frame challenges, and direct interaction (with a
//! remote-solve fallback) for inline checkboxes. "Challenge not present" never
//! reaches this layer; the classifier handles it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::challenges::core::{ChallengeKind, ChallengeObservation, Selectors, Solution};
use crate::external_deps::captcha::{CaptchaError, OcrProvider, TokenProvider, TokenTask};
use crate::page::{PageDriver, PageError};

/// Errors signalled upward to the orchestrator.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("solving service unreachable: {0}")]
    ServiceUnreachable(String),
    #[error("solving service rejected the challenge: {0}")]
    ServiceRejected(String),
    #[error("solving timed out after {0:?}")]
    Timeout(Duration),
    #[error("no solver configured for {0}")]
    NoSolver(&'static str),
    #[error(transparent)]
    Page(#[from] PageError),
}

impl From<CaptchaError> for SolveError {
    fn from(err: CaptchaError) -> Self {
        match err {
            CaptchaError::Unreachable(reason) => SolveError::ServiceUnreachable(reason),
            CaptchaError::Rejected(reason) => SolveError::ServiceRejected(reason),
            CaptchaError::Malformed(reason) => SolveError::ServiceRejected(reason),
            CaptchaError::Timeout(budget) => SolveError::Timeout(budget),
        }
    }
}

/// Routes observations to the configured solving strategies.
pub struct SolverDispatch {
    ocr: Option<Arc<dyn OcrProvider>>,
    token: Option<Arc<dyn TokenProvider>>,
    selectors: Selectors,
    checkbox_wait: Duration,
    min_ocr_len: usize,
}

impl SolverDispatch {
    pub fn new(selectors: Selectors, checkbox_wait: Duration, min_ocr_len: usize) -> Self {
        Self {
            ocr: None,
            token: None,
            selectors,
            checkbox_wait,
            min_ocr_len,
        }
    }

    /// Attach the OCR recognition provider.
    pub fn with_ocr_provider(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(provider);
        self
    }

    /// Attach the asynchronous token-solving provider.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token = Some(provider);
        self
    }

    /// Produce a solution for one observation.
    pub async fn solve(
        &self,
        page: &dyn PageDriver,
        observation: &ChallengeObservation,
    ) -> Result<Solution, SolveError> {
        match observation.kind {
            ChallengeKind::None => Err(SolveError::NoSolver("absent challenge")),
            ChallengeKind::ImageCaptcha => self.solve_image(observation).await,
            ChallengeKind::EmbeddedWidget | ChallengeKind::ManagedFrame => {
                self.solve_token(observation).await
            }
            ChallengeKind::InlineCheckbox => self.solve_checkbox(page, observation).await,
        }
    }

    /// Single request/response OCR recognition. The provider applies its own
    /// bounded transport retry; a definitive rejection is final here.
    async fn solve_image(
        &self,
        observation: &ChallengeObservation,
    ) -> Result<Solution, SolveError> {
        let provider = self
            .ocr
            .as_ref()
            .ok_or(SolveError::NoSolver("image captcha"))?;
        let image = observation
            .image
            .as_deref()
            .ok_or_else(|| SolveError::ServiceRejected("observation carried no image data".into()))?;

        let answer = provider.recognize(image).await?;
        if answer.len() < self.min_ocr_len {
            return Err(SolveError::ServiceRejected(format!(
                "recognition answer too short: '{answer}'"
            )));
        }

        log::debug!("ocr provider {} recognised {} chars", provider.name(), answer.len());
        Ok(Solution::Text(answer))
    }

    async fn solve_token(
        &self,
        observation: &ChallengeObservation,
    ) -> Result<Solution, SolveError> {
        let provider = self
            .token
            .as_ref()
            .ok_or(SolveError::NoSolver("token challenge"))?;
        let site_key = observation
            .site_key
            .as_deref()
            .ok_or_else(|| SolveError::ServiceRejected("observation carried no site key".into()))?;

        let mut task = TokenTask::new(site_key, observation.page_url.clone());
        if let Some(action) = &observation.action {
            task = task.with_action(action.clone());
        }
        if let Some(cdata) = &observation.cdata {
            task = task.with_cdata(cdata.clone());
        }

        let token = provider.solve(&task).await?;
        Ok(Solution::Token(token))
    }

    /// Simulated activation of the checkbox control, then a bounded wait for
    /// the success indicator. Falls back to a remote token solve only when the
    /// observation carries a site key.
    async fn solve_checkbox(
        &self,
        page: &dyn PageDriver,
        observation: &ChallengeObservation,
    ) -> Result<Solution, SolveError> {
        if let Some(checkbox) = page.query(&self.selectors.checkbox).await? {
            page.click(&checkbox).await?;
            if page
                .wait_for(&self.selectors.success_indicator, self.checkbox_wait)
                .await?
            {
                log::debug!("checkbox interaction verified directly");
                return Ok(Solution::Interaction);
            }
        }

        if observation.site_key.is_some() {
            log::info!("checkbox interaction inconclusive; falling back to token solve");
            return self.solve_token(observation).await;
        }

        Err(SolveError::Timeout(self.checkbox_wait))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::page::ElementRef;

    struct StubOcr {
        answer: Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl OcrProvider for StubOcr {
        fn name(&self) -> &'static str {
            "stub-ocr"
        }

        async fn recognize(&self, _image: &str) -> Result<String, CaptchaError> {
            self.answer
                .map(str::to_string)
                .map_err(|reason| CaptchaError::Rejected(reason.into()))
        }
    }

    struct StubToken {
        seen: Mutex<Vec<TokenTask>>,
    }

    impl StubToken {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TokenProvider for StubToken {
        fn name(&self) -> &'static str {
            "stub-token"
        }

        async fn solve(&self, task: &TokenTask) -> Result<String, CaptchaError> {
            self.seen.lock().unwrap().push(task.clone());
            Ok("tok-XYZ".into())
        }
    }

    struct CheckboxPage {
        has_checkbox: bool,
        indicator_appears: bool,
        clicks: Mutex<Vec<String>>,
    }

    impl CheckboxPage {
        fn new(has_checkbox: bool, indicator_appears: bool) -> Self {
            Self {
                has_checkbox,
                indicator_appears,
                clicks: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageDriver for CheckboxPage {
        async fn current_url(&self) -> Result<Url, PageError> {
            Ok(Url::parse("https://portal.example/renew").unwrap())
        }

        async fn query(&self, selector: &str) -> Result<Option<ElementRef>, PageError> {
            let selectors = Selectors::default();
            if self.has_checkbox && selector == selectors.checkbox {
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

        async fn click(&self, element: &ElementRef) -> Result<(), PageError> {
            self.clicks.lock().unwrap().push(element.id().to_string());
            Ok(())
        }

        async fn fill(&self, _element: &ElementRef, _value: &str) -> Result<(), PageError> {
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, PageError> {
            Ok(serde_json::Value::Null)
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<bool, PageError> {
            Ok(self.indicator_appears)
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

    fn page_url() -> Url {
        Url::parse("https://portal.example/renew").unwrap()
    }

    fn dispatch() -> SolverDispatch {
        SolverDispatch::new(Selectors::default(), Duration::from_secs(5), 4)
    }

    #[tokio::test]
    async fn image_captcha_uses_ocr_provider() {
        let dispatch = dispatch().with_ocr_provider(Arc::new(StubOcr { answer: Ok("4821") }));
        let observation =
            ChallengeObservation::image_captcha("data:image/png;base64,AAAA", page_url());

        let solution = dispatch
            .solve(&CheckboxPage::new(false, false), &observation)
            .await
            .expect("should solve");
        assert_eq!(solution, Solution::Text("4821".into()));
    }

    #[tokio::test]
    async fn short_recognition_answer_is_rejected() {
        let dispatch = dispatch().with_ocr_provider(Arc::new(StubOcr { answer: Ok("48") }));
        let observation =
            ChallengeObservation::image_captcha("data:image/png;base64,AAAA", page_url());

        let err = dispatch
            .solve(&CheckboxPage::new(false, false), &observation)
            .await
            .expect_err("short answer must fail");
        assert!(matches!(err, SolveError::ServiceRejected(_)));
    }

    #[tokio::test]
    async fn token_challenge_forwards_site_key_and_metadata() {
        let provider = Arc::new(StubToken::new());
        let dispatch = dispatch().with_token_provider(provider.clone());
        let observation =
            ChallengeObservation::embedded_widget("0x4AAAAAAADnPIDROrmt1Wwj", page_url())
                .with_action("renew")
                .with_cdata("blob");

        let solution = dispatch
            .solve(&CheckboxPage::new(false, false), &observation)
            .await
            .expect("should solve");
        assert_eq!(solution, Solution::Token("tok-XYZ".into()));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].site_key, "0x4AAAAAAADnPIDROrmt1Wwj");
        assert_eq!(seen[0].action.as_deref(), Some("renew"));
        assert_eq!(seen[0].cdata.as_deref(), Some("blob"));
    }

    #[tokio::test]
    async fn missing_token_provider_is_a_configuration_error() {
        let observation = ChallengeObservation::managed_frame("0x4AAAAAAADnPIDROrmt1Wwj", page_url());
        let err = dispatch()
            .solve(&CheckboxPage::new(false, false), &observation)
            .await
            .expect_err("no provider configured");
        assert!(matches!(err, SolveError::NoSolver(_)));
    }

    #[tokio::test]
    async fn checkbox_interaction_resolves_without_remote_solve() {
        let page = CheckboxPage::new(true, true);
        let observation = ChallengeObservation::inline_checkbox(page_url());

        let solution = dispatch()
            .solve(&page, &observation)
            .await
            .expect("should resolve");
        assert_eq!(solution, Solution::Interaction);
        assert_eq!(page.clicks.lock().unwrap().as_slice(), ["cb1"]);
    }

    #[tokio::test]
    async fn inconclusive_checkbox_falls_back_to_token_solve() {
        let provider = Arc::new(StubToken::new());
        let dispatch = dispatch().with_token_provider(provider.clone());
        let page = CheckboxPage::new(true, false);
        let observation = ChallengeObservation::inline_checkbox(page_url())
            .with_site_key("0x4AAAAAAADnPIDROrmt1Wwj");

        let solution = dispatch.solve(&page, &observation).await.expect("fallback");
        assert_eq!(solution, Solution::Token("tok-XYZ".into()));
        assert_eq!(provider.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inconclusive_checkbox_without_site_key_times_out() {
        let page = CheckboxPage::new(true, false);
        let observation = ChallengeObservation::inline_checkbox(page_url());

        let err = dispatch()
            .solve(&page, &observation)
            .await
            .expect_err("no fallback possible");
        assert!(matches!(err, SolveError::Timeout(_)));
    }
}
