//! Top-level resolver facade.
//!
//! Bundles the classifier, solver dispatch, and injector behind one
//! configured entry point. All tunables (service endpoints, credentials,
//! timeout and retry budgets) live in [`ResolverConfig`], passed in explicitly
//! at construction; the engine reads no environment variables. Sessions share
//! nothing: a resolver holds no mutable state, and callers driving several
//! pages concurrently simply build one resolver (or orchestrator) per session.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::challenges::core::Selectors;
use crate::challenges::detectors::Classifier;
use crate::challenges::inject::Injector;
use crate::challenges::orchestrator::{Orchestrator, ResolutionOutcome};
use crate::challenges::solvers::SolverDispatch;
use crate::external_deps::captcha::{
    CaptchaConfig, CaptchaError, HttpOcrClient, OcrProvider, TokenProvider, TokenSolverClient,
};
use crate::page::{PageDriver, PageError};

/// Configuration for a [`Resolver`].
#[derive(Clone)]
pub struct ResolverConfig {
    /// Endpoint of the synchronous OCR recognition service.
    pub ocr_endpoint: Option<Url>,
    /// Base endpoint of the asynchronous token-solving service.
    pub token_endpoint: Option<Url>,
    /// Credential for the token-solving service.
    pub api_key: Option<String>,
    /// Pre-built providers take precedence over the endpoints above.
    pub ocr_provider: Option<Arc<dyn OcrProvider>>,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    pub selectors: Selectors,
    /// Budget for each classification probe.
    pub probe_timeout: Duration,
    /// Submit/poll budgets for the token service.
    pub captcha: CaptchaConfig,
    /// Wait for the success indicator after a checkbox interaction.
    pub checkbox_wait: Duration,
    /// Overall post-injection verification budget.
    pub verify_timeout: Duration,
    /// Short wait for the success indicator during verification.
    pub indicator_wait: Duration,
    /// Randomized settle delay applied before injecting.
    pub settle_min: Duration,
    pub settle_max: Duration,
    /// Recognition answers shorter than this are treated as rejections.
    pub min_ocr_len: usize,
    /// Minimum response-field length accepted as a real token.
    pub min_token_len: usize,
    /// Retry ceiling for one resolution call.
    pub max_attempts: u32,
    /// Reload the page before each retry pass so rotated challenges refresh.
    pub reload_between_attempts: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: None,
            token_endpoint: None,
            api_key: None,
            ocr_provider: None,
            token_provider: None,
            selectors: Selectors::default(),
            probe_timeout: Duration::from_secs(8),
            captcha: CaptchaConfig::default(),
            checkbox_wait: Duration::from_secs(10),
            verify_timeout: Duration::from_secs(10),
            indicator_wait: Duration::from_secs(2),
            settle_min: Duration::from_millis(250),
            settle_max: Duration::from_millis(1250),
            min_ocr_len: 4,
            min_token_len: 20,
            max_attempts: 3,
            reload_between_attempts: true,
        }
    }
}

/// Errors raised while wiring up a resolver.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("token endpoint configured without an api key")]
    MissingApiKey,
    #[error("solving-service client setup failed: {0}")]
    Captcha(#[from] CaptchaError),
}

/// Fluent builder for [`Resolver`].
pub struct ResolverBuilder {
    config: ResolverConfig,
}

impl ResolverBuilder {
    pub fn new() -> Self {
        Self {
            config: ResolverConfig::default(),
        }
    }

    pub fn with_ocr_endpoint(mut self, endpoint: Url) -> Self {
        self.config.ocr_endpoint = Some(endpoint);
        self
    }

    pub fn with_token_endpoint(mut self, endpoint: Url) -> Self {
        self.config.token_endpoint = Some(endpoint);
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn with_ocr_provider(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.config.ocr_provider = Some(provider);
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.config.token_provider = Some(provider);
        self
    }

    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.config.selectors = selectors;
        self
    }

    pub fn with_captcha_config(mut self, captcha: CaptchaConfig) -> Self {
        self.config.captcha = captcha;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn with_reload_between_attempts(mut self, reload: bool) -> Self {
        self.config.reload_between_attempts = reload;
        self
    }

    pub fn build(self) -> Result<Resolver, ResolverError> {
        Resolver::new(self.config)
    }
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configured entry point of the resolution engine.
pub struct Resolver {
    orchestrator: Orchestrator,
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    pub fn new(config: ResolverConfig) -> Result<Self, ResolverError> {
        let ocr_provider: Option<Arc<dyn OcrProvider>> = match (
            config.ocr_provider,
            config.ocr_endpoint,
        ) {
            (Some(provider), _) => Some(provider),
            (None, Some(endpoint)) => {
                Some(Arc::new(HttpOcrClient::new(endpoint, &config.captcha)?))
            }
            (None, None) => None,
        };

        let token_provider: Option<Arc<dyn TokenProvider>> = match (
            config.token_provider,
            config.token_endpoint,
        ) {
            (Some(provider), _) => Some(provider),
            (None, Some(endpoint)) => {
                let api_key = config.api_key.ok_or(ResolverError::MissingApiKey)?;
                Some(Arc::new(TokenSolverClient::http(
                    endpoint,
                    api_key,
                    config.captcha.clone(),
                )?))
            }
            (None, None) => None,
        };

        let classifier = Classifier::new(config.selectors.clone(), config.probe_timeout);

        let mut dispatch = SolverDispatch::new(
            config.selectors.clone(),
            config.checkbox_wait,
            config.min_ocr_len,
        );
        if let Some(provider) = ocr_provider {
            dispatch = dispatch.with_ocr_provider(provider);
        }
        if let Some(provider) = token_provider {
            dispatch = dispatch.with_token_provider(provider);
        }

        let injector = Injector::new(
            config.selectors,
            config.verify_timeout,
            config.indicator_wait,
            config.min_token_len,
        )
        .with_settle_range(config.settle_min, config.settle_max);

        let orchestrator = Orchestrator::new(classifier, dispatch, injector, config.max_attempts)
            .with_reload_between_attempts(config.reload_between_attempts);

        Ok(Self { orchestrator })
    }

    /// Resolve the challenge currently blocking `page`, if any.
    pub async fn resolve(&self, page: &dyn PageDriver) -> Result<ResolutionOutcome, PageError> {
        self.orchestrator.resolve(page).await
    }

    /// Resolve every challenge on `page` before the caller's final submission.
    pub async fn resolve_all(
        &self,
        page: &dyn PageDriver,
    ) -> Result<Vec<ResolutionOutcome>, PageError> {
        self.orchestrator.resolve_all(page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_requires_an_api_key() {
        let err = Resolver::builder()
            .with_token_endpoint(Url::parse("https://api.solver.example/").unwrap())
            .build()
            .expect_err("api key is mandatory with a token endpoint");
        assert!(matches!(err, ResolverError::MissingApiKey));
    }

    #[test]
    fn builder_accepts_a_full_service_configuration() {
        let resolver = Resolver::builder()
            .with_ocr_endpoint(Url::parse("https://ocr.example/recognize").unwrap())
            .with_token_endpoint(Url::parse("https://api.solver.example/").unwrap())
            .with_api_key("client-key")
            .with_max_attempts(5)
            .build();
        assert!(resolver.is_ok());
    }
}
