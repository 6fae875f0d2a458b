//! Challenge classification.
//!
//! The classifier runs an ordered list of detector probes against the current
//! page state and stops at the first match. Each probe is a pure read with no
//! side effects, individually bounded by a short timeout; the detection order
//! goes from the highest-confidence signal (a declared site key) down to the
//! weakest (an inline data-URI image). A pass that matches nothing yields a
//! `ChallengeKind::None` observation.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tokio::time::timeout;
use url::Url;

use crate::challenges::core::{ChallengeKind, ChallengeObservation, Selectors};
use crate::page::{PageDriver, PageError};

/// Probe priority. First match wins; later entries are never evaluated.
const DETECTION_ORDER: [ChallengeKind; 4] = [
    ChallengeKind::EmbeddedWidget,
    ChallengeKind::ManagedFrame,
    ChallengeKind::InlineCheckbox,
    ChallengeKind::ImageCaptcha,
];

/// Frame addresses belonging to the managed challenge platform.
static CHALLENGE_FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"challenges\.cloudflare\.com|/cdn-cgi/challenge-platform/")
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid challenge frame regex: {err}"))
});

/// Site key embedded as a long path segment of the frame address. Keys may
/// carry `_` and `-` alongside alphanumerics.
static SITE_KEY_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| {
        Regex::new(r"/([0-9A-Za-z_-]{20,})(?:[/?#]|$)")
            .unwrap_or_else(|err| panic!("invalid site key segment regex: {err}"))
    });

/// Ordered-probe challenge classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    selectors: Selectors,
    probe_timeout: Duration,
}

impl Classifier {
    pub fn new(selectors: Selectors, probe_timeout: Duration) -> Self {
        Self {
            selectors,
            probe_timeout,
        }
    }

    /// Inspect the page and report zero or one challenge.
    ///
    /// Driver errors propagate; a closed page handle in particular is fatal
    /// and must never be retried by callers.
    pub async fn classify(
        &self,
        page: &dyn PageDriver,
    ) -> Result<ChallengeObservation, PageError> {
        let page_url = page.current_url().await?;

        for kind in DETECTION_ORDER {
            match timeout(self.probe_timeout, self.probe(page, kind, &page_url)).await {
                Ok(result) => {
                    if let Some(observation) = result? {
                        log::debug!("classified {kind:?} on {page_url}");
                        return Ok(observation);
                    }
                }
                Err(_) => {
                    log::debug!("probe {kind:?} exceeded its {:?} budget", self.probe_timeout);
                }
            }
        }

        log::debug!("no challenge markers on {page_url}");
        Ok(ChallengeObservation::none(page_url))
    }

    async fn probe(
        &self,
        page: &dyn PageDriver,
        kind: ChallengeKind,
        page_url: &Url,
    ) -> Result<Option<ChallengeObservation>, PageError> {
        match kind {
            ChallengeKind::EmbeddedWidget => self.probe_widget(page, page_url).await,
            ChallengeKind::ManagedFrame => self.probe_frame(page, page_url).await,
            ChallengeKind::InlineCheckbox => self.probe_checkbox(page, page_url).await,
            ChallengeKind::ImageCaptcha => self.probe_image(page, page_url).await,
            ChallengeKind::None => Ok(None),
        }
    }

    /// Declared site key on an embedded widget. Highest confidence: the key is
    /// read directly off the attribute, no inference involved.
    async fn probe_widget(
        &self,
        page: &dyn PageDriver,
        page_url: &Url,
    ) -> Result<Option<ChallengeObservation>, PageError> {
        let Some(widget) = page.query(&self.selectors.widget).await? else {
            return Ok(None);
        };
        let Some(site_key) = page
            .attribute(&widget, "data-sitekey")
            .await?
            .filter(|key| !key.is_empty())
        else {
            return Ok(None);
        };

        let mut observation = ChallengeObservation::embedded_widget(site_key, page_url.clone());
        if let Some(action) = page.attribute(&widget, "data-action").await? {
            observation = observation.with_action(action);
        }
        if let Some(cdata) = page.attribute(&widget, "data-cdata").await? {
            observation = observation.with_cdata(cdata);
        }
        if let Some(callback) = page.attribute(&widget, "data-callback").await? {
            observation = observation.with_callback(callback);
        }
        Ok(Some(observation))
    }

    /// Managed frame whose address matches the challenge platform; the site
    /// key is the first 20+ character key-shaped path segment.
    async fn probe_frame(
        &self,
        page: &dyn PageDriver,
        page_url: &Url,
    ) -> Result<Option<ChallengeObservation>, PageError> {
        for frame_url in page.frame_urls().await? {
            if !CHALLENGE_FRAME_RE.is_match(&frame_url) {
                continue;
            }
            if let Some(site_key) = SITE_KEY_SEGMENT_RE
                .captures(&frame_url)
                .and_then(|caps| caps.get(1))
            {
                return Ok(Some(ChallengeObservation::managed_frame(
                    site_key.as_str(),
                    page_url.clone(),
                )));
            }
            log::debug!("challenge frame without extractable site key: {frame_url}");
        }
        Ok(None)
    }

    /// Inline checkbox control. A nearby widget attribute may still supply a
    /// site key for the remote-solve fallback.
    async fn probe_checkbox(
        &self,
        page: &dyn PageDriver,
        page_url: &Url,
    ) -> Result<Option<ChallengeObservation>, PageError> {
        if page.query(&self.selectors.checkbox).await?.is_none() {
            return Ok(None);
        }

        let mut observation = ChallengeObservation::inline_checkbox(page_url.clone());
        if let Some(widget) = page.query(&self.selectors.widget).await?
            && let Some(site_key) = page
                .attribute(&widget, "data-sitekey")
                .await?
                .filter(|key| !key.is_empty())
        {
            observation = observation.with_site_key(site_key);
        }
        Ok(Some(observation))
    }

    /// Inline image whose source is self-contained; no network fetch is needed
    /// to obtain the pixel data.
    async fn probe_image(
        &self,
        page: &dyn PageDriver,
        page_url: &Url,
    ) -> Result<Option<ChallengeObservation>, PageError> {
        let Some(image) = page.query(&self.selectors.image).await? else {
            return Ok(None);
        };
        let Some(src) = page
            .attribute(&image, "src")
            .await?
            .filter(|src| src.starts_with("data:"))
        else {
            return Ok(None);
        };
        Ok(Some(ChallengeObservation::image_captcha(
            src,
            page_url.clone(),
        )))
    }
}
