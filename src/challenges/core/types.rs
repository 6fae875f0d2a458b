//! Core data structures shared across challenge classification, solving, and
//! injection layers.

use url::Url;

/// High level challenge categories recognised by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    /// No verification obstacle is present.
    None,
    /// Inline image whose pixels are carried in a `data:` URI.
    ImageCaptcha,
    /// Widget rendered in the host document with a declared site key.
    EmbeddedWidget,
    /// Challenge delivered through a managed external frame.
    ManagedFrame,
    /// Checkbox-style control that may verify on direct interaction.
    InlineCheckbox,
}

/// Immutable snapshot of one classification pass.
///
/// Produced fresh every time the classifier runs and never mutated; a rotated
/// or refreshed challenge yields a new observation on the next pass.
#[derive(Debug, Clone)]
pub struct ChallengeObservation {
    pub kind: ChallengeKind,
    pub site_key: Option<String>,
    pub action: Option<String>,
    pub cdata: Option<String>,
    /// Name of a page-declared widget callback, when the markup advertises one.
    pub callback: Option<String>,
    /// Full `data:` URI of an inline captcha image.
    pub image: Option<String>,
    pub page_url: Url,
}

impl ChallengeObservation {
    pub fn none(page_url: Url) -> Self {
        Self {
            kind: ChallengeKind::None,
            site_key: None,
            action: None,
            cdata: None,
            callback: None,
            image: None,
            page_url,
        }
    }

    pub fn embedded_widget(site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            kind: ChallengeKind::EmbeddedWidget,
            site_key: Some(site_key.into()),
            ..Self::none(page_url)
        }
    }

    pub fn managed_frame(site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            kind: ChallengeKind::ManagedFrame,
            site_key: Some(site_key.into()),
            ..Self::none(page_url)
        }
    }

    pub fn inline_checkbox(page_url: Url) -> Self {
        Self {
            kind: ChallengeKind::InlineCheckbox,
            ..Self::none(page_url)
        }
    }

    pub fn image_captcha(image: impl Into<String>, page_url: Url) -> Self {
        Self {
            kind: ChallengeKind::ImageCaptcha,
            image: Some(image.into()),
            ..Self::none(page_url)
        }
    }

    pub fn with_site_key(mut self, site_key: impl Into<String>) -> Self {
        self.site_key = Some(site_key.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_cdata(mut self, cdata: impl Into<String>) -> Self {
        self.cdata = Some(cdata.into());
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    /// `true` unless the pass found no challenge at all.
    pub fn is_present(&self) -> bool {
        self.kind != ChallengeKind::None
    }

    /// `true` for kinds solved through the asynchronous token service.
    pub fn is_token_based(&self) -> bool {
        matches!(
            self.kind,
            ChallengeKind::EmbeddedWidget | ChallengeKind::ManagedFrame
        )
    }
}

/// Solution produced by the dispatch layer for one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Solution {
    /// Recognised text for an image captcha.
    Text(String),
    /// Opaque token for a widget or managed-frame challenge.
    Token(String),
    /// The challenge verified through direct interaction; nothing to inject.
    Interaction,
}

impl Solution {
    /// The injectable value, when one exists.
    pub fn value(&self) -> Option<&str> {
        match self {
            Solution::Text(text) => Some(text),
            Solution::Token(token) => Some(token),
            Solution::Interaction => None,
        }
    }
}

/// Outcome of a single injection attempt. Transient, computed once per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionResult {
    /// The solution reached the page (field written or interaction completed).
    pub applied: bool,
    /// The page gave a positive signal that the solution was accepted.
    pub verified: bool,
}

/// Selector heuristics used to locate challenge markup and related controls.
///
/// Defaults match the markup observed across the renewal-portal variants;
/// callers can override any of them for a different provider.
#[derive(Debug, Clone)]
pub struct Selectors {
    /// Embedded widget carrying a declared site key.
    pub widget: String,
    /// Hidden field the widget's own script would populate.
    pub response_field: String,
    /// Checkbox-style inline challenge control.
    pub checkbox: String,
    /// Inline captcha image.
    pub image: String,
    /// Input where a recognised image-captcha answer belongs.
    pub image_input: String,
    /// Element whose visibility signals a completed verification.
    pub success_indicator: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            widget: "div.cf-turnstile[data-sitekey], [data-sitekey]".into(),
            response_field: r#"input[name="cf-turnstile-response"]"#.into(),
            checkbox: r#"label.cb-lb input[type="checkbox"], input[type="checkbox"].challenge-checkbox"#
                .into(),
            image: r#"img[src^="data:"]"#.into(),
            image_input: r#"input[placeholder*="画像"], input[name="captcha"], input.captcha-input"#
                .into(),
            success_indicator: "#success, .verification-success, #challenge-success-text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://portal.example/renew").unwrap()
    }

    #[test]
    fn none_observation_is_not_present() {
        let obs = ChallengeObservation::none(page_url());
        assert_eq!(obs.kind, ChallengeKind::None);
        assert!(!obs.is_present());
    }

    #[test]
    fn widget_observation_carries_metadata() {
        let obs = ChallengeObservation::embedded_widget("0x4AAAAAAADnPIDRO", page_url())
            .with_action("renew")
            .with_cdata("session-blob");
        assert!(obs.is_present());
        assert!(obs.is_token_based());
        assert_eq!(obs.site_key.as_deref(), Some("0x4AAAAAAADnPIDRO"));
        assert_eq!(obs.action.as_deref(), Some("renew"));
    }

    #[test]
    fn interaction_solution_has_no_value() {
        assert_eq!(Solution::Interaction.value(), None);
        assert_eq!(Solution::Token("t".into()).value(), Some("t"));
    }
}
