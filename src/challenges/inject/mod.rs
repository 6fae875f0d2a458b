//! Token injection and acceptance verification.
//!
//! Applies a solution to the host page so the page's own verification logic
//! accepts it. Text answers go into the captcha input; tokens are written into
//! the hidden response field with an overwrite assignment, `input`/`change`
//! events are dispatched for any reactive page logic, and a page-declared
//! widget callback is invoked as a redundant activation path. Injection is
//! idempotent: reapplying the same token overwrites the field and skips the
//! callback so stale state is never replayed.
//!
//! Acceptance is checked with three heuristics in order, first success wins:
//! a visible success indicator, a response-field value long enough to be a
//! real token, and a committed navigation within the verification budget.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::challenges::core::{ChallengeObservation, InjectionResult, Selectors, Solution};
use crate::page::{PageDriver, PageError};

struct TokenApply {
    applied: bool,
    callback_invoked: bool,
}

/// Applies solutions to the page and confirms they took effect.
#[derive(Debug, Clone)]
pub struct Injector {
    selectors: Selectors,
    verify_timeout: Duration,
    indicator_wait: Duration,
    min_token_len: usize,
    settle_min: Duration,
    settle_max: Duration,
}

impl Injector {
    pub fn new(
        selectors: Selectors,
        verify_timeout: Duration,
        indicator_wait: Duration,
        min_token_len: usize,
    ) -> Self {
        Self {
            selectors,
            verify_timeout,
            indicator_wait,
            min_token_len,
            settle_min: Duration::from_millis(250),
            settle_max: Duration::from_millis(1250),
        }
    }

    /// Configure the randomized settle delay applied before injecting.
    pub fn with_settle_range(mut self, min: Duration, max: Duration) -> Self {
        self.settle_min = min;
        self.settle_max = if max < min { min } else { max };
        self
    }

    /// Apply `solution` to the page and verify it was accepted.
    pub async fn inject(
        &self,
        page: &dyn PageDriver,
        observation: &ChallengeObservation,
        solution: &Solution,
    ) -> Result<InjectionResult, PageError> {
        sleep(self.settle_delay()).await;

        match solution {
            Solution::Interaction => {
                // The dispatch layer already performed the interaction.
                let verified = self.verify_passive(page).await?;
                Ok(InjectionResult {
                    applied: true,
                    verified,
                })
            }
            Solution::Text(answer) => {
                let Some(input) = page.query(&self.selectors.image_input).await? else {
                    log::warn!("no captcha input matches '{}'", self.selectors.image_input);
                    return Ok(InjectionResult {
                        applied: false,
                        verified: false,
                    });
                };
                page.fill(&input, answer).await?;
                let verified = self.verify_passive(page).await?;
                Ok(InjectionResult {
                    applied: true,
                    verified,
                })
            }
            Solution::Token(token) => {
                let apply = self.apply_token(page, observation, token).await?;
                if !apply.applied {
                    return Ok(InjectionResult {
                        applied: false,
                        verified: false,
                    });
                }
                let verified = self.verify_token(page, token, apply.callback_invoked).await?;
                Ok(InjectionResult {
                    applied: true,
                    verified,
                })
            }
        }
    }

    async fn apply_token(
        &self,
        page: &dyn PageDriver,
        observation: &ChallengeObservation,
        token: &str,
    ) -> Result<TokenApply, PageError> {
        let outcome = page
            .evaluate(&set_field_script(&self.selectors.response_field, token))
            .await?;
        let outcome = outcome.as_str().unwrap_or_default().to_string();

        if outcome == "missing-field" {
            log::warn!(
                "no response field matches '{}'",
                self.selectors.response_field
            );
            return Ok(TokenApply {
                applied: false,
                callback_invoked: false,
            });
        }

        let mut callback_invoked = false;
        // Re-invoking the callback with an unchanged value would replay stale
        // widget state; only a fresh token goes through the callback path.
        if outcome == "applied"
            && let Some(callback) = &observation.callback
        {
            let result = page.evaluate(&callback_script(callback, token)).await?;
            callback_invoked = result.as_str() == Some("invoked");
            if !callback_invoked {
                log::debug!("declared callback '{callback}' is not a page function");
            }
        }

        Ok(TokenApply {
            applied: true,
            callback_invoked,
        })
    }

    async fn verify_token(
        &self,
        page: &dyn PageDriver,
        token: &str,
        callback_invoked: bool,
    ) -> Result<bool, PageError> {
        if page
            .wait_for(&self.selectors.success_indicator, self.indicator_wait)
            .await?
        {
            return Ok(true);
        }

        // Neither the passive event path nor a callback registered: hand the
        // form to the page directly before falling back to weaker signals.
        if !callback_invoked {
            let submitted = page
                .evaluate(&submit_form_script(&self.selectors.response_field))
                .await?;
            log::debug!("form submit fallback: {submitted}");
        }

        let value = page
            .evaluate(&read_field_script(&self.selectors.response_field))
            .await?;
        if let Some(value) = value.as_str()
            && value == token
            && value.len() >= self.min_token_len
        {
            return Ok(true);
        }

        page.wait_for_navigation(self.verify_timeout).await
    }

    /// Verification for solutions with no field to inspect: success indicator
    /// first, then a committed navigation.
    async fn verify_passive(&self, page: &dyn PageDriver) -> Result<bool, PageError> {
        if page
            .wait_for(&self.selectors.success_indicator, self.indicator_wait)
            .await?
        {
            return Ok(true);
        }
        page.wait_for_navigation(self.verify_timeout).await
    }

    fn settle_delay(&self) -> Duration {
        if self.settle_max <= self.settle_min {
            return self.settle_min;
        }
        let (min, max) = (self.settle_min.as_secs_f32(), self.settle_max.as_secs_f32());
        let jitter = rand::thread_rng().gen_range(min..max);
        Duration::from_secs_f32(jitter)
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into())
}

fn set_field_script(selector: &str, token: &str) -> String {
    let selector = js_string(selector);
    let token = js_string(token);
    format!(
        r#"(() => {{
  const field = document.querySelector({selector});
  if (!field) return 'missing-field';
  const previous = field.value;
  field.value = {token};
  field.dispatchEvent(new Event('input', {{ bubbles: true }}));
  field.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return previous === {token} ? 'unchanged' : 'applied';
}})()"#
    )
}

fn callback_script(name: &str, token: &str) -> String {
    let name = js_string(name);
    let token = js_string(token);
    format!(
        r#"(() => {{
  const cb = window[{name}];
  if (typeof cb !== 'function') return 'missing';
  cb({token});
  return 'invoked';
}})()"#
    )
}

fn read_field_script(selector: &str) -> String {
    let selector = js_string(selector);
    format!(
        r#"(() => {{
  const field = document.querySelector({selector});
  return field ? field.value : '';
}})()"#
    )
}

fn submit_form_script(selector: &str) -> String {
    let selector = js_string(selector);
    format!(
        r#"(() => {{
  const field = document.querySelector({selector});
  const form = field && field.form;
  if (!form) return 'no-form';
  form.submit();
  return 'submitted';
}})()"#
    )
}
