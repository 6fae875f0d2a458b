//! HTTP client for the synchronous OCR recognition service.
//!
//! Wire format: the encoded image (its full `data:` URI) is POSTed as the raw
//! request body and the service answers with the recognised text as plain
//! text. One bounded retry is applied on transport failures only; a definitive
//! service answer is never retried here.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::{CaptchaConfig, CaptchaError, OcrProvider};

/// Reqwest-backed [`OcrProvider`].
#[derive(Debug, Clone)]
pub struct HttpOcrClient {
    endpoint: Url,
    client: Client,
}

impl HttpOcrClient {
    pub fn new(endpoint: Url, config: &CaptchaConfig) -> Result<Self, CaptchaError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| CaptchaError::Unreachable(err.to_string()))?;
        Ok(Self { endpoint, client })
    }

    /// Wrap an existing reqwest client (it should carry its own timeout).
    pub fn from_client(endpoint: Url, client: Client) -> Self {
        Self { endpoint, client }
    }

    async fn request(&self, image: &str) -> Result<String, CaptchaError> {
        let response = self
            .client
            .post(self.endpoint.as_str())
            .body(image.to_owned())
            .send()
            .await
            .map_err(|err| CaptchaError::Unreachable(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| CaptchaError::Malformed(err.to_string()))?;

        if !status.is_success() {
            return Err(CaptchaError::Rejected(format!(
                "recognition endpoint answered {status}: {text}"
            )));
        }

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl OcrProvider for HttpOcrClient {
    fn name(&self) -> &'static str {
        "http-ocr"
    }

    async fn recognize(&self, image: &str) -> Result<String, CaptchaError> {
        match self.request(image).await {
            Ok(text) => Ok(text),
            // Transient transport failure: one more try, then give up.
            Err(CaptchaError::Unreachable(first)) => {
                log::warn!("ocr request failed ({first}); retrying once");
                self.request(image).await
            }
            Err(err) => Err(err),
        }
    }
}
