use std::sync::Arc;
#[cfg(feature = "preview-http")]
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{PreviewError, ServiceError};

#[async_trait]
pub trait WatermarkService: Send + Sync {
    async fn apply(&self, preview_url: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkPayload<'a> {
    image_url: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkResponse {
    #[serde(alias = "url", alias = "watermarked_url")]
    watermarked_url: String,
}

#[cfg(feature = "preview-http")]
pub struct HttpWatermarkService {
    client: reqwest::Client,
    service_url: String,
    bearer_token: Option<String>,
}

#[cfg(feature = "preview-http")]
impl HttpWatermarkService {
    pub fn new(
        service_url: impl Into<String>,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            service_url: service_url.into(),
            bearer_token,
        })
    }
}

#[cfg(feature = "preview-http")]
#[async_trait]
impl WatermarkService for HttpWatermarkService {
    async fn apply(&self, preview_url: &str) -> Result<String, ServiceError> {
        let url = super::client::build_service_endpoint(&self.service_url, "watermark")?;
        let mut request = self.client.post(url).json(&WatermarkPayload {
            image_url: preview_url,
        });
        if let Some(token) = self.bearer_token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::UnexpectedStatus(response.status()));
        }
        let body = response.json::<WatermarkResponse>().await?;
        if body.watermarked_url.trim().is_empty() {
            return Err(ServiceError::InvalidResponse("empty watermarked url".into()));
        }
        Ok(body.watermarked_url)
    }
}

/// Post-processing step that never blocks a preview on watermark trouble.
#[derive(Clone, Default)]
pub struct Watermarker {
    service: Option<Arc<dyn WatermarkService>>,
}

impl Watermarker {
    pub fn new(service: Arc<dyn WatermarkService>) -> Self {
        Self {
            service: Some(service),
        }
    }

    /// Passes previews through untouched.
    pub fn disabled() -> Self {
        Self { service: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    /// Returns the watermarked url, or `preview_url` itself when watermarking fails.
    pub async fn apply(&self, preview_url: &str) -> String {
        let Some(service) = self.service.as_ref() else {
            return preview_url.to_string();
        };
        match service.apply(preview_url).await {
            Ok(url) => url,
            Err(err) => {
                let err = PreviewError::watermark(err.to_string());
                warn!(preview_url, error = %err, "using unwatermarked preview");
                preview_url.to_string()
            }
        }
    }
}
