use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{PreviewError, PreviewResult, ServiceError};
use super::types::{GenerationRequest, GenerationResult, JobStatus};

const DEFAULT_POLL_BASE_MS: u64 = 500;
const DEFAULT_POLL_STEP_MS: u64 = 250;
const DEFAULT_POLL_CAP_MS: u64 = 4_000;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 30;

/// Remote image-generation service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ServiceError>;
    async fn status(&self, job_id: &str) -> Result<JobStatus, ServiceError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratePayload<'a> {
    image: &'a str,
    style_name: &'a str,
    request_id: &'a str,
    aspect_ratio: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub status: String,
    #[serde(default, alias = "previewUrl")]
    pub preview_url: Option<String>,
    #[serde(default, alias = "requestId")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateResponse {
    /// `fallback_job_id` is used when a processing answer omits its id.
    pub fn into_result(self, fallback_job_id: &str) -> Result<GenerationResult, ServiceError> {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "complete" | "succeeded" => match self.preview_url {
                Some(preview_url) if !preview_url.trim().is_empty() => {
                    Ok(GenerationResult::Complete { preview_url })
                }
                _ => Err(ServiceError::InvalidResponse(
                    "complete response without preview url".into(),
                )),
            },
            "processing" | "pending" | "starting" => Ok(GenerationResult::Processing {
                job_id: self
                    .request_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| fallback_job_id.to_string()),
            }),
            "failed" | "error" => Ok(GenerationResult::Failed {
                reason: self.error.unwrap_or_else(|| "generation failed".into()),
            }),
            other => Err(ServiceError::InvalidResponse(format!(
                "unknown generation status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, alias = "previewUrl")]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn into_status(self) -> Result<JobStatus, ServiceError> {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "succeeded" | "complete" => match self.preview_url {
                Some(preview_url) if !preview_url.trim().is_empty() => {
                    Ok(JobStatus::Succeeded { preview_url })
                }
                _ => Ok(JobStatus::Failed {
                    reason: "job finished without preview url".into(),
                }),
            },
            "processing" | "pending" | "starting" => Ok(JobStatus::Processing),
            "failed" | "error" => Ok(JobStatus::Failed {
                reason: self.error.unwrap_or_else(|| "generation failed".into()),
            }),
            other => Err(ServiceError::InvalidResponse(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

#[cfg(feature = "preview-http")]
pub struct HttpGenerationService {
    client: reqwest::Client,
    service_url: String,
    bearer_token: Option<String>,
}

#[cfg(feature = "preview-http")]
impl HttpGenerationService {
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

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[cfg(feature = "preview-http")]
#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ServiceError> {
        let url = build_service_endpoint(&self.service_url, "generate")?;
        let payload = GeneratePayload {
            image: request.source_image.uri(),
            style_name: &request.style.name,
            request_id: &request.request_id,
            aspect_ratio: request.aspect_ratio.as_str(),
        };
        let response = self
            .authorize(self.client.post(url).json(&payload))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ServiceError::UnexpectedStatus(response.status()));
        }
        let body = response.json::<GenerateResponse>().await?;
        body.into_result(&request.request_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, ServiceError> {
        let url = status_endpoint(&self.service_url, job_id)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::UnexpectedStatus(response.status()));
        }
        let body = response.json::<StatusResponse>().await?;
        body.into_status()
    }
}

pub(crate) fn build_service_endpoint(base: &str, path: &str) -> Result<Url, ServiceError> {
    if base.trim().is_empty() {
        return Err(ServiceError::InvalidServiceUrl);
    }

    let mut url = Url::parse(base.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.join(path)?)
}

/// `{base}/status/{job_id}` with the id kept as one escaped path segment.
pub(crate) fn status_endpoint(base: &str, job_id: &str) -> Result<Url, ServiceError> {
    let mut url = build_service_endpoint(base, "status")?;
    url.path_segments_mut()
        .map_err(|_| ServiceError::InvalidServiceUrl)?
        .push(job_id);
    Ok(url)
}

/// Capped linear backoff between status polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub base: Duration,
    pub step: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_POLL_BASE_MS),
            step: Duration::from_millis(DEFAULT_POLL_STEP_MS),
            cap: Duration::from_millis(DEFAULT_POLL_CAP_MS),
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    /// Wait before poll number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let grown = self.base.saturating_add(self.step.saturating_mul(attempt));
        grown.min(self.cap)
    }
}

/// Drives a generation request to a final preview url.
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
    poll: PollPolicy,
}

impl GenerationClient {
    pub fn new(service: Arc<dyn GenerationService>, poll: PollPolicy) -> Self {
        Self { service, poll }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    pub async fn generate(&self, request: &GenerationRequest) -> PreviewResult<GenerationResult> {
        if request.style.is_original() {
            return Ok(GenerationResult::Complete {
                preview_url: request.source_image.uri().to_string(),
            });
        }
        info!(
            style_id = request.style.id,
            request_id = %request.request_id,
            aspect_ratio = %request.aspect_ratio,
            "requesting style preview"
        );
        Ok(self.service.generate(request).await?)
    }

    /// Polls until the job settles or the attempt budget runs out.
    pub async fn poll_status(&self, job_id: &str) -> JobStatus {
        for attempt in 0..self.poll.max_attempts {
            sleep(self.poll.delay_for(attempt)).await;
            match self.service.status(job_id).await {
                Ok(JobStatus::Processing) => {
                    debug!(job_id, attempt, "generation still processing");
                }
                Ok(status) => return status,
                Err(err) => {
                    warn!(job_id, attempt, error = %err, "status poll failed");
                }
            }
        }
        warn!(job_id, attempts = self.poll.max_attempts, "generation timed out");
        JobStatus::TimedOut
    }

    /// Generate and, when the service answers asynchronously, poll to completion.
    pub async fn resolve(&self, request: &GenerationRequest) -> PreviewResult<String> {
        match self.generate(request).await? {
            GenerationResult::Complete { preview_url } => Ok(preview_url),
            GenerationResult::Failed { reason } => Err(PreviewError::generation(reason)),
            GenerationResult::Processing { job_id } => match self.poll_status(&job_id).await {
                JobStatus::Succeeded { preview_url } => Ok(preview_url),
                JobStatus::Failed { reason } => Err(PreviewError::generation(reason)),
                JobStatus::TimedOut => Err(PreviewError::Timeout),
                JobStatus::Processing => Err(PreviewError::Timeout),
            },
        }
    }
}
