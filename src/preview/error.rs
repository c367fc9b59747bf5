use reqwest::StatusCode;
use thiserror::Error;

/// Transport-level failures talking to the generation or watermark service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid service url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("service url is empty")]
    InvalidServiceUrl,
}

pub type PreviewResult<T> = Result<T, PreviewError>;

/// Errors surfaced into per-style preview state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreviewError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        attempted_correction: Option<String>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("generation failed: timeout")]
    Timeout,

    #[error("watermark error: {0}")]
    Watermark(String),
}

impl PreviewError {
    pub fn validation(message: impl Into<String>, attempted_correction: Option<String>) -> Self {
        Self::Validation {
            message: message.into(),
            attempted_correction,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn generation(reason: impl Into<String>) -> Self {
        Self::Generation(reason.into())
    }

    pub fn watermark(message: impl Into<String>) -> Self {
        Self::Watermark(message.into())
    }

    /// Network, generation and timeout failures count against the retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Generation(_) | Self::Timeout)
    }

    /// Short machine-facing reason, e.g. `"timeout"`.
    pub fn reason(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::Network(message) => message.clone(),
            Self::Generation(reason) => reason.clone(),
            Self::Timeout => "timeout".to_string(),
            Self::Watermark(message) => message.clone(),
        }
    }
}

impl From<ServiceError> for PreviewError {
    fn from(value: ServiceError) -> Self {
        PreviewError::Network(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(PreviewError::validation("bad", None)
            .to_string()
            .contains("validation error:"));
        assert!(PreviewError::network("down")
            .to_string()
            .contains("network error:"));
        assert_eq!(
            PreviewError::Timeout.to_string(),
            "generation failed: timeout"
        );
        assert_eq!(PreviewError::Timeout.reason(), "timeout");
    }

    #[test]
    fn only_service_failures_are_retryable() {
        assert!(PreviewError::network("x").is_retryable());
        assert!(PreviewError::generation("x").is_retryable());
        assert!(PreviewError::Timeout.is_retryable());
        assert!(!PreviewError::validation("x", Some("1:1".into())).is_retryable());
        assert!(!PreviewError::watermark("x").is_retryable());
    }

    #[test]
    fn service_errors_become_network_errors() {
        let err: PreviewError = ServiceError::InvalidServiceUrl.into();
        assert_eq!(err, PreviewError::network("service url is empty"));
    }
}
