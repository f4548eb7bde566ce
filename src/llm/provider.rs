//! The `LlmProvider` trait and typed completion errors.
//!
//! Providers classify failures into [`ProviderError`] variants from the HTTP
//! status and the upstream error type. The router decides whether to retry
//! and fall back using [`ProviderError::is_retryable`] alone.

use async_trait::async_trait;
use std::time::Duration;

use super::catalog::{self, ModelDefinition};
use super::{CompletionRequest, CompletionResponse, ModelConfig, ModelProviderName};

/// A completion backend.
///
/// Catalog lookups default to the static table for [`name`](Self::name).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> ModelProviderName;

    fn display_name(&self) -> &'static str {
        self.name().display_name()
    }

    fn models(&self) -> &'static [ModelDefinition] {
        catalog::models_for(self.name())
    }

    fn is_valid_model(&self, model: &str) -> bool {
        self.model_info(model).is_some()
    }

    fn model_info(&self, model: &str) -> Option<&'static ModelDefinition> {
        self.models().iter().find(|m| m.id == model)
    }

    /// Send one non-streaming completion request authenticated with `token`.
    async fn complete(
        &self,
        request: &CompletionRequest,
        config: &ModelConfig,
        token: &str,
    ) -> ProviderResult<CompletionResponse>;
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur during provider operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Provider is not configured (missing credential, unknown model, etc.)
    NotConfigured(String),

    /// Authentication failed
    AuthenticationFailed(String),

    /// Rate limit exceeded
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The model is temporarily overloaded
    Overloaded(String),

    /// Upstream 5xx
    ServerError { status: u16, message: String },

    /// The attempt did not finish in time
    Timeout(String),

    /// Network or connection error
    NetworkError(String),

    /// API returned a non-retryable error
    ApiError { status: u16, message: String },

    /// Invalid request (bad parameters, etc.)
    InvalidRequest(String),

    /// Provider-specific error
    Other(String),
}

impl ProviderError {
    /// Rate limits, overload, server errors and timeouts are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Overloaded(_) | Self::ServerError { .. } | Self::Timeout(_)
        )
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured(msg) => write!(f, "Provider not configured: {}", msg),
            Self::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            Self::RateLimited { message, retry_after } => {
                if let Some(duration) = retry_after {
                    write!(f, "Rate limited: {} (retry after {:?})", message, duration)
                } else {
                    write!(f, "Rate limited: {}", message)
                }
            }
            Self::Overloaded(msg) => write!(f, "Model overloaded: {}", msg),
            Self::ServerError { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            Self::Timeout(msg) => write!(f, "Timed out: {}", msg),
            Self::NetworkError(msg) => write!(f, "Network error: {}", msg),
            Self::ApiError { status, message } => {
                write!(f, "API error ({}): {}", status, message)
            }
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout("Request timed out".to_string())
        } else if err.is_connect() {
            Self::NetworkError(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            Self::Other(format!("Malformed response: {}", err))
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

/// Map a non-success response to an error.
///
/// `error_type` is the upstream machine-readable type (`overloaded_error`,
/// `rate_limit_exceeded`, `RESOURCE_EXHAUSTED`, ...) when the body had one.
pub fn classify_status(
    status: u16,
    error_type: Option<&str>,
    message: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    let error_type = error_type.unwrap_or_default();
    match status {
        429 if error_type == "insufficient_quota" => ProviderError::ApiError { status, message },
        429 => ProviderError::RateLimited {
            message,
            retry_after,
        },
        401 | 403 => ProviderError::AuthenticationFailed(message),
        408 => ProviderError::Timeout(message),
        503 | 529 => ProviderError::Overloaded(message),
        _ if error_type == "overloaded_error" => ProviderError::Overloaded(message),
        500..=599 => ProviderError::ServerError { status, message },
        400 | 404 | 413 | 422 => ProviderError::InvalidRequest(message),
        _ => ProviderError::ApiError { status, message },
    }
}

/// Parse a `retry-after` header given in seconds.
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
