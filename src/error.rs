//! Error types shared by the auth and routing layers.

use crate::auth::AuthProviderName;
use crate::llm::ProviderError;

/// Result alias used throughout the library.
pub type HubResult<T> = Result<T, HubError>;

/// Errors surfaced by the credential stores, the auth hub and the router.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Bad key or tampered ciphertext.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Missing or invalid credential.
    #[error("{message}")]
    Auth {
        message: String,
        /// Command the user should run to fix this.
        hint: Option<String>,
    },

    /// Non-2xx or transport failure talking to a provider.
    #[error("network error from {url}: {message}")]
    Network { url: String, message: String },

    /// Malformed model id, unknown provider or model.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// OAuth state missing, unknown or mismatched.
    #[error("CSRF check failed: {0}")]
    Csrf(String),

    /// A second login is already waiting on the same provider.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Primary model exhausted its retries and every fallback failed.
    #[error("all fallback models failed (primary error: {primary})")]
    FallbackExhausted { primary: ProviderError },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Auth error without a remediation hint.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            hint: None,
        }
    }

    /// Auth error pointing at the login command for `provider`.
    pub fn login_required(message: impl Into<String>, provider: AuthProviderName) -> Self {
        Self::Auth {
            message: message.into(),
            hint: Some(provider.login_command()),
        }
    }

    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Specific action the user can take, if one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Auth { hint, .. } => hint.clone(),
            Self::Crypto(_) => Some(
                "Stored credentials could not be decrypted. Run: supercoin auth login".to_string(),
            ),
            Self::Csrf(_) => Some("Start the login again: supercoin auth login".to_string()),
            Self::Conflict(_) => {
                Some("Finish or wait out the login already in progress".to_string())
            }
            Self::Validation(_) => Some("List valid models with: supercoin models list".to_string()),
            Self::Provider(err) | Self::FallbackExhausted { primary: err } => {
                if matches!(err, ProviderError::AuthenticationFailed(_)) {
                    Some("Check your credentials with: supercoin auth status".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_timeout() {
            Self::Timeout(format!("request to {} timed out", url))
        } else {
            Self::network(url, err.to_string())
        }
    }
}
