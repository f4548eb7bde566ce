//! Types shared by the auth adapters and the hub.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::storage::CredentialKind;
use crate::error::HubError;

/// `expiresAt` sentinel for credentials that never expire (JS `MAX_SAFE_INTEGER`).
pub const NEVER_EXPIRES: i64 = 9_007_199_254_740_991;

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Providers the hub can authenticate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProviderName {
    Claude,
    Codex,
    Gemini,
}

impl AuthProviderName {
    /// All providers, in the order batch operations visit them.
    pub const fn all() -> &'static [AuthProviderName] {
        &[
            AuthProviderName::Claude,
            AuthProviderName::Codex,
            AuthProviderName::Gemini,
        ]
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            AuthProviderName::Claude => "claude",
            AuthProviderName::Codex => "codex",
            AuthProviderName::Gemini => "gemini",
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            AuthProviderName::Claude => "Claude (Anthropic)",
            AuthProviderName::Codex => "Codex (OpenAI)",
            AuthProviderName::Gemini => "Gemini (Google)",
        }
    }

    /// Environment variable consulted for a non-interactive API key.
    pub const fn env_var_name(&self) -> &'static str {
        match self {
            AuthProviderName::Claude => "ANTHROPIC_API_KEY",
            AuthProviderName::Codex => "OPENAI_API_KEY",
            AuthProviderName::Gemini => "GOOGLE_API_KEY",
        }
    }

    /// The CLI invocation that logs into this provider.
    pub fn login_command(&self) -> String {
        format!("supercoin auth login --{}", self.as_str())
    }
}

impl fmt::Display for AuthProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProviderName {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            other => Err(HubError::Validation(format!(
                "Unknown auth provider: {}",
                other
            ))),
        }
    }
}

/// Reads a secret from the user. Implemented by the terminal layer.
pub trait SecretPrompt: Send + Sync {
    /// Returns `Ok(None)` when the user cancels.
    fn prompt_secret(&self, message: &str) -> anyhow::Result<Option<String>>;
}

/// Opens an authorization URL for the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Launches the OS default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        use anyhow::Context;
        open::that(url).context("Failed to open browser")
    }
}

/// Options for a login attempt.
#[derive(Clone, Default)]
pub struct LoginOptions {
    /// Key supplied directly (takes priority over env and prompt).
    pub api_key: Option<String>,
    /// Whether the adapter may prompt the user.
    pub interactive: bool,
    /// Account to store the credential under.
    pub account_id: Option<String>,
    /// Prefer the OAuth flow on providers that support it.
    pub use_oauth: bool,
    /// Prompt used for interactive key entry.
    pub prompt: Option<Arc<dyn SecretPrompt>>,
}

impl fmt::Debug for LoginOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("interactive", &self.interactive)
            .field("account_id", &self.account_id)
            .field("use_oauth", &self.use_oauth)
            .finish()
    }
}

impl LoginOptions {
    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }
}

/// Outcome of one provider's login, refresh or logout in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub provider: AuthProviderName,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl AuthResult {
    pub fn ok(provider: AuthProviderName, account_id: Option<String>) -> Self {
        Self {
            provider,
            success: true,
            error: None,
            hint: None,
            account_id,
        }
    }

    pub fn failed(provider: AuthProviderName, account_id: Option<String>, err: &HubError) -> Self {
        Self {
            provider,
            success: false,
            error: Some(err.to_string()),
            hint: err.remediation(),
            account_id,
        }
    }
}

/// One row of `auth status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub provider: AuthProviderName,
    pub display_name: String,
    pub authenticated: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<CredentialKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub needs_refresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub account_count: usize,
}
