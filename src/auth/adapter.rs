//! The per-provider authentication contract.

use async_trait::async_trait;

use super::storage::{TokenData, TokenStore, ALL_ACCOUNTS};
use super::types::{AuthProviderName, LoginOptions};
use crate::error::{HubError, HubResult};

/// Login, logout and token access for one provider.
#[async_trait]
pub trait AuthAdapter: Send + Sync {
    fn name(&self) -> AuthProviderName;

    fn display_name(&self) -> &'static str {
        self.name().display_name()
    }

    /// Obtain and store a credential.
    async fn login(&self, options: &LoginOptions) -> HubResult<TokenData>;

    /// Forget one account, or every account when `account_id` is `None`.
    async fn logout(&self, account_id: Option<&str>) -> HubResult<()>;

    /// A usable access token, or `None` when not logged in.
    async fn get_token(&self, account_id: Option<&str>) -> HubResult<Option<String>>;

    async fn is_authenticated(&self, account_id: Option<&str>) -> bool;

    fn supports_refresh(&self) -> bool {
        false
    }

    async fn refresh(&self, _account_id: Option<&str>) -> HubResult<TokenData> {
        Err(HubError::auth(format!(
            "{} does not support token refresh",
            self.display_name()
        )))
    }
}

/// Where an API key came from. Prompted keys get a format check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeySource {
    Options(String),
    Env(String),
    Prompt(String),
}

impl KeySource {
    pub(crate) fn into_key(self) -> String {
        match self {
            KeySource::Options(key) | KeySource::Env(key) | KeySource::Prompt(key) => key,
        }
    }
}

/// Pick a key from options, then `key_env`, then the interactive prompt.
pub(crate) fn resolve_api_key(
    provider: AuthProviderName,
    options: &LoginOptions,
    key_env: Option<&str>,
    prompt_message: &str,
) -> HubResult<KeySource> {
    if let Some(key) = options.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(KeySource::Options(key.to_string()));
    }

    if let Some(var) = key_env {
        if let Ok(key) = std::env::var(var) {
            let key = key.trim();
            if !key.is_empty() {
                tracing::debug!(provider = %provider, env = var, "Using API key from environment");
                return Ok(KeySource::Env(key.to_string()));
            }
        }
    }

    if options.interactive {
        if let Some(prompt) = options.prompt.as_ref() {
            return match prompt.prompt_secret(prompt_message) {
                Ok(Some(key)) if !key.trim().is_empty() => {
                    Ok(KeySource::Prompt(key.trim().to_string()))
                }
                Ok(_) => Err(HubError::auth("Login cancelled")),
                Err(e) => Err(HubError::auth(format!("Failed to read API key: {}", e))),
            };
        }
    }

    Err(HubError::login_required(
        format!(
            "API key is required (pass --api-key or set {})",
            key_env.unwrap_or(provider.env_var_name())
        ),
        provider,
    ))
}

/// Token lookup shared by the API-key adapters.
pub(crate) fn stored_api_key(
    tokens: &TokenStore,
    provider: AuthProviderName,
    account_id: Option<&str>,
) -> Option<String> {
    tokens
        .retrieve(provider, account_id)
        .filter(|record| record.is_valid())
        .map(|record| record.access_token)
}

/// Delete one account or, for `None`, all of them.
pub(crate) fn delete_accounts(
    tokens: &TokenStore,
    provider: AuthProviderName,
    account_id: Option<&str>,
) -> HubResult<()> {
    let removed = tokens.delete(provider, Some(account_id.unwrap_or(ALL_ACCOUNTS)))?;
    tracing::info!(provider = %provider, removed, "Logged out");
    Ok(())
}
