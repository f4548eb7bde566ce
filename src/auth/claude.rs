//! Claude (Anthropic) API-key authentication.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;

use super::adapter::{delete_accounts, resolve_api_key, stored_api_key, AuthAdapter, KeySource};
use super::storage::{TokenData, TokenStore};
use super::types::{AuthProviderName, LoginOptions};
use crate::error::{HubError, HubResult};

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Cheapest model; the probe only needs an authenticated round trip.
const PROBE_MODEL: &str = "claude-3-haiku-20240307";

const KEY_PREFIX: &str = "sk-ant-";

#[derive(Debug, Clone)]
pub struct ClaudeAuth {
    client: Client,
    tokens: Arc<TokenStore>,
    api_base: String,
    key_env: Option<String>,
}

impl ClaudeAuth {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self {
            client: Client::new(),
            tokens,
            api_base: ANTHROPIC_API_BASE.to_string(),
            key_env: Some(AuthProviderName::Claude.env_var_name().to_string()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Environment variable read for a key; `None` disables the lookup.
    pub fn with_key_env(mut self, var: Option<&str>) -> Self {
        self.key_env = var.map(str::to_string);
        self
    }

    /// A key is accepted unless the probe is rejected with 401.
    async fn validate_key(&self, api_key: &str) -> HubResult<()> {
        let url = format!("{}/messages", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": PROBE_MODEL,
                "max_tokens": 1,
                "messages": [{ "role": "user", "content": "test" }],
            }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(HubError::login_required(
                "Invalid API key",
                AuthProviderName::Claude,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthAdapter for ClaudeAuth {
    fn name(&self) -> AuthProviderName {
        AuthProviderName::Claude
    }

    async fn login(&self, options: &LoginOptions) -> HubResult<TokenData> {
        let source = resolve_api_key(
            self.name(),
            options,
            self.key_env.as_deref(),
            "Enter your Anthropic API key (https://console.anthropic.com/settings/keys)",
        )?;
        if let KeySource::Prompt(key) = &source {
            if !key.starts_with(KEY_PREFIX) {
                return Err(HubError::Validation(format!(
                    "Invalid API key format (should start with {})",
                    KEY_PREFIX
                )));
            }
        }
        let api_key = source.into_key();

        self.validate_key(&api_key).await?;

        let record = TokenData::api_key(self.name(), api_key, options.account_id.clone());
        self.tokens.store(self.name(), &record)?;
        tracing::info!(provider = %self.name(), "Logged in with API key");
        Ok(record)
    }

    async fn logout(&self, account_id: Option<&str>) -> HubResult<()> {
        delete_accounts(&self.tokens, self.name(), account_id)
    }

    async fn get_token(&self, account_id: Option<&str>) -> HubResult<Option<String>> {
        Ok(stored_api_key(&self.tokens, self.name(), account_id))
    }

    async fn is_authenticated(&self, account_id: Option<&str>) -> bool {
        self.tokens.is_valid(self.name(), account_id)
    }
}
