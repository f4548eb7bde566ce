//! Codex (OpenAI) API-key authentication.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;

use super::adapter::{delete_accounts, resolve_api_key, stored_api_key, AuthAdapter, KeySource};
use super::storage::{TokenData, TokenStore};
use super::types::{AuthProviderName, LoginOptions};
use crate::error::{HubError, HubResult};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const KEY_PREFIX: &str = "sk-";

#[derive(Debug, Clone)]
pub struct CodexAuth {
    client: Client,
    tokens: Arc<TokenStore>,
    api_base: String,
    key_env: Option<String>,
}

impl CodexAuth {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self {
            client: Client::new(),
            tokens,
            api_base: OPENAI_API_BASE.to_string(),
            key_env: Some(AuthProviderName::Codex.env_var_name().to_string()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_key_env(mut self, var: Option<&str>) -> Self {
        self.key_env = var.map(str::to_string);
        self
    }

    /// Listing models is the cheapest authenticated call.
    async fn validate_key(&self, api_key: &str) -> HubResult<()> {
        let url = format!("{}/models", self.api_base);
        let response = self.client.get(&url).bearer_auth(api_key).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(HubError::login_required(
                "Invalid API key",
                AuthProviderName::Codex,
            ));
        }
        let body = response.text().await.unwrap_or_default();
        Err(HubError::network(url, format!("status {}: {}", status, body)))
    }
}

#[async_trait]
impl AuthAdapter for CodexAuth {
    fn name(&self) -> AuthProviderName {
        AuthProviderName::Codex
    }

    async fn login(&self, options: &LoginOptions) -> HubResult<TokenData> {
        let source = resolve_api_key(
            self.name(),
            options,
            self.key_env.as_deref(),
            "Enter your OpenAI API key (https://platform.openai.com/api-keys)",
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
