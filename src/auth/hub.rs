//! Fan-out over the provider adapters.
//!
//! Batch operations visit providers one after another and report one
//! [`AuthResult`] per provider; a failure never aborts the rest of the batch.

use std::sync::Arc;

use super::adapter::AuthAdapter;
use super::callback::CallbackServer;
use super::claude::ClaudeAuth;
use super::codex::CodexAuth;
use super::gemini::GeminiAuth;
use super::oauth_state::OAuthStateStore;
use super::storage::TokenStore;
use super::types::{AuthProviderName, AuthResult, AuthStatus, LoginOptions};
use crate::error::{HubError, HubResult};

pub struct AuthHub {
    adapters: Vec<Arc<dyn AuthAdapter>>,
    tokens: Arc<TokenStore>,
}

impl std::fmt::Debug for AuthHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.adapters.iter().map(|a| a.name()).collect();
        f.debug_struct("AuthHub").field("adapters", &names).finish()
    }
}

impl AuthHub {
    /// Hub over an explicit adapter set, visited in the given order.
    pub fn new(adapters: Vec<Arc<dyn AuthAdapter>>, tokens: Arc<TokenStore>) -> Self {
        Self { adapters, tokens }
    }

    /// The Claude, Codex and Gemini adapters with default endpoints.
    pub fn standard(
        tokens: Arc<TokenStore>,
        states: OAuthStateStore,
        callbacks: Arc<CallbackServer>,
    ) -> Self {
        let adapters: Vec<Arc<dyn AuthAdapter>> = vec![
            Arc::new(ClaudeAuth::new(tokens.clone())),
            Arc::new(CodexAuth::new(tokens.clone())),
            Arc::new(GeminiAuth::new(tokens.clone(), states, callbacks)),
        ];
        Self::new(adapters, tokens)
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn adapter(&self, provider: AuthProviderName) -> Option<&Arc<dyn AuthAdapter>> {
        self.adapters.iter().find(|a| a.name() == provider)
    }

    fn require_adapter(&self, provider: AuthProviderName) -> HubResult<&Arc<dyn AuthAdapter>> {
        self.adapter(provider).ok_or_else(|| {
            HubError::Validation(format!("No auth adapter registered for {}", provider))
        })
    }

    fn targets(&self, provider: Option<AuthProviderName>) -> HubResult<Vec<&Arc<dyn AuthAdapter>>> {
        match provider {
            Some(name) => Ok(vec![self.require_adapter(name)?]),
            None => Ok(self.adapters.iter().collect()),
        }
    }

    /// Log into one provider, or every provider in turn.
    pub async fn login(
        &self,
        provider: Option<AuthProviderName>,
        options: &LoginOptions,
    ) -> HubResult<Vec<AuthResult>> {
        let mut results = Vec::new();
        for adapter in self.targets(provider)? {
            let result = match adapter.login(options).await {
                Ok(record) => AuthResult::ok(adapter.name(), record.account_id),
                Err(e) => {
                    tracing::warn!(provider = %adapter.name(), "Login failed: {}", e);
                    AuthResult::failed(adapter.name(), options.account_id.clone(), &e)
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// One row per stored account; providers without accounts get a single
    /// unauthenticated row.
    pub async fn status(&self) -> Vec<AuthStatus> {
        let mut rows = Vec::new();
        for adapter in &self.adapters {
            let provider = adapter.name();
            let records = self.tokens.retrieve_all(provider);

            if records.is_empty() {
                rows.push(AuthStatus {
                    provider,
                    display_name: adapter.display_name().to_string(),
                    authenticated: false,
                    kind: None,
                    expires_at: None,
                    needs_refresh: false,
                    account_id: None,
                    account_count: 0,
                });
                continue;
            }

            let account_count = records.len();
            for record in records {
                rows.push(AuthStatus {
                    provider,
                    display_name: adapter.display_name().to_string(),
                    authenticated: record.is_valid(),
                    kind: Some(record.kind),
                    expires_at: Some(record.expires_at),
                    needs_refresh: record.needs_refresh(),
                    account_id: record.account_id,
                    account_count,
                });
            }
        }
        rows
    }

    /// Refresh one provider or all. Adapters without refresh report success.
    pub async fn refresh(
        &self,
        provider: Option<AuthProviderName>,
        account_id: Option<&str>,
    ) -> HubResult<Vec<AuthResult>> {
        let mut results = Vec::new();
        for adapter in self.targets(provider)? {
            let owned_account = account_id.map(str::to_string);
            if !adapter.supports_refresh() {
                results.push(AuthResult::ok(adapter.name(), owned_account));
                continue;
            }

            let result = match adapter.refresh(account_id).await {
                Ok(record) => AuthResult::ok(adapter.name(), record.account_id),
                Err(e) => {
                    tracing::warn!(provider = %adapter.name(), "Refresh failed: {}", e);
                    AuthResult::failed(adapter.name(), owned_account, &e)
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Log out of one provider or all. `account_id` of `None` clears every account.
    pub async fn logout(
        &self,
        provider: Option<AuthProviderName>,
        account_id: Option<&str>,
    ) -> HubResult<Vec<AuthResult>> {
        let mut results = Vec::new();
        for adapter in self.targets(provider)? {
            let owned_account = account_id.map(str::to_string);
            let result = match adapter.logout(account_id).await {
                Ok(()) => AuthResult::ok(adapter.name(), owned_account),
                Err(e) => {
                    tracing::warn!(provider = %adapter.name(), "Logout failed: {}", e);
                    AuthResult::failed(adapter.name(), owned_account, &e)
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    pub async fn get_token(
        &self,
        provider: AuthProviderName,
        account_id: Option<&str>,
    ) -> HubResult<Option<String>> {
        self.require_adapter(provider)?.get_token(account_id).await
    }

    pub async fn is_authenticated(&self, provider: AuthProviderName, account_id: Option<&str>) -> bool {
        match self.adapter(provider) {
            Some(adapter) => adapter.is_authenticated(account_id).await,
            None => false,
        }
    }
}

/// Auth provider that holds credentials for a model provider, if any.
pub fn map_model_provider_to_auth(model_provider: &str) -> Option<AuthProviderName> {
    match model_provider {
        "anthropic" => Some(AuthProviderName::Claude),
        "openai" => Some(AuthProviderName::Codex),
        "google" => Some(AuthProviderName::Gemini),
        _ => None,
    }
}
