//! Gemini (Google) authentication: API key or OAuth authorization code + PKCE.
//!
//! The OAuth path runs the local callback server, opens the consent page and
//! waits for the redirect, then exchanges the code for tokens. Google access
//! tokens last an hour; [`GeminiAuth::get_token`] refreshes them inside the
//! refresh window.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::adapter::{delete_accounts, resolve_api_key, AuthAdapter};
use super::callback::{CallbackServer, DEFAULT_CALLBACK_TIMEOUT};
use super::oauth_state::{generate_state, OAuthAttempt, OAuthStateStore, PkcePair};
use super::storage::{CredentialKind, TokenData, TokenStore};
use super::types::{now_ms, AuthProviderName, BrowserLauncher, LoginOptions, SystemBrowser};
use crate::error::{HubError, HubResult};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_SCOPE: &str = "https://www.googleapis.com/auth/generative-language";

const CLIENT_ID_ENV: &str = "GOOGLE_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "GOOGLE_CLIENT_SECRET";

/// OAuth client registration and endpoints.
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub scopes: Vec<String>,
}

impl Default for GoogleOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            revoke_url: GOOGLE_REVOKE_URL.to_string(),
            scopes: vec![GEMINI_SCOPE.to_string()],
        }
    }
}

impl GoogleOAuthConfig {
    /// Client credentials from `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            client_id: var(CLIENT_ID_ENV),
            client_secret: var(CLIENT_SECRET_ENV),
            ..Self::default()
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = client_secret;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.client_id.is_some()
    }

    /// Consent page URL for one attempt.
    pub fn authorization_url(&self, client_id: &str, redirect_uri: &str, challenge: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scopes.join(" ")),
            challenge,
            state
        )
    }

    fn client_id(&self) -> HubResult<&str> {
        self.client_id.as_deref().ok_or_else(|| HubError::Auth {
            message: "Google OAuth is not configured".to_string(),
            hint: Some(format!(
                "Set {} (and {}) or log in with an API key: supercoin auth login --gemini --api-key <key>",
                CLIENT_ID_ENV, CLIENT_SECRET_ENV
            )),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

pub struct GeminiAuth {
    client: Client,
    tokens: Arc<TokenStore>,
    states: OAuthStateStore,
    callbacks: Arc<CallbackServer>,
    oauth: GoogleOAuthConfig,
    browser: Arc<dyn BrowserLauncher>,
    callback_timeout: Duration,
    api_base: String,
    key_env: Option<String>,
}

impl std::fmt::Debug for GeminiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAuth")
            .field("oauth_configured", &self.oauth.is_configured())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GeminiAuth {
    pub fn new(
        tokens: Arc<TokenStore>,
        states: OAuthStateStore,
        callbacks: Arc<CallbackServer>,
    ) -> Self {
        Self {
            client: Client::new(),
            tokens,
            states,
            callbacks,
            oauth: GoogleOAuthConfig::from_env(),
            browser: Arc::new(SystemBrowser),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            api_base: GEMINI_API_BASE.to_string(),
            key_env: Some(AuthProviderName::Gemini.env_var_name().to_string()),
        }
    }

    pub fn with_oauth_config(mut self, oauth: GoogleOAuthConfig) -> Self {
        self.oauth = oauth;
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_key_env(mut self, var: Option<&str>) -> Self {
        self.key_env = var.map(str::to_string);
        self
    }

    async fn login_with_api_key(&self, api_key: String, account_id: Option<String>) -> HubResult<TokenData> {
        self.validate_key(&api_key).await?;

        let record = TokenData::api_key(AuthProviderName::Gemini, api_key, account_id);
        self.tokens.store(AuthProviderName::Gemini, &record)?;
        tracing::info!(provider = "gemini", "Logged in with API key");
        Ok(record)
    }

    async fn validate_key(&self, api_key: &str) -> HubResult<()> {
        let url = format!("{}/models", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[("key", api_key)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(HubError::login_required(
                "Invalid API key",
                AuthProviderName::Gemini,
            ));
        }
        Err(HubError::network(url, format!("status {}", status)))
    }

    async fn login_with_oauth(&self, account_id: Option<String>) -> HubResult<TokenData> {
        let client_id = self.oauth.client_id()?.to_string();
        let pkce = PkcePair::generate();
        let state = generate_state();

        self.states.store(OAuthAttempt::new(
            AuthProviderName::Gemini,
            &state,
            &pkce.verifier,
            account_id,
        ))?;

        let result = self.complete_oauth(&client_id, &pkce, &state).await;
        if result.is_err() {
            self.states.delete(&state);
        }
        result
    }

    async fn complete_oauth(&self, client_id: &str, pkce: &PkcePair, state: &str) -> HubResult<TokenData> {
        let addr = self.callbacks.ensure_running().await?;
        let redirect_uri = format!("http://{}/callback/{}", addr, AuthProviderName::Gemini);

        // Register before the browser opens so a fast redirect is not lost.
        let pending = self
            .callbacks
            .registry()
            .register(AuthProviderName::Gemini, state)?;

        let auth_url = self
            .oauth
            .authorization_url(client_id, &redirect_uri, &pkce.challenge, state);
        if let Err(e) = self.browser.open(&auth_url) {
            tracing::warn!("Failed to open browser: {:#}", e);
        }

        let callback = pending.wait(self.callback_timeout).await?;

        let attempt = self
            .states
            .retrieve(&callback.state)
            .filter(|attempt| attempt.provider == AuthProviderName::Gemini && attempt.state == state)
            .ok_or_else(|| HubError::Csrf("unknown or expired OAuth state".to_string()))?;

        let response = self
            .token_request(&[
                ("client_id", client_id),
                ("code", callback.code.as_str()),
                ("code_verifier", attempt.code_verifier.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .await?;
        self.states.delete(&callback.state);

        let scopes = response
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| self.oauth.scopes.clone());
        let record = TokenData::oauth(
            AuthProviderName::Gemini,
            response.access_token,
            response.refresh_token,
            expiry_from_now(response.expires_in),
        )
        .with_scopes(scopes)
        .with_account(attempt.account_id);

        self.tokens.store(AuthProviderName::Gemini, &record)?;
        tracing::info!(provider = "gemini", account = ?record.account_id, "Logged in with OAuth");
        Ok(record)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> HubResult<TokenResponse> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        if let Some(secret) = self.oauth.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(&self.oauth.token_url)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST && body.contains("invalid_grant") {
                return Err(HubError::login_required(
                    "Google rejected the authorization grant",
                    AuthProviderName::Gemini,
                ));
            }
            return Err(HubError::network(
                self.oauth.token_url.clone(),
                format!("token request failed ({}): {}", status, body),
            ));
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    /// Best effort; logout proceeds whatever the outcome.
    async fn revoke(&self, token: &str) {
        let result = self
            .client
            .post(&self.oauth.revoke_url)
            .form(&[("token", token)])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Revoked Google token");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Token revocation rejected");
            }
            Err(e) => tracing::warn!("Token revocation failed: {}", e),
        }
    }
}

fn expiry_from_now(expires_in_secs: i64) -> i64 {
    now_ms().saturating_add(expires_in_secs.saturating_mul(1000))
}

#[async_trait]
impl AuthAdapter for GeminiAuth {
    fn name(&self) -> AuthProviderName {
        AuthProviderName::Gemini
    }

    async fn login(&self, options: &LoginOptions) -> HubResult<TokenData> {
        if options.use_oauth {
            return self.login_with_oauth(options.account_id.clone()).await;
        }

        let prompt_message = "Enter your Google AI API key (https://aistudio.google.com/apikey)";
        let quiet = LoginOptions {
            interactive: false,
            ..options.clone()
        };
        let api_key = match resolve_api_key(self.name(), &quiet, self.key_env.as_deref(), prompt_message) {
            Ok(source) => source.into_key(),
            Err(_) if options.interactive && self.oauth.is_configured() => {
                return self.login_with_oauth(options.account_id.clone()).await;
            }
            Err(_) => resolve_api_key(self.name(), options, self.key_env.as_deref(), prompt_message)?
                .into_key(),
        };

        self.login_with_api_key(api_key, options.account_id.clone()).await
    }

    async fn logout(&self, account_id: Option<&str>) -> HubResult<()> {
        let records: Vec<TokenData> = match account_id {
            Some(account) => self
                .tokens
                .retrieve(self.name(), Some(account))
                .into_iter()
                .collect(),
            None => self.tokens.retrieve_all(self.name()),
        };

        for record in records.iter().filter(|r| r.kind == CredentialKind::OAuth) {
            self.revoke(&record.access_token).await;
        }
        self.states.delete_by_provider(self.name());

        delete_accounts(&self.tokens, self.name(), account_id)
    }

    async fn get_token(&self, account_id: Option<&str>) -> HubResult<Option<String>> {
        let Some(record) = self.tokens.retrieve(self.name(), account_id) else {
            return Ok(None);
        };

        if record.kind == CredentialKind::OAuth
            && record.needs_refresh()
            && record.refresh_token.is_some()
        {
            match self.refresh(account_id).await {
                Ok(updated) => return Ok(Some(updated.access_token)),
                Err(e) => {
                    tracing::warn!(provider = "gemini", "Automatic token refresh failed: {}", e);
                }
            }
        }

        Ok(record.is_valid().then_some(record.access_token))
    }

    async fn is_authenticated(&self, account_id: Option<&str>) -> bool {
        self.tokens.is_valid(self.name(), account_id)
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, account_id: Option<&str>) -> HubResult<TokenData> {
        let current = self.tokens.retrieve(self.name(), account_id).ok_or_else(|| {
            HubError::login_required("Not logged in to Gemini", AuthProviderName::Gemini)
        })?;
        let refresh_token = current.refresh_token.clone().ok_or_else(|| {
            HubError::login_required("No refresh token available", AuthProviderName::Gemini)
        })?;
        let client_id = self.oauth.client_id()?.to_string();

        let response = self
            .token_request(&[
                ("client_id", client_id.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        let updated = TokenData {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(current.refresh_token.clone()),
            expires_at: expiry_from_now(response.expires_in),
            ..current
        };
        self.tokens.store(self.name(), &updated)?;
        tracing::info!(provider = "gemini", account = ?updated.account_id, "Token refreshed");
        Ok(updated)
    }
}
