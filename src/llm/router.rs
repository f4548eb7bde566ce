//! Model selection, retry and fallback.
//!
//! The router owns the current model and the fallback chain. A request goes
//! to the current model with bounded exponential backoff between attempts.
//! When the primary model is exhausted and its last error is retryable, each
//! fallback model is tried once, in order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::catalog::{resolve_alias, ModelInfo, DEFAULT_FALLBACK_MODELS, DEFAULT_MODEL};
use super::provider::{LlmProvider, ProviderError, ProviderResult};
use super::{
    AnthropicClient, CompletionRequest, CompletionResponse, GoogleClient, ModelConfig,
    ModelProviderName, OpenAiClient,
};
use crate::auth::AuthHub;
use crate::error::{HubError, HubResult};

/// Per-call routing knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOptions {
    /// Attempts against the primary model, including the first.
    pub retries: u32,
    /// Deadline for each attempt.
    pub timeout: Duration,
    pub fallback: bool,
    /// Delay before the second attempt; doubles after each failure.
    pub backoff_base: Duration,
    /// Upper bound on any single backoff, including a server `Retry-After`.
    pub max_backoff: Duration,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(60),
            fallback: true,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Split a model id (or alias) into provider and model.
///
/// Aliases only apply to ids without a `/`. Canonical ids must have exactly
/// two non-empty segments.
pub fn parse_model_id(id: &str) -> HubResult<(ModelProviderName, String)> {
    let canonical = resolve_alias(id.trim());
    let (provider, model) = canonical
        .split_once('/')
        .filter(|(p, m)| !p.is_empty() && !m.is_empty() && !m.contains('/'))
        .ok_or_else(|| {
            HubError::Validation(format!(
                "Invalid model id '{}': expected <provider>/<model> or a known alias",
                id
            ))
        })?;
    Ok((provider.parse()?, model.to_string()))
}

/// Wait before the attempt following failure number `attempt` (1-based).
fn backoff_delay(options: &RouteOptions, attempt: u32, err: &ProviderError) -> Duration {
    let mut delay = options
        .backoff_base
        .saturating_mul(1 << (attempt - 1).min(16));
    if let ProviderError::RateLimited {
        retry_after: Some(retry_after),
        ..
    } = err
    {
        delay = delay.max(*retry_after);
    }
    delay.min(options.max_backoff)
}

pub struct ModelRouter {
    providers: HashMap<ModelProviderName, Arc<dyn LlmProvider>>,
    auth: Arc<AuthHub>,
    current: ModelConfig,
    fallback_chain: Vec<String>,
    options: RouteOptions,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("current", &self.current.id())
            .field("fallback_chain", &self.fallback_chain)
            .field("options", &self.options)
            .finish()
    }
}

impl ModelRouter {
    /// Router over the Anthropic, OpenAI and Google clients.
    pub fn new(auth: Arc<AuthHub>) -> Self {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![
            Arc::new(AnthropicClient::new()),
            Arc::new(OpenAiClient::new()),
            Arc::new(GoogleClient::new()),
        ];
        Self::with_providers(auth, providers)
    }

    pub fn with_providers(auth: Arc<AuthHub>, providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let providers = providers.into_iter().map(|p| (p.name(), p)).collect();
        let current = match parse_model_id(DEFAULT_MODEL) {
            Ok((provider, model)) => ModelConfig::new(provider, model),
            Err(_) => ModelConfig::new(ModelProviderName::Anthropic, "claude-sonnet-4-5"),
        };
        Self {
            providers,
            auth,
            current,
            fallback_chain: DEFAULT_FALLBACK_MODELS.iter().map(|s| s.to_string()).collect(),
            options: RouteOptions::default(),
        }
    }

    /// Start from `id` without checking authentication.
    pub fn with_model(mut self, id: &str) -> HubResult<Self> {
        self.current = self.validated_config(id)?;
        Ok(self)
    }

    /// Fallback ids are alias-resolved; invalid entries are dropped.
    pub fn with_fallback_chain<I, S>(mut self, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fallback_chain = chain
            .into_iter()
            .filter_map(|id| match self.validated_config(id.as_ref()) {
                Ok(config) => Some(config.id()),
                Err(e) => {
                    tracing::warn!(id = id.as_ref(), "Ignoring fallback model: {}", e);
                    None
                }
            })
            .collect();
        self
    }

    /// Sampling settings carried by the current model and every fallback.
    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.current.temperature = temperature;
        self.current.max_tokens = max_tokens;
        self
    }

    pub fn with_options(mut self, options: RouteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RouteOptions {
        &self.options
    }

    pub fn current_model(&self) -> &ModelConfig {
        &self.current
    }

    pub fn fallback_chain(&self) -> &[String] {
        &self.fallback_chain
    }

    /// Switch the current model. Nothing changes unless the id parses, the
    /// provider and model exist, and the provider is authenticated.
    pub async fn set_model(&mut self, id: &str) -> HubResult<ModelConfig> {
        let mut config = self.validated_config(id)?;

        let auth_provider = config.provider.auth_provider();
        if !self.auth.is_authenticated(auth_provider, None).await {
            return Err(HubError::login_required(
                format!("Not authenticated with {}", config.provider),
                auth_provider,
            ));
        }

        config.temperature = self.current.temperature;
        config.max_tokens = self.current.max_tokens;
        tracing::info!(from = %self.current.id(), to = %config.id(), "Model switched");
        self.current = config.clone();
        Ok(config)
    }

    /// Put back a model taken from [`current_model`](Self::current_model).
    pub(crate) fn restore_model(&mut self, previous: ModelConfig) {
        tracing::debug!(from = %self.current.id(), to = %previous.id(), "Model restored");
        self.current = previous;
    }

    /// Every registered provider's catalog, keyed by canonical id.
    pub fn list_models(&self) -> Vec<ModelInfo> {
        ModelProviderName::all()
            .iter()
            .filter_map(|name| self.providers.get(name).map(|p| (*name, p)))
            .flat_map(|(name, provider)| {
                provider
                    .models()
                    .iter()
                    .map(move |def| ModelInfo::new(name, def))
            })
            .collect()
    }

    /// Catalog entry for an id or alias.
    pub fn model_info(&self, id: &str) -> Option<ModelInfo> {
        let (provider_name, model) = parse_model_id(id).ok()?;
        let provider = self.providers.get(&provider_name)?;
        provider
            .model_info(&model)
            .map(|def| ModelInfo::new(provider_name, def))
    }

    /// Send `request` to the current model using the router's options.
    pub async fn route(&self, request: &CompletionRequest) -> HubResult<CompletionResponse> {
        self.route_with(request, &self.options).await
    }

    pub async fn route_with(
        &self,
        request: &CompletionRequest,
        options: &RouteOptions,
    ) -> HubResult<CompletionResponse> {
        let primary = &self.current;
        let provider = self.provider(primary.provider)?;
        let token = self.live_token(primary.provider).await?;

        match self
            .complete_with_retry(provider.as_ref(), request, primary, &token, options)
            .await
        {
            Ok(response) => Ok(response),
            Err(err) if options.fallback && err.is_retryable() => {
                tracing::warn!(model = %primary.id(), "Primary model exhausted: {}", err);
                self.try_fallbacks(request, err, options).await
            }
            Err(err) => Err(err.into()),
        }
    }

    fn provider(&self, name: ModelProviderName) -> HubResult<&Arc<dyn LlmProvider>> {
        self.providers
            .get(&name)
            .ok_or_else(|| HubError::Validation(format!("Provider not registered: {}", name)))
    }

    fn validated_config(&self, id: &str) -> HubResult<ModelConfig> {
        let (provider_name, model) = parse_model_id(id)?;
        let provider = self.provider(provider_name)?;
        if !provider.is_valid_model(&model) {
            return Err(HubError::Validation(format!(
                "Unknown model: {}/{}",
                provider_name, model
            )));
        }
        Ok(ModelConfig::new(provider_name, model))
    }

    async fn live_token(&self, provider: ModelProviderName) -> HubResult<String> {
        let auth_provider = provider.auth_provider();
        self.auth
            .get_token(auth_provider, None)
            .await?
            .ok_or_else(|| {
                HubError::login_required(
                    format!("Not authenticated with {}", provider),
                    auth_provider,
                )
            })
    }

    async fn attempt(
        provider: &dyn LlmProvider,
        request: &CompletionRequest,
        config: &ModelConfig,
        token: &str,
        timeout: Duration,
    ) -> ProviderResult<CompletionResponse> {
        match tokio::time::timeout(timeout, provider.complete(request, config, token)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "{} did not respond within {:?}",
                config.id(),
                timeout
            ))),
        }
    }

    async fn complete_with_retry(
        &self,
        provider: &dyn LlmProvider,
        request: &CompletionRequest,
        config: &ModelConfig,
        token: &str,
        options: &RouteOptions,
    ) -> ProviderResult<CompletionResponse> {
        let attempts = options.retries.max(1);
        let mut attempt = 0;
        loop {
            let err = match Self::attempt(provider, request, config, token, options.timeout).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= attempts {
                return Err(err);
            }

            let delay = backoff_delay(options, attempt, &err);
            tracing::debug!(
                model = %config.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after error: {}",
                err
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_fallbacks(
        &self,
        request: &CompletionRequest,
        primary_error: ProviderError,
        options: &RouteOptions,
    ) -> HubResult<CompletionResponse> {
        let primary_id = self.current.id();

        for id in &self.fallback_chain {
            if *id == primary_id {
                continue;
            }
            let Ok((provider_name, model)) = parse_model_id(id) else {
                continue;
            };
            let Some(provider) = self.providers.get(&provider_name) else {
                continue;
            };

            let token = match self.auth.get_token(provider_name.auth_provider(), None).await {
                Ok(Some(token)) => token,
                _ => {
                    tracing::debug!(model = %id, "Skipping unauthenticated fallback");
                    continue;
                }
            };

            let config = ModelConfig {
                provider: provider_name,
                model,
                temperature: self.current.temperature,
                max_tokens: self.current.max_tokens,
            };
            match Self::attempt(provider.as_ref(), request, &config, &token, options.timeout).await {
                Ok(response) => {
                    tracing::info!(from = %primary_id, to = %id, "Fallback model succeeded");
                    return Ok(response);
                }
                Err(e) => tracing::warn!(model = %id, "Fallback model failed: {}", e),
            }
        }

        Err(HubError::FallbackExhausted {
            primary: primary_error,
        })
    }
}
