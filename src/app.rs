//! Process-wide dependency container.
//!
//! Every store, the callback server, the auth hub and the model router are
//! built once here and handed to commands by reference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;

use crate::auth::{
    AuthAdapter, AuthHub, BrowserLauncher, CallbackServer, ClaudeAuth, CodexAuth, GeminiAuth,
    OAuthStateStore, SystemBrowser, TokenStore,
};
use crate::config::Config;
use crate::error::HubResult;
use crate::llm::{ModelConfig, ModelRouter};

pub struct App {
    config: Config,
    dir: PathBuf,
    tokens: Arc<TokenStore>,
    states: OAuthStateStore,
    callbacks: Arc<CallbackServer>,
    auth: Arc<AuthHub>,
    router: ModelRouter,
    sweep: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("dir", &self.dir)
            .field("auth", &self.auth)
            .field("router", &self.router)
            .finish()
    }
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_browser(config, Arc::new(SystemBrowser))
    }

    pub fn with_browser(config: Config, browser: Arc<dyn BrowserLauncher>) -> anyhow::Result<Self> {
        let dir = config.resolve_dir()?;
        let bind = config.server.bind_addr()?;

        let tokens = Arc::new(TokenStore::new(&dir));
        let states = OAuthStateStore::new(&dir);
        let callbacks = Arc::new(CallbackServer::new(bind));

        let adapters: Vec<Arc<dyn AuthAdapter>> = vec![
            Arc::new(ClaudeAuth::new(tokens.clone())),
            Arc::new(CodexAuth::new(tokens.clone())),
            Arc::new(
                GeminiAuth::new(tokens.clone(), states.clone(), callbacks.clone())
                    .with_browser(browser)
                    .with_callback_timeout(config.auth.callback_timeout()),
            ),
        ];
        let auth = Arc::new(AuthHub::new(adapters, tokens.clone()));

        let router = ModelRouter::new(auth.clone())
            .with_options(config.router.route_options())
            .with_fallback_chain(&config.models.fallback_models)
            .with_model(&config.models.default_model)
            .with_context(|| {
                format!(
                    "Invalid default_model '{}' in config",
                    config.models.default_model
                )
            })?
            .with_sampling(config.models.temperature, config.models.max_tokens);

        tracing::debug!(dir = %dir.display(), model = %router.current_model().id(), "App initialised");
        Ok(Self {
            config,
            dir,
            tokens,
            states,
            callbacks,
            auth,
            router,
            sweep: None,
        })
    }

    /// Periodically drop expired OAuth states. Needs a running runtime.
    pub fn spawn_state_sweep(&mut self) {
        if self.sweep.is_none() {
            let every = self.config.auth.state_sweep_interval();
            self.sweep = Some(self.states.spawn_sweep(every));
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.dir
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn states(&self) -> &OAuthStateStore {
        &self.states
    }

    pub fn callbacks(&self) -> &Arc<CallbackServer> {
        &self.callbacks
    }

    pub fn auth(&self) -> &Arc<AuthHub> {
        &self.auth
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Switch the current model for this process only.
    pub async fn select_model(&mut self, id: &str) -> HubResult<ModelConfig> {
        self.router.set_model(id).await
    }

    /// Switch the current model and persist it as the configured default.
    /// The router is left unchanged if the config cannot be written.
    pub async fn set_default_model(&mut self, id: &str) -> anyhow::Result<ModelConfig> {
        let previous = self.router.current_model().clone();
        let selected = self.router.set_model(id).await?;

        let mut config = self.config.clone();
        config.models.default_model = selected.id();
        if let Err(e) = config.save() {
            self.router.restore_model(previous);
            return Err(e.context("Failed to save config"));
        }
        self.config = config;
        Ok(selected)
    }

    /// Stop background work started by this container.
    pub async fn shutdown(&mut self) {
        if let Some(sweep) = self.sweep.take() {
            sweep.abort();
        }
        self.callbacks.stop().await;
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(sweep) = self.sweep.take() {
            sweep.abort();
        }
    }
}
