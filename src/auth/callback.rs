//! Local HTTP receiver for OAuth browser redirects.
//!
//! A login flow registers a [`PendingCallback`] for its provider and expected
//! `state` before opening the browser. The `/callback/:provider` handler
//! resolves that wait exactly once. Only one wait per provider may be pending.

use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::types::AuthProviderName;
use crate::error::{HubError, HubResult};

/// Default time a login waits for the browser redirect.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Query parameters of a provider redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Authorization code delivered to a waiting login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: String,
}

#[derive(Debug)]
enum CallbackOutcome {
    Success(AuthorizationCode),
    Failure(String),
}

struct PendingEntry {
    id: u64,
    expected_state: String,
    sender: oneshot::Sender<CallbackOutcome>,
}

/// Pending waits keyed by provider.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    pending: Arc<Mutex<HashMap<AuthProviderName, PendingEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<_> = self.lock().keys().copied().collect();
        f.debug_struct("CallbackRegistry")
            .field("pending", &providers)
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the single wait for `provider`. Fails with
    /// [`HubError::Conflict`] if one is already pending.
    pub fn register(
        &self,
        provider: AuthProviderName,
        expected_state: impl Into<String>,
    ) -> HubResult<PendingCallback> {
        let mut pending = self.lock();
        if pending.contains_key(&provider) {
            return Err(HubError::Conflict(format!(
                "an OAuth login for {} is already in progress",
                provider
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        pending.insert(
            provider,
            PendingEntry {
                id,
                expected_state: expected_state.into(),
                sender,
            },
        );

        Ok(PendingCallback {
            registry: self.clone(),
            provider,
            id,
            receiver: Some(receiver),
        })
    }

    pub fn is_pending(&self, provider: AuthProviderName) -> bool {
        self.lock().contains_key(&provider)
    }

    /// Route one redirect to its waiting login and pick the page to show.
    pub fn dispatch(&self, provider: &str, params: CallbackParams) -> CallbackPage {
        let provider_name: AuthProviderName = match provider.parse() {
            Ok(name) => name,
            Err(_) => return CallbackPage::NoPendingLogin,
        };

        let Some(state) = params.state.filter(|s| !s.is_empty()) else {
            tracing::warn!(provider = %provider_name, "OAuth callback without state rejected");
            return CallbackPage::Csrf;
        };

        let entry = {
            let mut pending = self.lock();
            match pending.get(&provider_name) {
                None => return CallbackPage::NoPendingLogin,
                Some(entry) if entry.expected_state != state => {
                    tracing::warn!(provider = %provider_name, "OAuth callback state mismatch");
                    return CallbackPage::Csrf;
                }
                Some(_) => pending.remove(&provider_name),
            }
        };
        let Some(entry) = entry else {
            return CallbackPage::NoPendingLogin;
        };

        if let Some(error) = params.error {
            let message = params.error_description.unwrap_or(error);
            let _ = entry.sender.send(CallbackOutcome::Failure(message.clone()));
            return CallbackPage::Failed {
                provider: provider_name,
                message,
            };
        }

        match params.code.filter(|c| !c.is_empty()) {
            None => {
                let _ = entry.sender.send(CallbackOutcome::Failure(
                    "authorization code was not received".to_string(),
                ));
                CallbackPage::MissingCode
            }
            Some(code) => {
                let _ = entry
                    .sender
                    .send(CallbackOutcome::Success(AuthorizationCode { code, state }));
                tracing::debug!(provider = %provider_name, "OAuth callback delivered");
                CallbackPage::Success {
                    provider: provider_name,
                }
            }
        }
    }

    fn deregister(&self, provider: AuthProviderName, id: u64) {
        let mut pending = self.lock();
        if pending.get(&provider).is_some_and(|entry| entry.id == id) {
            pending.remove(&provider);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AuthProviderName, PendingEntry>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A registered wait. Dropping it releases the provider slot.
pub struct PendingCallback {
    registry: CallbackRegistry,
    provider: AuthProviderName,
    id: u64,
    receiver: Option<oneshot::Receiver<CallbackOutcome>>,
}

impl PendingCallback {
    pub fn provider(&self) -> AuthProviderName {
        self.provider
    }

    /// Wait for the redirect, failing with [`HubError::Timeout`] after `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> HubResult<AuthorizationCode> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| HubError::auth("callback already consumed"))?;

        match tokio::time::timeout(timeout, receiver).await {
            Err(_) => Err(HubError::Timeout(format!(
                "OAuth callback timeout for {}",
                self.provider
            ))),
            Ok(Err(_)) => Err(HubError::auth("OAuth callback channel closed")),
            Ok(Ok(CallbackOutcome::Failure(message))) => Err(HubError::login_required(
                format!("OAuth authorization failed: {}", message),
                self.provider,
            )),
            Ok(Ok(CallbackOutcome::Success(code))) => Ok(code),
        }
    }
}

impl Drop for PendingCallback {
    fn drop(&mut self) {
        self.registry.deregister(self.provider, self.id);
    }
}

/// Page served back to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPage {
    Success {
        provider: AuthProviderName,
    },
    Failed {
        provider: AuthProviderName,
        message: String,
    },
    MissingCode,
    Csrf,
    NoPendingLogin,
}

impl CallbackPage {
    pub fn is_success(&self) -> bool {
        matches!(self, CallbackPage::Success { .. })
    }

    pub fn render(&self) -> String {
        match self {
            CallbackPage::Success { provider } => page(
                "Authentication Successful",
                "#4ade80",
                &format!(
                    "<p>Provider: <strong>{}</strong></p><p>You can close this window.</p>",
                    escape_html(provider.display_name())
                ),
            ),
            CallbackPage::Failed { provider, message } => page(
                "Authentication Failed",
                "#ff6b6b",
                &format!(
                    "<p>Provider: <strong>{}</strong></p><p class=\"error\">{}</p><p>You can close this window.</p>",
                    escape_html(provider.display_name()),
                    escape_html(message)
                ),
            ),
            CallbackPage::MissingCode => page(
                "Missing Authorization Code",
                "#ff6b6b",
                "<p>The authorization code was not received.</p>",
            ),
            CallbackPage::Csrf => page(
                "Security Check Failed",
                "#ff6b6b",
                "<p>The login state is missing or does not match. Start the login again from the terminal.</p>",
            ),
            CallbackPage::NoPendingLogin => page(
                "No Login In Progress",
                "#fbbf24",
                "<p>No login is waiting for this provider.</p>",
            ),
        }
    }
}

/// Always 200; the outcome is in the page body.
impl IntoResponse for CallbackPage {
    fn into_response(self) -> axum::response::Response {
        Html(self.render()).into_response()
    }
}

fn page(title: &str, accent: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
      body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #fff; }}
      .container {{ text-align: center; padding: 40px; background: rgba(255,255,255,0.1); border-radius: 12px; }}
      h1 {{ color: {accent}; }}
      p {{ color: #ddd; }}
    </style>
  </head>
  <body>
    <div class="container">
      <h1>{title}</h1>
      {body}
    </div>
  </body>
</html>
"#
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Health payload served at `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub name: String,
    pub version: String,
    pub status: String,
}

/// Build the callback router.
pub fn callback_router(registry: CallbackRegistry) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/callback/:provider", get(handle_callback))
        .with_state(registry)
}

async fn health() -> Json<Health> {
    Json(Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
    })
}

async fn handle_callback(
    State(registry): State<CallbackRegistry>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> CallbackPage {
    let page = registry.dispatch(&provider, params);
    tracing::debug!(provider = %provider, success = page.is_success(), "OAuth callback received");
    page
}

/// Snapshot reported by `server status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

struct RunningServer {
    addr: SocketAddr,
    started_at: Instant,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the background task serving [`callback_router`].
pub struct CallbackServer {
    registry: CallbackRegistry,
    bind: SocketAddr,
    running: tokio::sync::Mutex<Option<RunningServer>>,
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer")
            .field("bind", &self.bind)
            .finish()
    }
}

impl CallbackServer {
    pub fn new(bind: SocketAddr) -> Self {
        Self::with_registry(bind, CallbackRegistry::new())
    }

    pub fn with_registry(bind: SocketAddr, registry: CallbackRegistry) -> Self {
        Self {
            registry,
            bind,
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Start serving unless already running; returns the bound address.
    pub async fn ensure_running(&self) -> HubResult<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            if !server.task.is_finished() {
                return Ok(server.addr);
            }
            tracing::warn!(addr = %server.addr, "Callback server exited, restarting");
        }

        let listener = TcpListener::bind(self.bind).await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(self.registry.clone());

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::warn!("Callback server error: {}", e);
            }
        });

        tracing::info!(%addr, "Callback server listening");
        *running = Some(RunningServer {
            addr,
            started_at: Instant::now(),
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Stop serving. Returns false if the server was not running.
    pub async fn stop(&self) -> bool {
        let Some(server) = self.running.lock().await.take() else {
            return false;
        };
        let _ = server.shutdown.send(());
        if let Err(e) = server.task.await {
            tracing::warn!("Callback server task failed: {}", e);
        }
        tracing::info!(addr = %server.addr, "Callback server stopped");
        true
    }

    pub async fn status(&self) -> ServerStatus {
        match self.running.lock().await.as_ref() {
            Some(server) if !server.task.is_finished() => ServerStatus {
                running: true,
                address: Some(server.addr),
                uptime_secs: Some(server.started_at.elapsed().as_secs()),
            },
            _ => ServerStatus {
                running: false,
                address: None,
                uptime_secs: None,
            },
        }
    }
}
