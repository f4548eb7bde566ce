//! Authentication: encrypted credential storage, OAuth flows and the auth hub.
//!
//! Credentials live in the config directory, one AES-256-GCM sealed file per
//! provider account. The Gemini adapter additionally runs the OAuth
//! authorization-code flow through a local callback server.

mod adapter;
mod callback;
mod claude;
mod codex;
mod gemini;
mod hub;
mod oauth_state;
mod secret;
mod storage;
mod types;

pub use adapter::AuthAdapter;
pub use callback::{
    callback_router, AuthorizationCode, CallbackPage, CallbackParams, CallbackRegistry,
    CallbackServer, Health, PendingCallback, ServerStatus, DEFAULT_CALLBACK_TIMEOUT,
};
pub use claude::{ClaudeAuth, ANTHROPIC_API_BASE};
pub use codex::{CodexAuth, OPENAI_API_BASE};
pub use gemini::{GeminiAuth, GoogleOAuthConfig, GEMINI_API_BASE, GEMINI_SCOPE};
pub use hub::{map_model_provider_to_auth, AuthHub};
pub use oauth_state::{
    generate_state, OAuthAttempt, OAuthStateStore, PkcePair, DEFAULT_SWEEP_INTERVAL, STATE_EXPIRY,
};
pub use secret::{EncryptedEnvelope, SecretStore};
pub use storage::{
    CredentialKind, TokenData, TokenStore, ALL_ACCOUNTS, REFRESH_WINDOW_MS, VALIDITY_BUFFER_MS,
};
pub use types::{
    now_ms, AuthProviderName, AuthResult, AuthStatus, BrowserLauncher, LoginOptions,
    SecretPrompt, SystemBrowser, NEVER_EXPIRES,
};
