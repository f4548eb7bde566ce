//! In-flight OAuth attempts and PKCE generation.
//!
//! Each attempt is keyed by its random `state` value, which doubles as the
//! single-use CSRF token. Attempts are mirrored to an encrypted file so a
//! login started in one process can be completed by another.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::secret::{ensure_private_dir, write_private_file, EncryptedEnvelope, SecretStore};
use super::types::{now_ms, AuthProviderName};
use crate::error::HubResult;

/// How long an attempt may be consumed after it was created.
pub const STATE_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// Default period of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const STATE_FILE_NAME: &str = ".oauth-states";
const VERIFIER_BYTES: usize = 64;
const STATE_BYTES: usize = 32;

/// A pending authorization-code attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthAttempt {
    pub provider: AuthProviderName,
    pub state: String,
    pub code_verifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Epoch millis.
    pub created_at: i64,
}

impl OAuthAttempt {
    pub fn new(
        provider: AuthProviderName,
        state: impl Into<String>,
        code_verifier: impl Into<String>,
        account_id: Option<String>,
    ) -> Self {
        Self {
            provider,
            state: state.into(),
            code_verifier: code_verifier.into(),
            account_id,
            created_at: now_ms(),
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now - self.created_at >= STATE_EXPIRY.as_millis() as i64
    }
}

/// PKCE verifier and S256 challenge.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// 64 random bytes, base64url encoded (86 chars).
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

struct Inner {
    path: PathBuf,
    secrets: SecretStore,
    attempts: Mutex<HashMap<String, OAuthAttempt>>,
}

/// Shared, disk-mirrored map of pending attempts.
#[derive(Clone)]
pub struct OAuthStateStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OAuthStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStateStore")
            .field("path", &self.inner.path)
            .field("pending", &self.len())
            .finish()
    }
}

impl OAuthStateStore {
    /// Open the store in `config_dir`, loading any surviving attempts.
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self::with_secret_store(config_dir.as_ref(), SecretStore::new(config_dir.as_ref()))
    }

    pub fn with_secret_store(config_dir: impl AsRef<Path>, secrets: SecretStore) -> Self {
        let path = config_dir.as_ref().join(STATE_FILE_NAME);
        let mut attempts = match load_attempts(&path, &secrets) {
            Ok(attempts) => attempts,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to load OAuth states: {}", e);
                HashMap::new()
            }
        };
        let now = now_ms();
        attempts.retain(|_, attempt| !attempt.is_expired_at(now));

        Self {
            inner: Arc::new(Inner {
                path,
                secrets,
                attempts: Mutex::new(attempts),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Record an attempt and persist the map.
    pub fn store(&self, attempt: OAuthAttempt) -> HubResult<()> {
        let mut attempts = self.lock();
        tracing::debug!(provider = %attempt.provider, "OAuth state stored");
        attempts.insert(attempt.state.clone(), attempt);
        self.persist(&attempts)
    }

    /// Look up an attempt. Expired attempts are removed and yield `None`.
    pub fn retrieve(&self, state: &str) -> Option<OAuthAttempt> {
        self.retrieve_at(state, now_ms())
    }

    pub fn retrieve_at(&self, state: &str, now: i64) -> Option<OAuthAttempt> {
        let mut attempts = self.lock();
        let attempt = attempts.get(state)?.clone();

        if attempt.is_expired_at(now) {
            attempts.remove(state);
            tracing::debug!(provider = %attempt.provider, "OAuth state expired");
            self.persist_logged(&attempts);
            return None;
        }
        Some(attempt)
    }

    /// Consume an attempt.
    pub fn delete(&self, state: &str) {
        let mut attempts = self.lock();
        if attempts.remove(state).is_some() {
            self.persist_logged(&attempts);
        }
    }

    /// Drop every pending attempt for `provider`.
    pub fn delete_by_provider(&self, provider: AuthProviderName) {
        let mut attempts = self.lock();
        let before = attempts.len();
        attempts.retain(|_, attempt| attempt.provider != provider);
        if attempts.len() != before {
            self.persist_logged(&attempts);
        }
    }

    /// Remove expired attempts; returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(now_ms())
    }

    pub fn cleanup_expired_at(&self, now: i64) -> usize {
        let mut attempts = self.lock();
        let before = attempts.len();
        attempts.retain(|_, attempt| !attempt.is_expired_at(now));
        let removed = before - attempts.len();
        self.persist_logged(&attempts);
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `every` until the
    /// returned handle is aborted.
    pub fn spawn_sweep(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = store.cleanup_expired();
                tracing::debug!(removed, remaining = store.len(), "OAuth state sweep complete");
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OAuthAttempt>> {
        self.inner
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, attempts: &HashMap<String, OAuthAttempt>) -> HubResult<()> {
        if let Some(dir) = self.inner.path.parent() {
            ensure_private_dir(dir)?;
        }
        let envelope = self.inner.secrets.encrypt(&serde_json::to_string(attempts)?)?;
        write_private_file(&self.inner.path, serde_json::to_string(&envelope)?.as_bytes())?;
        Ok(())
    }

    fn persist_logged(&self, attempts: &HashMap<String, OAuthAttempt>) {
        if let Err(e) = self.persist(attempts) {
            tracing::warn!("Failed to save OAuth states: {}", e);
        }
    }
}

fn load_attempts(path: &Path, secrets: &SecretStore) -> HubResult<HashMap<String, OAuthAttempt>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let envelope: EncryptedEnvelope = serde_json::from_str(&contents)?;
    Ok(serde_json::from_str(&secrets.decrypt(&envelope)?)?)
}
