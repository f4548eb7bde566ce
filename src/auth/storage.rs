//! Encrypted credential storage.
//!
//! One file per (provider, account) at `<config_dir>/<provider>[_<account>].token`.
//! File contents are always the sealed [`EncryptedEnvelope`] of a [`TokenData`]
//! record, never plaintext. There is no in-memory cache: every query reads
//! the disk.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::secret::{ensure_private_dir, write_private_file, EncryptedEnvelope, SecretStore};
use super::types::{now_ms, AuthProviderName, NEVER_EXPIRES};
use crate::error::HubResult;

/// Account selector that matches every stored account of a provider.
pub const ALL_ACCOUNTS: &str = "*";

/// OAuth tokens closer than this to expiry are no longer valid.
pub const VALIDITY_BUFFER_MS: i64 = 5 * 60 * 1000;

/// OAuth tokens closer than this to expiry should be refreshed.
pub const REFRESH_WINDOW_MS: i64 = 15 * 60 * 1000;

const TOKEN_EXTENSION: &str = ".token";

/// How a credential was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    #[serde(rename = "api_key")]
    ApiKey,
    #[serde(rename = "oauth")]
    OAuth,
}

/// A decrypted credential record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub provider: AuthProviderName,
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    /// Epoch millis; [`NEVER_EXPIRES`] for API keys.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl TokenData {
    /// A non-expiring API key credential.
    pub fn api_key(
        provider: AuthProviderName,
        key: impl Into<String>,
        account_id: Option<String>,
    ) -> Self {
        Self {
            access_token: key.into(),
            refresh_token: None,
            provider,
            kind: CredentialKind::ApiKey,
            expires_at: NEVER_EXPIRES,
            scopes: None,
            account_id,
        }
    }

    /// An OAuth credential expiring at `expires_at` (epoch millis).
    pub fn oauth(
        provider: AuthProviderName,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            provider,
            kind: CredentialKind::OAuth,
            expires_at,
            scopes: None,
            account_id: None,
        }
    }

    pub fn with_account(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// API keys are always valid; OAuth tokens must outlive the 5 minute buffer.
    pub fn is_valid_at(&self, now: i64) -> bool {
        match self.kind {
            CredentialKind::ApiKey => true,
            CredentialKind::OAuth => self.expires_at > now.saturating_add(VALIDITY_BUFFER_MS),
        }
    }

    /// True for OAuth tokens expiring within the 15 minute refresh window.
    pub fn needs_refresh_at(&self, now: i64) -> bool {
        match self.kind {
            CredentialKind::ApiKey => false,
            CredentialKind::OAuth => self.expires_at < now.saturating_add(REFRESH_WINDOW_MS),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_ms())
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(now_ms())
    }
}

/// CRUD over encrypted credential files.
#[derive(Debug)]
pub struct TokenStore {
    dir: PathBuf,
    secrets: SecretStore,
}

impl TokenStore {
    /// Store tokens in `config_dir`, keyed by `<config_dir>/.key`.
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        let dir = config_dir.as_ref().to_path_buf();
        let secrets = SecretStore::new(&dir);
        Self { dir, secrets }
    }

    pub fn with_secret_store(config_dir: impl AsRef<Path>, secrets: SecretStore) -> Self {
        Self {
            dir: config_dir.as_ref().to_path_buf(),
            secrets,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `provider`'s credential for `account_id`.
    pub fn token_path(&self, provider: AuthProviderName, account_id: Option<&str>) -> PathBuf {
        let file_name = match account_id {
            Some(account) => format!(
                "{}_{}{}",
                provider.as_str(),
                encode_account(account),
                TOKEN_EXTENSION
            ),
            None => format!("{}{}", provider.as_str(), TOKEN_EXTENSION),
        };
        self.dir.join(file_name)
    }

    /// Encrypt and write `record`, replacing any previous one for the same account.
    pub fn store(&self, provider: AuthProviderName, record: &TokenData) -> HubResult<()> {
        ensure_private_dir(&self.dir)?;

        let path = self.token_path(provider, record.account_id.as_deref());
        let envelope = self.secrets.encrypt(&serde_json::to_string(record)?)?;
        write_private_file(&path, serde_json::to_string(&envelope)?.as_bytes())?;

        tracing::debug!(provider = %provider, account = ?record.account_id, "Token stored");
        Ok(())
    }

    /// Load a credential. Any read, decrypt or parse failure yields `None`.
    pub fn retrieve(&self, provider: AuthProviderName, account_id: Option<&str>) -> Option<TokenData> {
        let path = self.token_path(provider, account_id);
        match self.read_record(&path) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    provider = %provider,
                    path = %path.display(),
                    "Failed to retrieve token: {}",
                    e
                );
                None
            }
        }
    }

    /// Load every stored account of `provider`, ordered by file name.
    pub fn retrieve_all(&self, provider: AuthProviderName) -> Vec<TokenData> {
        self.provider_files(provider)
            .into_iter()
            .filter_map(|path| match self.read_record(&path) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable token: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Delete one account, the default account (`None`) or every account
    /// ([`ALL_ACCOUNTS`]). Returns the number of files removed.
    pub fn delete(&self, provider: AuthProviderName, account_id: Option<&str>) -> HubResult<usize> {
        let paths = match account_id {
            Some(ALL_ACCOUNTS) => self.provider_files(provider),
            other => vec![self.token_path(provider, other)],
        };

        let mut removed = 0;
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(provider = %provider, account = ?account_id, removed, "Token deleted");
        Ok(removed)
    }

    pub fn is_valid(&self, provider: AuthProviderName, account_id: Option<&str>) -> bool {
        self.retrieve(provider, account_id)
            .map(|record| record.is_valid())
            .unwrap_or(false)
    }

    pub fn needs_refresh(&self, provider: AuthProviderName, account_id: Option<&str>) -> bool {
        self.retrieve(provider, account_id)
            .map(|record| record.needs_refresh())
            .unwrap_or(false)
    }

    fn read_record(&self, path: &Path) -> HubResult<Option<TokenData>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: EncryptedEnvelope = serde_json::from_str(&contents)?;
        let plaintext = self.secrets.decrypt(&envelope)?;
        Ok(Some(serde_json::from_str(&plaintext)?))
    }

    fn provider_files(&self, provider: AuthProviderName) -> Vec<PathBuf> {
        let exact = format!("{}{}", provider.as_str(), TOKEN_EXTENSION);
        let prefix = format!("{}_", provider.as_str());

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name == exact || (name.starts_with(&prefix) && name.ends_with(TOKEN_EXTENSION))
            })
            .map(|entry| entry.path())
            .collect();
        paths.sort();
        paths
    }
}

/// Percent-encode an account id for use in a file name. The encoding is
/// injective, so distinct accounts never share a file.
fn encode_account(account: &str) -> String {
    urlencoding::encode(account).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINUTE: i64 = 60 * 1000;

    fn oauth_expiring_at(expires_at: i64) -> TokenData {
        TokenData::oauth(
            AuthProviderName::Gemini,
            "ya29.token",
            Some("refresh".to_string()),
            expires_at,
        )
    }

    #[test]
    fn test_store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());

        let record = TokenData::api_key(AuthProviderName::Claude, "sk-ant-123", None);
        store.store(AuthProviderName::Claude, &record).unwrap();

        let loaded = store.retrieve(AuthProviderName::Claude, None).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.expires_at, NEVER_EXPIRES);
    }

    #[test]
    fn test_file_is_never_plaintext() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());

        let record = TokenData::api_key(AuthProviderName::Codex, "sk-plaintext-marker", None);
        store.store(AuthProviderName::Codex, &record).unwrap();

        let raw = fs::read_to_string(dir.path().join("codex.token")).unwrap();
        assert!(!raw.contains("sk-plaintext-marker"));
        let envelope: EncryptedEnvelope = serde_json::from_str(&raw).unwrap();
        assert!(!envelope.auth_tag.is_empty());
    }

    #[test]
    fn test_retrieve_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(store.retrieve(AuthProviderName::Gemini, None).is_none());
        assert!(!store.is_valid(AuthProviderName::Gemini, None));
        assert!(!store.needs_refresh(AuthProviderName::Gemini, None));
    }

    #[test]
    fn test_retrieve_corrupted_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        fs::write(dir.path().join("claude.token"), "not json").unwrap();
        assert!(store.retrieve(AuthProviderName::Claude, None).is_none());
    }

    #[test]
    fn test_retrieve_with_wrong_key_returns_none() {
        let dir = TempDir::new().unwrap();
        let writer = TokenStore::with_secret_store(dir.path(), SecretStore::with_key(dir.path(), [7; 32]));
        let reader = TokenStore::with_secret_store(dir.path(), SecretStore::with_key(dir.path(), [8; 32]));

        let record = TokenData::api_key(AuthProviderName::Claude, "sk-ant-123", None);
        writer.store(AuthProviderName::Claude, &record).unwrap();
        assert!(reader.retrieve(AuthProviderName::Claude, None).is_none());
    }

    #[test]
    fn test_multiple_accounts() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        let expires = now_ms() + 60 * MINUTE;

        for account in ["account-1", "account-2"] {
            let record = oauth_expiring_at(expires).with_account(Some(account.to_string()));
            store.store(AuthProviderName::Gemini, &record).unwrap();
        }
        // A different provider must not leak into the listing.
        store
            .store(
                AuthProviderName::Claude,
                &TokenData::api_key(AuthProviderName::Claude, "k", None),
            )
            .unwrap();

        let all = store.retrieve_all(AuthProviderName::Gemini);
        let ids: Vec<_> = all.iter().filter_map(|t| t.account_id.clone()).collect();
        assert_eq!(ids, vec!["account-1".to_string(), "account-2".to_string()]);

        let second = store.retrieve(AuthProviderName::Gemini, Some("account-2")).unwrap();
        assert_eq!(second.account_id.as_deref(), Some("account-2"));
        assert!(dir.path().join("gemini_account-1.token").exists());
    }

    #[test]
    fn test_delete_single_account() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        let expires = now_ms() + 60 * MINUTE;

        for account in ["a", "b"] {
            let record = oauth_expiring_at(expires).with_account(Some(account.to_string()));
            store.store(AuthProviderName::Gemini, &record).unwrap();
        }

        assert_eq!(store.delete(AuthProviderName::Gemini, Some("a")).unwrap(), 1);
        assert!(store.retrieve(AuthProviderName::Gemini, Some("a")).is_none());
        assert!(store.retrieve(AuthProviderName::Gemini, Some("b")).is_some());
    }

    #[test]
    fn test_delete_all_accounts_with_wildcard() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        let expires = now_ms() + 60 * MINUTE;

        store.store(AuthProviderName::Gemini, &oauth_expiring_at(expires)).unwrap();
        for account in ["a", "b"] {
            let record = oauth_expiring_at(expires).with_account(Some(account.to_string()));
            store.store(AuthProviderName::Gemini, &record).unwrap();
        }

        assert_eq!(store.delete(AuthProviderName::Gemini, Some(ALL_ACCOUNTS)).unwrap(), 3);
        assert!(store.retrieve_all(AuthProviderName::Gemini).is_empty());
    }

    #[test]
    fn test_delete_missing_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        assert_eq!(store.delete(AuthProviderName::Codex, None).unwrap(), 0);
    }

    #[test]
    fn test_validity_window() {
        let now = now_ms();
        assert!(!oauth_expiring_at(now + 4 * MINUTE).is_valid_at(now));
        assert!(oauth_expiring_at(now + 6 * MINUTE).is_valid_at(now));
    }

    #[test]
    fn test_refresh_window() {
        let now = now_ms();
        assert!(oauth_expiring_at(now + 10 * MINUTE).needs_refresh_at(now));
        assert!(!oauth_expiring_at(now + 20 * MINUTE).needs_refresh_at(now));
    }

    #[test]
    fn test_api_key_always_valid_and_never_refreshes() {
        let record = TokenData::api_key(AuthProviderName::Claude, "sk-ant-1", None);
        assert!(record.is_valid_at(i64::MAX - 1));
        assert!(!record.needs_refresh_at(0));
    }

    #[test]
    fn test_account_id_is_encoded_in_file_name() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        let path = store.token_path(AuthProviderName::Gemini, Some("../evil/acct"));
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(path.file_name().unwrap(), "gemini_..%2Fevil%2Facct.token");
    }

    #[test]
    fn test_similar_account_ids_get_separate_files() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        let accounts = ["a/b", "a b", "a_b"];
        for (i, account) in accounts.iter().enumerate() {
            let record = TokenData::api_key(
                AuthProviderName::Gemini,
                format!("key-{}", i),
                Some(account.to_string()),
            );
            store.store(AuthProviderName::Gemini, &record).unwrap();
        }

        assert_eq!(store.retrieve_all(AuthProviderName::Gemini).len(), 3);
        for (i, account) in accounts.iter().enumerate() {
            let record = store
                .retrieve(AuthProviderName::Gemini, Some(account))
                .unwrap();
            assert_eq!(record.account_id.as_deref(), Some(*account));
            assert_eq!(record.access_token, format!("key-{}", i));
        }
    }

    #[test]
    fn test_record_serialization_shape() {
        let record = TokenData::api_key(AuthProviderName::Claude, "k", None);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"api_key\""));
        assert!(json.contains("\"accessToken\":\"k\""));
        assert!(json.contains("\"expiresAt\":9007199254740991"));
        assert!(!json.contains("refreshToken"));
    }

    #[cfg(unix)]
    #[test]
    fn test_token_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path());
        let record = TokenData::api_key(AuthProviderName::Claude, "k", None);
        store.store(AuthProviderName::Claude, &record).unwrap();

        let mode = fs::metadata(store.token_path(AuthProviderName::Claude, None))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600, "Token file should have 0600 permissions");
    }
}
