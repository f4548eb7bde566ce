//! Machine-local symmetric key vault.
//!
//! A single 256-bit key lives at `<config_dir>/.key` (hex, mode 0600) and is
//! generated on first use. Payloads are sealed with AES-256-GCM using a fresh
//! 128-bit IV per call; the authentication tag is kept separately in the
//! envelope so the on-disk format is `{encryptedData, iv, authTag}`.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use crate::error::{HubError, HubResult};

/// AES-256-GCM with a 16-byte IV.
type Cipher = AesGcm<Aes256, U16>;

const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const TAG_SIZE: usize = 16;

/// Name of the key file inside the config directory.
pub const KEY_FILE_NAME: &str = ".key";

/// Encrypted payload as written to disk. All fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub encrypted_data: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Owner of the encryption key.
///
/// The key is loaded (or generated) lazily and cached for the lifetime of
/// the store. Losing the key file makes every sealed payload unrecoverable.
#[derive(Debug)]
pub struct SecretStore {
    key_path: PathBuf,
    key: Mutex<Option<[u8; KEY_SIZE]>>,
}

impl SecretStore {
    /// Create a store whose key lives in `config_dir`.
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            key_path: config_dir.as_ref().join(KEY_FILE_NAME),
            key: Mutex::new(None),
        }
    }

    /// Create a store with an in-memory key that is never persisted.
    pub fn with_key(config_dir: impl AsRef<Path>, key: [u8; KEY_SIZE]) -> Self {
        Self {
            key_path: config_dir.as_ref().join(KEY_FILE_NAME),
            key: Mutex::new(Some(key)),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Return the cached key, loading or generating it on first call.
    fn key(&self) -> HubResult<[u8; KEY_SIZE]> {
        let mut guard = self
            .key
            .lock()
            .map_err(|_| HubError::Crypto("key cache poisoned".to_string()))?;

        if let Some(key) = *guard {
            return Ok(key);
        }

        let key = match self.load_key()? {
            Some(key) => key,
            None => self.generate_key()?,
        };
        *guard = Some(key);
        Ok(key)
    }

    fn load_key(&self) -> HubResult<Option<[u8; KEY_SIZE]>> {
        let contents = match fs::read_to_string(&self.key_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match hex::decode(contents.trim()) {
            Ok(bytes) if bytes.len() == KEY_SIZE => {
                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&bytes);
                Ok(Some(key))
            }
            _ => {
                tracing::warn!(path = %self.key_path.display(), "Key file is corrupted");
                Err(HubError::Crypto(format!(
                    "key file {} is corrupted; remove it to start over (stored credentials will be lost)",
                    self.key_path.display()
                )))
            }
        }
    }

    fn generate_key(&self) -> HubResult<[u8; KEY_SIZE]> {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);

        if let Some(parent) = self.key_path.parent() {
            ensure_private_dir(parent)?;
        }
        write_private_file(&self.key_path, hex::encode(key).as_bytes())?;
        tracing::debug!(path = %self.key_path.display(), "Generated new encryption key");

        Ok(key)
    }

    fn cipher(&self) -> HubResult<Cipher> {
        let key = self.key()?;
        Cipher::new_from_slice(&key).map_err(|e| HubError::Crypto(e.to_string()))
    }

    /// Encrypt a UTF-8 string under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> HubResult<EncryptedEnvelope> {
        let cipher = self.cipher()?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| HubError::Crypto("encryption failed".to_string()))?;

        Ok(EncryptedEnvelope {
            encrypted_data: BASE64.encode(&buffer),
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(tag),
        })
    }

    /// Decrypt an envelope. Fails if the tag does not verify.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> HubResult<String> {
        let iv = decode_field("iv", &envelope.iv)?;
        let tag = decode_field("authTag", &envelope.auth_tag)?;
        let mut buffer = decode_field("encryptedData", &envelope.encrypted_data)?;

        if iv.len() != IV_SIZE {
            return Err(HubError::Crypto(format!(
                "invalid IV size: expected {}, got {}",
                IV_SIZE,
                iv.len()
            )));
        }
        if tag.len() != TAG_SIZE {
            return Err(HubError::Crypto(format!(
                "invalid auth tag size: expected {}, got {}",
                TAG_SIZE,
                tag.len()
            )));
        }

        let cipher = self.cipher()?;
        cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| {
                HubError::Crypto("decryption failed (wrong key or tampered data)".to_string())
            })?;

        String::from_utf8(buffer)
            .map_err(|_| HubError::Crypto("decrypted data is not valid UTF-8".to_string()))
    }
}

fn decode_field(name: &str, value: &str) -> HubResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| HubError::Crypto(format!("invalid base64 in {}: {}", name, e)))
}

/// Create `dir` (and parents) restricted to the owner.
pub(crate) fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;

    #[cfg(unix)]
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;

    Ok(())
}

/// Write `contents` to `path` with owner-only read/write permissions.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path)?;

    // Pre-existing files keep their old mode through open(); reset it.
    #[cfg(unix)]
    {
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)?;
    }

    file.write_all(contents)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn flip_first_byte(b64: &str) -> String {
        let mut bytes = BASE64.decode(b64).unwrap();
        bytes[0] ^= 0x01;
        BASE64.encode(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());
        let long = "x".repeat(10_000);

        for plaintext in ["", "sk-ant-api03-secret", "ключ 🔑 鍵", long.as_str()] {
            let envelope = store.encrypt(plaintext).unwrap();
            assert_eq!(store.decrypt(&envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());

        let a = store.encrypt("same").unwrap();
        let b = store.encrypt("same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.encrypted_data, b.encrypted_data);
        assert_eq!(BASE64.decode(&a.iv).unwrap().len(), IV_SIZE);
        assert_eq!(BASE64.decode(&a.auth_tag).unwrap().len(), TAG_SIZE);
    }

    #[test]
    fn test_tampered_tag_fails() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());

        let mut envelope = store.encrypt("secret").unwrap();
        envelope.auth_tag = flip_first_byte(&envelope.auth_tag);
        assert!(matches!(store.decrypt(&envelope), Err(HubError::Crypto(_))));
    }

    #[test]
    fn test_tampered_iv_fails() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());

        let mut envelope = store.encrypt("secret").unwrap();
        envelope.iv = flip_first_byte(&envelope.iv);
        assert!(matches!(store.decrypt(&envelope), Err(HubError::Crypto(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());

        let mut envelope = store.encrypt("secret").unwrap();
        envelope.encrypted_data = flip_first_byte(&envelope.encrypted_data);
        assert!(store.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = TempDir::new().unwrap();
        let sealer = SecretStore::with_key(dir.path(), [1u8; 32]);
        let opener = SecretStore::with_key(dir.path(), [2u8; 32]);

        let envelope = sealer.encrypt("secret").unwrap();
        assert!(matches!(opener.decrypt(&envelope), Err(HubError::Crypto(_))));
    }

    #[test]
    fn test_key_persisted_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let envelope = SecretStore::new(dir.path()).encrypt("persist me").unwrap();

        let hex_key = fs::read_to_string(dir.path().join(KEY_FILE_NAME)).unwrap();
        assert_eq!(hex_key.len(), KEY_SIZE * 2);
        assert!(hex_key.chars().all(|c| c.is_ascii_hexdigit()));

        // A second "process" loads the same key from disk.
        let reopened = SecretStore::new(dir.path());
        assert_eq!(reopened.decrypt(&envelope).unwrap(), "persist me");
    }

    #[test]
    fn test_lost_key_makes_payload_unrecoverable() {
        let dir = TempDir::new().unwrap();
        let envelope = SecretStore::new(dir.path()).encrypt("gone").unwrap();

        fs::remove_file(dir.path().join(KEY_FILE_NAME)).unwrap();
        let fresh = SecretStore::new(dir.path());
        assert!(fresh.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_corrupted_key_file_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join(KEY_FILE_NAME);
        fs::write(&key_path, "not-hex").unwrap();

        let store = SecretStore::new(dir.path());
        assert!(matches!(store.encrypt("secret"), Err(HubError::Crypto(_))));
        assert_eq!(fs::read_to_string(&key_path).unwrap(), "not-hex");
    }

    #[test]
    fn test_envelope_serializes_camel_case() {
        let envelope = EncryptedEnvelope {
            encrypted_data: "a".to_string(),
            iv: "b".to_string(),
            auth_tag: "c".to_string(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"encryptedData":"a","iv":"b","authTag":"c"}"#);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());
        store.encrypt("trigger key generation").unwrap();

        let mode = fs::metadata(store.key_path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "Key file should have 0600 permissions");
    }
}
