//! Credential vault for portal logins at rest.
//!
//! Values are sealed with AES-256-GCM under a single key file. The key's
//! lifetime is the data store's lifetime: [`CredentialVault::reset`] discards
//! it when the store is (re)initialised, after which the next
//! [`CredentialVault::encrypt`] creates a fresh key and everything sealed
//! under the old one stays unreadable.

use crate::models::StoredCredentials;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SEALED_PREFIX: &str = "v1:";

type KeyBytes = [u8; KEY_LEN];

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("failed to discard key material: {0}")]
    ResetFailed(#[source] std::io::Error),
}

/// Portal login in the clear, handed only to portal collectors.
#[derive(Debug, Clone)]
pub struct PortalCredentials {
    pub username: String,
    pub password: Secret<String>,
}

#[derive(Debug)]
pub struct CredentialVault {
    key_path: PathBuf,
    key: Mutex<Option<KeyBytes>>,
}

impl CredentialVault {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            key: Mutex::new(None),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Whether a key is currently active.
    pub fn has_key(&self) -> bool {
        self.lock().is_some() || self.key_path.exists()
    }

    /// Whether `value` is shaped like vault output: the prefix followed by
    /// base64 of a nonce and an authenticated ciphertext. A plaintext that
    /// merely starts with the prefix does not qualify.
    pub fn is_sealed(value: &str) -> bool {
        value
            .strip_prefix(SEALED_PREFIX)
            .and_then(|encoded| BASE64.decode(encoded.as_bytes()).ok())
            .is_some_and(|payload| payload.len() >= NONCE_LEN + TAG_LEN)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let key = self.load_or_create_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| VaultError::KeyUnavailable("invalid key length".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| VaultError::KeyUnavailable("cipher rejected plaintext".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&sealed);
        Ok(format!("{SEALED_PREFIX}{}", BASE64.encode(payload)))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<Secret<String>, VaultError> {
        let encoded = ciphertext
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| VaultError::DecryptionFailed("value is not sealed".to_string()))?;
        let payload = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| VaultError::DecryptionFailed(format!("malformed ciphertext: {e}")))?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::DecryptionFailed(
                "ciphertext is truncated".to_string(),
            ));
        }

        let key = self
            .load_key()?
            .ok_or_else(|| VaultError::DecryptionFailed("no active key".to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| VaultError::DecryptionFailed("invalid key length".to_string()))?;

        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| {
                VaultError::DecryptionFailed("key mismatch or corrupted ciphertext".to_string())
            })?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| VaultError::DecryptionFailed("plaintext is not UTF-8".to_string()))?;
        Ok(Secret::new(plaintext))
    }

    /// Destroy the active key. The next `encrypt` generates a new one.
    pub fn reset(&self) -> Result<(), VaultError> {
        let mut cached = self.lock();
        *cached = None;
        match fs::remove_file(&self.key_path) {
            Ok(()) => {
                tracing::info!(key_file = %self.key_path.display(), "Encryption key discarded");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::ResetFailed(e)),
        }
    }

    /// Seal whichever halves of a credential pair are still plaintext.
    pub fn seal_credentials(
        &self,
        credentials: &StoredCredentials,
    ) -> Result<StoredCredentials, VaultError> {
        let seal = |value: &str| {
            if Self::is_sealed(value) {
                Ok(value.to_string())
            } else {
                self.encrypt(value)
            }
        };
        Ok(StoredCredentials {
            username: seal(&credentials.username)?,
            password: seal(&credentials.password)?,
        })
    }

    pub fn open_credentials(
        &self,
        credentials: &StoredCredentials,
    ) -> Result<PortalCredentials, VaultError> {
        let username = self.decrypt(&credentials.username)?;
        let password = self.decrypt(&credentials.password)?;
        Ok(PortalCredentials {
            username: username.expose_secret().clone(),
            password,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<KeyBytes>> {
        self.key.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_key(&self) -> Result<Option<KeyBytes>, VaultError> {
        let mut cached = self.lock();
        if let Some(key) = *cached {
            return Ok(Some(key));
        }
        match read_key_file(&self.key_path) {
            Ok(key) => {
                *cached = Some(key);
                Ok(Some(key))
            }
            Err(KeyFileError::Missing) => Ok(None),
            Err(KeyFileError::Invalid(reason)) => Err(VaultError::DecryptionFailed(reason)),
        }
    }

    fn load_or_create_key(&self) -> Result<KeyBytes, VaultError> {
        let mut cached = self.lock();
        if let Some(key) = *cached {
            return Ok(key);
        }

        let key = match read_key_file(&self.key_path) {
            Ok(key) => key,
            Err(KeyFileError::Invalid(reason)) => return Err(VaultError::KeyUnavailable(reason)),
            Err(KeyFileError::Missing) => {
                let mut key = [0u8; KEY_LEN];
                OsRng.fill_bytes(&mut key);
                write_key_file(&self.key_path, &key)
                    .map_err(|e| VaultError::KeyUnavailable(format!("cannot write key: {e}")))?;
                tracing::info!(
                    key_file = %self.key_path.display(),
                    "Encryption key created; back it up, sealed credentials cannot be recovered without it"
                );
                key
            }
        };

        *cached = Some(key);
        Ok(key)
    }
}

enum KeyFileError {
    Missing,
    Invalid(String),
}

fn read_key_file(path: &Path) -> Result<KeyBytes, KeyFileError> {
    let encoded = match fs::read_to_string(path) {
        Ok(encoded) => encoded,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(KeyFileError::Missing),
        Err(e) => return Err(KeyFileError::Invalid(format!("cannot read key: {e}"))),
    };
    let decoded = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|e| KeyFileError::Invalid(format!("malformed key file: {e}")))?;
    if decoded.len() != KEY_LEN {
        return Err(KeyFileError::Invalid("key file has wrong length".to_string()));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&decoded);
    Ok(key)
}

fn write_key_file(path: &Path, key: &KeyBytes) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(BASE64.encode(key).as_bytes())?;
    file.flush()?;
    Ok(())
}
