//! Locally encrypted secrets file.
//!
//! A single AES-256-GCM encrypted blob (`<data_dir>/secrets.enc`) holding a
//! JSON map of key to plaintext value. The whole map is decrypted into
//! memory once at startup; `set`/`delete` mutate the in-memory map and
//! re-encrypt the file on every write, which is fine at PulseOne's secret
//! volume (a handful of device credentials and export target tokens).

use crate::{Provider, SecretsError};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

const NONCE_LEN: usize = 12;

pub struct EncryptedProvider {
    path: PathBuf,
    cipher: Aes256Gcm,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl EncryptedProvider {
    /// `key` is a base64-encoded 32-byte AES key. An empty key is rejected
    /// rather than silently defaulting — a blank encryption key would make
    /// every secret readable by anyone who can read the file.
    pub fn new(data_dir: &str, key: &str) -> Result<Self, SecretsError> {
        if key.is_empty() {
            return Err(SecretsError::EncryptionError(
                "secrets.encryption_key must be set to use the encrypted provider".to_string(),
            ));
        }
        let key_bytes = STANDARD
            .decode(key)
            .map_err(|e| SecretsError::EncryptionError(format!("invalid encryption key: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(SecretsError::EncryptionError(
                "encryption key must decode to 32 bytes".to_string(),
            ));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        Ok(Self {
            path: PathBuf::from(data_dir).join("secrets.enc"),
            cipher,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Generate a fresh base64-encoded 32-byte key, printed by `pulse-dev`
    /// when scaffolding a new encrypted secrets store.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        STANDARD.encode(key)
    }

    /// Decrypt the on-disk file into the in-memory cache, if it exists. A
    /// missing file means an empty store, not an error — the first `set`
    /// call creates it.
    pub async fn load(&self) -> Result<(), SecretsError> {
        if !self.path.exists() {
            return Ok(());
        }
        let blob = tokio::fs::read(&self.path).await?;
        if blob.len() < NONCE_LEN {
            return Err(SecretsError::EncryptionError("secrets file is truncated".to_string()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| SecretsError::EncryptionError(e.to_string()))?;
        let map: HashMap<String, String> = serde_json::from_slice(&plaintext)?;
        *self.cache.write().await = map;
        Ok(())
    }

    async fn save(&self) -> Result<(), SecretsError> {
        let map = self.cache.read().await;
        let plaintext = serde_json::to_vec(&*map)?;
        drop(map);
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| SecretsError::EncryptionError(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        tokio::fs::write(&self.path, blob).await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for EncryptedProvider {
    async fn get(&self, key: &str) -> Result<String, SecretsError> {
        self.cache
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| SecretsError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SecretsError> {
        self.cache.write().await.insert(key.to_string(), value.to_string());
        self.save().await
    }

    async fn delete(&self, key: &str) -> Result<(), SecretsError> {
        self.cache.write().await.remove(key);
        self.save().await
    }

    fn name(&self) -> &str {
        "encrypted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_secret_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptedProvider::generate_key();
        let data_dir = dir.path().to_str().unwrap();

        let provider = EncryptedProvider::new(data_dir, &key).unwrap();
        provider.load().await.unwrap();
        provider.set("modbus_device_12", "super-secret-token").await.unwrap();

        let reopened = EncryptedProvider::new(data_dir, &key).unwrap();
        reopened.load().await.unwrap();
        assert_eq!(reopened.get("modbus_device_12").await.unwrap(), "super-secret-token");
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptedProvider::generate_key();
        let provider = EncryptedProvider::new(dir.path().to_str().unwrap(), &key).unwrap();
        provider.set("a", "b").await.unwrap();
        provider.delete("a").await.unwrap();
        assert!(matches!(provider.get("a").await, Err(SecretsError::NotFound(_))));
    }

    #[test]
    fn rejects_empty_key() {
        assert!(EncryptedProvider::new("./data", "").is_err());
    }
}
