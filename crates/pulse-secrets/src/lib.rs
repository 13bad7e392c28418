//! Secret resolution for PulseOne.
//!
//! Mirrors FlowCatalyst's `fc-secrets` shape (a `Provider` trait behind a
//! factory function) but narrowed to the two backends the original collector
//! actually shipped: plain environment variables and a locally encrypted
//! file. There is no cloud secret manager integration here; PulseOne runs at
//! the edge, often without outbound access to one.

pub mod providers;
pub mod service;

use async_trait::async_trait;
use thiserror::Error;

pub use service::SecretService;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("invalid secret key: {0}")]
    InvalidKey(String),
    #[error("encryption error: {0}")]
    EncryptionError(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// A secret backend. `set`/`delete` are no-ops (or errors) for read-only
/// providers such as [`providers::env::EnvProvider`].
#[async_trait]
pub trait Provider: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, SecretsError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), SecretsError>;
    async fn delete(&self, key: &str) -> Result<(), SecretsError>;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct SecretsConfig {
    /// "env" | "encrypted"
    pub provider: String,
    pub encryption_key: String,
    pub data_dir: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            provider: "env".to_string(),
            encryption_key: String::new(),
            data_dir: "./data/secrets".to_string(),
        }
    }
}

/// Build the configured provider. Unknown provider names fall back to `env`
/// rather than fail startup — a missing secret then surfaces as a clear
/// `NotFound` at resolve time instead of a boot failure over a typo.
pub async fn create_provider(config: &SecretsConfig) -> Result<Box<dyn Provider>, SecretsError> {
    match config.provider.as_str() {
        "encrypted" => {
            let provider = providers::encrypted::EncryptedProvider::new(
                &config.data_dir,
                &config.encryption_key,
            )?;
            provider.load().await?;
            Ok(Box::new(provider))
        }
        other => {
            if other != "env" {
                tracing::warn!(provider = other, "unknown secrets provider, falling back to env");
            }
            Ok(Box::new(providers::env::EnvProvider::new()))
        }
    }
}
