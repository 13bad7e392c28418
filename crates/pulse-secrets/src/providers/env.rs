//! Environment variable secrets provider.

use crate::{Provider, SecretsError};
use async_trait::async_trait;
use std::env;

pub struct EnvProvider {
    prefix: String,
}

impl EnvProvider {
    pub fn new() -> Self {
        Self { prefix: "PULSEONE_SECRET_".to_string() }
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self { prefix: prefix.to_string() }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace(['-', '.'], "_"))
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for EnvProvider {
    async fn get(&self, key: &str) -> Result<String, SecretsError> {
        let env_key = self.env_key(key);
        env::var(&env_key).map_err(|_| SecretsError::NotFound(key.to_string()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), SecretsError> {
        Err(SecretsError::ProviderError("cannot set environment variables at runtime".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), SecretsError> {
        Err(SecretsError::ProviderError("cannot delete environment variables at runtime".to_string()))
    }

    fn name(&self) -> &str {
        "env"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_prefixed_variable() {
        std::env::set_var("PULSEONE_SECRET_API_KEY", "shh");
        let provider = EnvProvider::new();
        assert_eq!(provider.get("api_key").await.unwrap(), "shh");
        std::env::remove_var("PULSEONE_SECRET_API_KEY");
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let provider = EnvProvider::new();
        assert!(matches!(provider.get("does_not_exist").await, Err(SecretsError::NotFound(_))));
    }
}
