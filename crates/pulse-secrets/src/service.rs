//! Thin façade over the configured [`Provider`], plus the `ENC:<base64>`
//! inline-decryption path used by `pulse_config::expand_secrets`.

use crate::{create_provider, Provider, SecretsConfig, SecretsError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};

const NONCE_LEN: usize = 12;

pub struct SecretService {
    provider: Box<dyn Provider>,
    inline_key: Option<Vec<u8>>,
}

impl SecretService {
    pub async fn new(config: &SecretsConfig) -> Result<Self, SecretsError> {
        let provider = create_provider(config).await?;
        let inline_key = if config.encryption_key.is_empty() {
            None
        } else {
            Some(
                STANDARD
                    .decode(&config.encryption_key)
                    .map_err(|e| SecretsError::EncryptionError(format!("invalid encryption key: {e}")))?,
            )
        };
        Ok(Self { provider, inline_key })
    }

    /// Resolve a single `${SECRET:key}` reference or, for `encrypted:<b64>`
    /// (routed here by `pulse_config::expand_secrets` for `ENC:` values),
    /// decrypt the value inline against `secrets.encryption_key` without a
    /// round trip through the provider.
    pub async fn resolve(&self, reference: &str) -> Result<String, SecretsError> {
        if let Some(rest) = reference.strip_prefix("encrypted:") {
            return self.decrypt_inline(rest);
        }
        self.provider.get(reference).await
    }

    fn decrypt_inline(&self, base64_blob: &str) -> Result<String, SecretsError> {
        let key_bytes = self.inline_key.as_ref().ok_or_else(|| {
            SecretsError::EncryptionError(
                "ENC: value present but secrets.encryption_key is not configured".to_string(),
            )
        })?;
        let blob = STANDARD
            .decode(base64_blob)
            .map_err(|e| SecretsError::EncryptionError(format!("invalid ENC payload: {e}")))?;
        if blob.len() < NONCE_LEN {
            return Err(SecretsError::EncryptionError("ENC payload is truncated".to_string()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| SecretsError::EncryptionError(e.to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|e| SecretsError::EncryptionError(format!("decrypted payload is not utf8: {e}")))
    }

    /// Mask a secret value for logging: keep the first and last character,
    /// replace the rest with `*`. Values of length <= 2 are fully masked.
    pub fn mask(value: &str) -> String {
        let len = value.chars().count();
        if len <= 2 {
            return "*".to_string();
        }
        let first = value.chars().next().unwrap();
        let last = value.chars().last().unwrap();
        format!("{first}{}{last}", "*".repeat(len - 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_from_env_provider() {
        std::env::set_var("PULSEONE_SECRET_TOKEN", "value123");
        let service = SecretService::new(&SecretsConfig::default()).await.unwrap();
        assert_eq!(service.resolve("token").await.unwrap(), "value123");
        std::env::remove_var("PULSEONE_SECRET_TOKEN");
    }

    #[test]
    fn masks_short_and_long_values() {
        assert_eq!(SecretService::mask("ab"), "*");
        assert_eq!(SecretService::mask("secret"), "s****t");
    }
}
