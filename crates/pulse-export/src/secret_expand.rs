//! Async mirror of `pulse_config::expand_secrets`.
//!
//! `pulse-config`'s version takes a synchronous resolver closure to stay
//! decoupled from `pulse-secrets` and avoid a crate cycle; target handlers
//! resolve against a live [`pulse_secrets::SecretService`], whose `resolve`
//! is async, so the same `${SECRET:key}` / `ENC:<base64>` parsing is
//! reimplemented here against an `async fn`-shaped resolver instead.

use pulse_secrets::{SecretService, SecretsError};

pub async fn expand_secrets_async(input: &str, secrets: &SecretService) -> Result<String, SecretsError> {
    if let Some(rest) = input.strip_prefix("ENC:") {
        return secrets.resolve(&format!("encrypted:{rest}")).await;
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${SECRET:") {
        out.push_str(&rest[..start]);
        let after = &rest[start + "${SECRET:".len()..];
        if let Some(end) = after.find('}') {
            let key = &after[..end];
            out.push_str(&secrets.resolve(key).await?);
            rest = &after[end + 1..];
        } else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_secrets::SecretsConfig;

    async fn service() -> SecretService {
        std::env::set_var("PULSEONE_SECRET_TEST_KEY", "swordfish");
        SecretService::new(&SecretsConfig { provider: "env".into(), ..Default::default() }).await.unwrap()
    }

    #[tokio::test]
    async fn expands_secret_placeholder() {
        let secrets = service().await;
        let out = expand_secrets_async("bearer ${SECRET:test_key}", &secrets).await.unwrap();
        assert_eq!(out, "bearer swordfish");
    }

    #[tokio::test]
    async fn leaves_plain_text_untouched() {
        let secrets = service().await;
        let out = expand_secrets_async("https://example.com/api", &secrets).await.unwrap();
        assert_eq!(out, "https://example.com/api");
    }
}
