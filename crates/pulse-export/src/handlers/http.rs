//! HTTP target handler (spec §4.7, grounded on `HttpTargetHandler.cpp`).
//!
//! `transport_config` shape:
//! ```json
//! { "url": "https://host/${VAR}/ingest",
//!   "method": "POST",
//!   "headers": { "X-Tenant": "acme" },
//!   "auth": { "kind": "bearer", "value": "${SECRET:export_token}" },
//!   "timeout_ms": 5000 }
//! ```
//! `auth.kind` is `"api_key"` (sent as `x-api-key`) or `"bearer"` (sent as
//! `Authorization: Bearer <value>`). `value` goes through
//! [`crate::secret_expand::expand_secrets_async`] so `${SECRET:..}`/`ENC:`
//! references never touch a log line unmasked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulse_common::{Alarm, ExportTarget, TargetSendResult};
use pulse_secrets::SecretService;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client_cache::ClientCacheManager;
use crate::coordinator::ValueEvent;
use crate::handler::{backoff_delay, target_name, TargetHandler};
use crate::secret_expand::expand_secrets_async;
use crate::ExportError;

#[derive(Debug, Clone, Default)]
struct HttpClientConfig {
    timeout_ms: u64,
}

pub struct HttpTargetHandler {
    secrets: Arc<SecretService>,
    clients: ClientCacheManager<Client, HttpClientConfig>,
}

impl HttpTargetHandler {
    pub fn new(secrets: Arc<SecretService>) -> Self {
        let clients = ClientCacheManager::new(|cfg: &HttpClientConfig| {
            let timeout = Duration::from_millis(if cfg.timeout_ms == 0 { 5000 } else { cfg.timeout_ms });
            Arc::new(
                Client::builder()
                    .connect_timeout(Duration::from_secs(10))
                    .timeout(timeout)
                    .build()
                    .unwrap_or_else(|_| Client::new()),
            )
        });
        Self { secrets, clients }
    }

    fn client_for(&self, target: &ExportTarget) -> Arc<Client> {
        let timeout_ms = target.transport_config.get("timeout_ms").and_then(Value::as_u64).unwrap_or(5000);
        self.clients.get_or_create(&target.id.to_string(), &HttpClientConfig { timeout_ms })
    }

    fn url(&self, target: &ExportTarget) -> Result<String, ExportError> {
        let raw = target.transport_config.get("url").and_then(Value::as_str).ok_or_else(|| ExportError::Config(format!("target {} has no transport_config.url", target.id)))?;
        Ok(pulse_config::expand_env_vars(raw))
    }

    async fn headers(&self, target: &ExportTarget) -> Result<reqwest::header::HeaderMap, ExportError> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
        let mut map = HeaderMap::new();
        map.insert("content-type", HeaderValue::from_static("application/json"));
        map.insert("accept", HeaderValue::from_static("application/json"));
        map.insert("user-agent", HeaderValue::from_static("pulseone-export/1.0"));

        if let Some(headers) = target.transport_config.get("headers").and_then(Value::as_object) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    let expanded = expand_secrets_async(&pulse_config::expand_env_vars(v), &self.secrets).await?;
                    if let (Ok(name), Ok(value)) = (HeaderName::try_from(k.as_str()), HeaderValue::from_str(&expanded)) {
                        map.insert(name, value);
                    }
                }
            }
        }

        if let Some(auth) = target.transport_config.get("auth").and_then(Value::as_object) {
            let kind = auth.get("kind").and_then(Value::as_str).unwrap_or("");
            if let Some(raw_value) = auth.get("value").and_then(Value::as_str) {
                let resolved = expand_secrets_async(raw_value, &self.secrets).await?;
                debug!(target = target_name(target), auth_kind = kind, value = %SecretService::mask(&resolved), "resolved auth credential");
                match kind {
                    "api_key" => {
                        if let Ok(value) = HeaderValue::from_str(&resolved) {
                            map.insert(HeaderName::from_static("x-api-key"), value);
                        }
                    }
                    "bearer" => {
                        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {resolved}")) {
                            map.insert(reqwest::header::AUTHORIZATION, value);
                        }
                    }
                    other => warn!(target = target_name(target), auth_kind = other, "unrecognized auth kind, sending without credentials"),
                }
            }
        }

        Ok(map)
    }

    async fn send_with_retry(&self, target: &ExportTarget, payload: &Value) -> TargetSendResult {
        let start = std::time::Instant::now();
        let url = match self.url(target) {
            Ok(u) => u,
            Err(e) => return error_result(target, 0, 0, e.to_string(), payload),
        };
        let headers = match self.headers(target).await {
            Ok(h) => h,
            Err(e) => return error_result(target, 0, 0, e.to_string(), payload),
        };
        let client = self.client_for(target);
        let method = target.transport_config.get("method").and_then(Value::as_str).unwrap_or("POST").to_uppercase();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = client.request(method.parse().unwrap_or(reqwest::Method::POST), &url).headers(headers.clone()).json(payload);

            let mut retry_after_ms = None;
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 {
                        retry_after_ms = response.headers().get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<u64>().ok()).map(|secs| secs * 1000);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return TargetSendResult {
                            target_type: target.kind,
                            target_name: target_name(target),
                            success: true,
                            status_code: Some(status.as_u16()),
                            error_message: None,
                            sent_payload: Some(payload.to_string()),
                            response_body: Some(body),
                            attempt_count: attempt,
                            latency_ms: start.elapsed().as_millis() as u64,
                        };
                    }
                    // 429 is retryable per spec's boundary behavior ("next
                    // attempt obeys Retry-After if present") even though it
                    // is a 4xx status; every other 4xx is not.
                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if !retryable || attempt > target.max_retries {
                        return TargetSendResult {
                            target_type: target.kind,
                            target_name: target_name(target),
                            success: false,
                            status_code: Some(status.as_u16()),
                            error_message: Some(format!("http status {status}")),
                            sent_payload: Some(payload.to_string()),
                            response_body: Some(body),
                            attempt_count: attempt,
                            latency_ms: start.elapsed().as_millis() as u64,
                        };
                    }
                }
                Err(e) => {
                    if attempt > target.max_retries {
                        return error_result(target, attempt, start.elapsed().as_millis() as u64, e.to_string(), payload);
                    }
                }
            }
            let delay = retry_after_ms.unwrap_or_else(|| backoff_delay(target, attempt - 1)).min(target.max_backoff_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

fn error_result(target: &ExportTarget, attempt: u32, latency_ms: u64, error: String, payload: &Value) -> TargetSendResult {
    TargetSendResult {
        target_type: target.kind,
        target_name: target_name(target),
        success: false,
        status_code: None,
        error_message: Some(error),
        sent_payload: Some(payload.to_string()),
        response_body: None,
        attempt_count: attempt.max(1),
        latency_ms,
    }
}

#[async_trait]
impl TargetHandler for HttpTargetHandler {
    async fn initialize(&self, target: &ExportTarget) -> Result<(), ExportError> {
        self.validate_config(target)?;
        let _ = self.client_for(target);
        Ok(())
    }

    async fn send_alarm(&self, target: &ExportTarget, _alarm: &Alarm, payload: &Value) -> TargetSendResult {
        self.send_with_retry(target, payload).await
    }

    async fn send_value_batch(&self, target: &ExportTarget, _values: &[ValueEvent], payload: &Value) -> TargetSendResult {
        self.send_with_retry(target, payload).await
    }

    async fn test_connection(&self, target: &ExportTarget) -> Result<(), ExportError> {
        let url = self.url(target)?;
        let client = self.client_for(target);
        client.get(&url).send().await.map_err(|e| ExportError::Transport(e.to_string()))?;
        Ok(())
    }

    fn validate_config(&self, target: &ExportTarget) -> Result<(), ExportError> {
        if target.transport_config.get("url").and_then(Value::as_str).is_none() {
            return Err(ExportError::Config(format!("target {} missing transport_config.url", target.id)));
        }
        Ok(())
    }

    async fn cleanup(&self, target: &ExportTarget) {
        self.clients.remove(&target.id.to_string());
    }

    fn target_type(&self) -> &'static str {
        "HTTP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::TargetKind;
    use pulse_secrets::SecretsConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn handler() -> HttpTargetHandler {
        let secrets = Arc::new(SecretService::new(&SecretsConfig::default()).await.unwrap());
        HttpTargetHandler::new(secrets)
    }

    fn target(url: String) -> ExportTarget {
        ExportTarget {
            id: 1,
            tenant_id: 1,
            name: "t1".into(),
            kind: TargetKind::Http,
            enabled: true,
            template_id: None,
            transport_config: serde_json::json!({ "url": url }),
            max_retries: 2,
            initial_delay_ms: 10,
            backoff_multiplier: 2.0,
            max_backoff_ms: 100,
            alarm_ignore_minutes: None,
            use_local_time: false,
            max_batch_size: 50,
            batch_timeout_ms: 1000,
            batch_alarms: false,
        }
    }

    #[tokio::test]
    async fn sends_payload_and_reports_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/")).respond_with(ResponseTemplate::new(200).set_body_string("ok")).mount(&server).await;

        let h = handler().await;
        let t = target(server.uri());
        let result = h.send_with_retry(&t, &serde_json::json!({"x": 1})).await;
        assert!(result.success);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.attempt_count, 1);
    }

    #[tokio::test]
    async fn retries_on_500_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let h = handler().await;
        let t = target(server.uri());
        let result = h.send_with_retry(&t, &serde_json::json!({"x": 1})).await;
        assert!(!result.success);
        assert_eq!(result.attempt_count, t.max_retries + 1);
    }

    #[tokio::test]
    async fn non_retryable_4xx_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/")).respond_with(ResponseTemplate::new(400)).mount(&server).await;

        let h = handler().await;
        let t = target(server.uri());
        let result = h.send_with_retry(&t, &serde_json::json!({"x": 1})).await;
        assert!(!result.success);
        assert_eq!(result.attempt_count, 1);
    }

    #[test]
    fn validate_config_rejects_missing_url() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let h = rt.block_on(handler());
        let mut t = target("http://example.com".into());
        t.transport_config = serde_json::json!({});
        assert!(h.validate_config(&t).is_err());
    }
}
