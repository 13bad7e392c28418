//! `TargetHandler` trait (spec §4.7 `ITargetHandler`): the interface every
//! export transport (HTTP, S3, MQTT, file) implements behind the closed
//! tagged-dispatch factory in [`crate::handlers`].

use async_trait::async_trait;
use pulse_common::{Alarm, ExportTarget, TargetSendResult};
use serde_json::Value;

use crate::coordinator::ValueEvent;
use crate::ExportError;

/// The coordinator resolves the template and runs [`crate::transform`]
/// before calling a handler (spec §4.9 step 3 is the coordinator's job, not
/// the handler's) — handlers receive the already-rendered `payload` plus
/// the originating event for anything transport-specific that isn't part of
/// the JSON body itself (an S3 object key, a file's target filename).
#[async_trait]
pub trait TargetHandler: Send + Sync {
    /// Called once when a target is first resolved; handlers that pool a
    /// transport client (HTTP, MQTT) use this to warm it.
    async fn initialize(&self, target: &ExportTarget) -> Result<(), ExportError>;

    async fn send_alarm(&self, target: &ExportTarget, alarm: &Alarm, payload: &Value) -> TargetSendResult;

    async fn send_value_batch(&self, target: &ExportTarget, values: &[ValueEvent], payload: &Value) -> TargetSendResult;

    async fn test_connection(&self, target: &ExportTarget) -> Result<(), ExportError>;

    fn validate_config(&self, target: &ExportTarget) -> Result<(), ExportError>;

    /// Releases any pooled resources held for `target` (spec §4.7 cleanup).
    async fn cleanup(&self, target: &ExportTarget);

    fn target_type(&self) -> &'static str;
}

/// `initial_delay_ms * multiplier^attempt`, the backoff curve used by every
/// handler's retry loop (grounded on `HttpTargetHandler::calculateBackoffDelay`
/// and capped the same way the collector's driver backoff is, spec §4.3).
pub fn backoff_delay(target: &ExportTarget, attempt: u32) -> u64 {
    let raw = target.initial_delay_ms as f64 * target.backoff_multiplier.powi(attempt as i32);
    (raw as u64).min(target.max_backoff_ms)
}

pub fn target_name(target: &ExportTarget) -> String {
    format!("{}:{}", target.kind.as_str(), target.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::TargetKind;

    fn target() -> ExportTarget {
        ExportTarget {
            id: 1,
            tenant_id: 1,
            name: "test-target".into(),
            kind: TargetKind::Http,
            enabled: true,
            template_id: None,
            transport_config: serde_json::json!({}),
            max_retries: 5,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            alarm_ignore_minutes: None,
            use_local_time: false,
            max_batch_size: 50,
            batch_timeout_ms: 1000,
            batch_alarms: false,
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let t = target();
        assert_eq!(backoff_delay(&t, 0), 100);
        assert_eq!(backoff_delay(&t, 1), 200);
        assert_eq!(backoff_delay(&t, 2), 400);
        assert_eq!(backoff_delay(&t, 10), 10_000);
    }

    #[test]
    fn target_name_combines_kind_and_name() {
        assert_eq!(target_name(&target()), "http:test-target");
    }
}
