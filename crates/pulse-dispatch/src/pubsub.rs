//! Out-of-process ingress (spec §4.6 path 2): a pub/sub client subscribed
//! to `alarm:*`, `schedule:*`, `config:*`, `target:*`, `cmd:*` on the cache
//! store, routed through a pattern handler table to `handle_alarm`,
//! `handle_schedule_event`, `handle_config_event` and `handle_command_event`.

use std::sync::Arc;

use futures::StreamExt;
use pulse_common::{Alarm, CollectorCommand};
use pulse_export::ExportCoordinator;
use pulse_repository::{Repository, RepositoryFactory};
use thiserror::Error;
use tracing::{info, warn};

const PATTERNS: [&str; 5] = ["alarm:*", "schedule:*", "config:*", "target:*", "cmd:*"];

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("redis connection error: {0}")]
    Connection(String),
    #[error("redis subscription error: {0}")]
    Subscription(String),
}

/// Routes a single pub/sub message to the handler matching its channel
/// prefix. `collector_id` filters `cmd:<collector_id>` traffic so a
/// dispatcher instance ignores commands addressed to a different
/// collector sharing the same Redis (spec §4.6: "the dispatcher ignores
/// any command not addressed to this collector"). `collector_id: None`
/// means this dispatcher isn't embedded in any one collector (the
/// standalone export-gateway process) and processes `cmd:*` traffic for
/// every server instead of filtering to one.
pub struct PubSubDispatcher {
    redis_url: String,
    repos: Arc<RepositoryFactory>,
    coordinator: Arc<ExportCoordinator>,
    collector_id: Option<String>,
}

impl PubSubDispatcher {
    pub fn new(redis_url: impl Into<String>, repos: Arc<RepositoryFactory>, coordinator: Arc<ExportCoordinator>, collector_id: Option<String>) -> Self {
        Self { redis_url: redis_url.into(), repos, coordinator, collector_id }
    }

    /// Connects and subscribes, then processes messages until the
    /// connection drops or is cancelled. The caller is expected to retry
    /// on error (mirrors `fc-standby`'s reconnect-on-drop pattern for
    /// long-lived Redis streams).
    pub async fn run(&self) -> Result<(), PubSubError> {
        let client = redis::Client::open(self.redis_url.as_str()).map_err(|e| PubSubError::Connection(e.to_string()))?;
        let conn = client.get_async_connection().await.map_err(|e| PubSubError::Connection(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        for pattern in PATTERNS {
            pubsub.psubscribe(pattern).await.map_err(|e| PubSubError::Subscription(e.to_string()))?;
        }
        info!(patterns = ?PATTERNS, "subscribed to dispatch channels");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel: String = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(channel, error = %e, "dropping non-UTF8 pub/sub payload");
                    continue;
                }
            };
            self.route(&channel, &payload).await;
        }
        Ok(())
    }

    async fn route(&self, channel: &str, payload: &str) {
        if channel.starts_with("alarm:") {
            self.handle_alarm(payload).await;
        } else if channel.starts_with("schedule:") {
            self.handle_schedule_event(channel, payload).await;
        } else if channel.starts_with("config:") {
            self.handle_config_event(payload).await;
        } else if channel.starts_with("target:") {
            self.handle_target_event(payload).await;
        } else if channel.starts_with("cmd:") {
            self.handle_command_event(payload).await;
        } else {
            warn!(channel, "pub/sub message on unrecognized channel");
        }
    }

    async fn handle_alarm(&self, payload: &str) {
        match serde_json::from_str::<Alarm>(payload) {
            Ok(alarm) => self.coordinator.dispatch_alarm(alarm).await,
            Err(e) => warn!(error = %e, "malformed alarm payload on alarm:* channel"),
        }
    }

    /// Schedules are read by the binary's own cron-style runner, not by
    /// the dispatcher; a `schedule:<id>` message just means "re-evaluate
    /// this schedule now", so invalidating the export-schedule cache is
    /// all that's needed here.
    async fn handle_schedule_event(&self, channel: &str, _payload: &str) {
        info!(channel, "schedule event received, clearing export-schedule cache");
        self.repos.export_schedules.clear_cache();
    }

    /// Config and target channels trigger a hot reload of target configs
    /// (spec §4.6): evicting the relevant repository caches is equivalent
    /// to the original's `registry.loadFromDatabase()` since every read
    /// here goes back through the repository layer.
    async fn handle_config_event(&self, _payload: &str) {
        info!("config:reload received, clearing all repository caches");
        self.repos.clear_all_caches();
    }

    async fn handle_target_event(&self, _payload: &str) {
        info!("target:reload received, clearing export target caches");
        self.repos.export_targets.clear_cache();
        self.repos.export_target_mappings.clear_cache();
        self.repos.payload_templates.clear_cache();
    }

    async fn handle_command_event(&self, payload: &str) {
        let command: CollectorCommand = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "malformed command payload on cmd:* channel");
                return;
            }
        };
        if let Some(collector_id) = &self.collector_id {
            if &command.server_id != collector_id {
                return;
            }
        }
        match command.command.as_str() {
            "MANUAL_EXPORT" => self.handle_manual_export(command.payload).await,
            other => warn!(command = other, "unrecognized command"),
        }
    }

    async fn handle_manual_export(&self, payload: serde_json::Value) {
        let Some(target_name) = payload.get("target_name").and_then(|v| v.as_str()) else {
            warn!("MANUAL_EXPORT command missing target_name");
            return;
        };
        let alarm: Alarm = match serde_json::from_value(payload.get("alarm").cloned().unwrap_or(serde_json::Value::Null)) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "MANUAL_EXPORT command has malformed alarm body");
                return;
            }
        };
        if let Err(e) = self.coordinator.send_alarm_to_target(target_name, alarm).await {
            warn!(target_name, error = %e, "MANUAL_EXPORT dispatch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::AlarmStatus;
    use pulse_secrets::SecretService;
    use std::collections::HashMap;

    async fn dispatcher() -> PubSubDispatcher {
        let repos = Arc::new(RepositoryFactory::connect("sqlite::memory:", 5).await.unwrap());
        let secrets = Arc::new(SecretService::new(&pulse_secrets::SecretsConfig::default()).await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(ExportCoordinator::new(repos.clone(), secrets, dir.path(), true, 14, 60));
        PubSubDispatcher::new("redis://127.0.0.1:1", repos, coordinator, Some("collector-1".to_string()))
    }

    #[tokio::test]
    async fn command_for_a_different_collector_is_ignored() {
        let dispatcher = dispatcher().await;
        let command = CollectorCommand { server_id: "collector-2".into(), command: "MANUAL_EXPORT".into(), payload: serde_json::json!({}) };
        dispatcher.handle_command_event(&serde_json::to_string(&command).unwrap()).await;
    }

    #[tokio::test]
    async fn manual_export_with_unknown_target_logs_and_does_not_panic() {
        let dispatcher = dispatcher().await;
        let alarm = Alarm {
            site_id: 1,
            point_id: None,
            point_name: None,
            description: None,
            measured_value: pulse_common::RawValue::Bool(true),
            timestamp: chrono::Utc::now(),
            alarm_flag: true,
            status: AlarmStatus::Alert,
            manual_override: true,
            extra_info: Some(serde_json::json!({"msg": "hi"})),
            custom_vars: HashMap::new(),
        };
        let command = CollectorCommand {
            server_id: "collector-1".into(),
            command: "MANUAL_EXPORT".into(),
            payload: serde_json::json!({ "target_name": "does-not-exist", "alarm": alarm }),
        };
        dispatcher.handle_command_event(&serde_json::to_string(&command).unwrap()).await;
    }

    #[tokio::test]
    async fn malformed_alarm_payload_does_not_panic() {
        let dispatcher = dispatcher().await;
        dispatcher.handle_alarm("not json").await;
    }
}
