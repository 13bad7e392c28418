//! Export Coordinator (spec §4.9 C9): the six-step dispatch algorithm that
//! turns one inbound alarm or value-changed event into concurrent sends
//! across every applicable [`crate::handler::TargetHandler`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use parking_lot::Mutex;
use pulse_common::{Alarm, ExportLog, ExportTarget, RawValue, TargetKind, TemplateCategory, TimestampedValue};
use pulse_repository::{Condition, RepositoryFactory};
use pulse_secrets::SecretService;
use serde_json::Value;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::disk_queue::FailedAlarmQueue;
use crate::handlers::build_handler;
use crate::transformer::{default_template_body, transform, transport_default_category, TransformContext};
use crate::ExportError;

/// A point value enriched with the context the transformer needs, built by
/// the coordinator from `DispatchEvent::Value` plus a `DataPoint`/`Device`
/// lookup — `pulse_common::DispatchEvent` only carries `device_id` and a
/// bare `TimestampedValue`. Lives here, not in `pulse-common`, since only
/// the export side needs the richer shape and `pulse-common` would
/// otherwise gain an export-specific struct every other crate has to see.
#[derive(Debug, Clone)]
pub struct ValueEvent {
    pub site_id: i64,
    pub point_id: i64,
    pub point_name: String,
    pub description: Option<String>,
    pub value: RawValue,
    pub timestamp: DateTime<Utc>,
}

impl ValueEvent {
    pub fn transform_context(&self) -> TransformContext {
        TransformContext::from_value(self.site_id, self.point_id, &self.point_name, self.description.as_deref(), &self.value, self.timestamp)
    }
}

struct PendingBatch {
    values: Vec<ValueEvent>,
    opened_at: std::time::Instant,
}

pub struct ExportCoordinator {
    repos: Arc<RepositoryFactory>,
    secrets: Arc<SecretService>,
    disk_queue: Arc<FailedAlarmQueue>,
    auto_cleanup_success_files: bool,
    keep_failed_files_days: u32,
    disk_retry_interval_secs: u64,
    handlers: Mutex<HashMap<TargetKind, Arc<dyn crate::handler::TargetHandler>>>,
    batches: Mutex<HashMap<i64, PendingBatch>>,
}

impl ExportCoordinator {
    pub fn new(repos: Arc<RepositoryFactory>, secrets: Arc<SecretService>, failed_file_path: impl Into<std::path::PathBuf>, auto_cleanup_success_files: bool, keep_failed_files_days: u32, disk_retry_interval_secs: u64) -> Self {
        Self {
            repos,
            secrets,
            disk_queue: Arc::new(FailedAlarmQueue::new(failed_file_path)),
            auto_cleanup_success_files,
            keep_failed_files_days,
            disk_retry_interval_secs,
            handlers: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
        }
    }

    fn handler_for(&self, kind: TargetKind) -> Arc<dyn crate::handler::TargetHandler> {
        let mut handlers = self.handlers.lock();
        handlers.entry(kind).or_insert_with(|| build_handler(kind, Arc::clone(&self.secrets))).clone()
    }

    /// spec §4.9 step 1: targets applicable to a site/point, including
    /// catch-all mappings (neither `point_id` nor `site_id` set).
    async fn applicable_targets(&self, site_id: i64, point_id: Option<i64>) -> Vec<ExportTarget> {
        let targets = self.repos.export_targets.find_by_conditions(&[Condition::eq("enabled", true)], None, None).await;
        let mut out = Vec::new();
        for target in targets {
            let mappings = self.repos.export_target_mappings.find_by_conditions(&[Condition::eq("target_id", target.id)], None, None).await;
            if mappings.is_empty() || mappings.iter().any(|m| m.is_catch_all() || m.site_id == Some(site_id) || (point_id.is_some() && m.point_id == point_id)) {
                out.push(target);
            }
        }
        out
    }

    /// spec §4.9 step 2: drop alarms older than `alarm_ignore_minutes`. Per
    /// `target.use_local_time` (spec §9 Open Question 3), the elapsed time is
    /// measured either against wall-clock UTC or against this collector's
    /// local wall-clock reading of both ends — the two diverge right around
    /// a DST transition, which the spec explicitly says to leave uncorrected
    /// rather than auto-adjust.
    fn within_time_window(target: &ExportTarget, timestamp: DateTime<Utc>) -> bool {
        match target.alarm_ignore_minutes {
            Some(minutes) if minutes > 0 => {
                let elapsed = if target.use_local_time {
                    let now_local = Local::now().naive_local();
                    let ts_local = Local.from_utc_datetime(&timestamp.naive_utc()).naive_local();
                    now_local.signed_duration_since(ts_local)
                } else {
                    Utc::now().signed_duration_since(timestamp)
                };
                elapsed <= chrono::Duration::minutes(minutes)
            }
            _ => true,
        }
    }

    /// spec §4.9 step 3: target.template_id → PayloadTemplate, else
    /// transport-default (see `transport_default_category`, decided in
    /// DESIGN.md's Open Question record).
    async fn resolve_template(&self, target: &ExportTarget) -> Value {
        if let Some(id) = target.template_id {
            if let Some(template) = self.repos.payload_templates.find_by_id(id).await {
                return template.body;
            }
            warn!(target_id = target.id, template_id = id, "configured template not found, falling back to transport default");
        }
        default_template_body(transport_default_category(target.kind))
    }

    async fn log_attempt(&self, target_id: i64, attempt_count: u32, success: bool, status_code: Option<u16>, sent_payload: Option<String>, response_body: Option<String>, error_message: Option<String>, started_at: DateTime<Utc>, latency_ms: u64) {
        let mut log = ExportLog { id: 0, target_id, attempt_count, success, status_code, sent_payload, response_body, error_message, started_at, finished_at: Utc::now(), latency_ms };
        self.repos.export_logs.save(&mut log).await;
    }

    /// spec §4.9 full algorithm, alarm branch. `manual_override` bypasses
    /// the transformer entirely and sends `alarm.extra_info` verbatim.
    pub async fn dispatch_alarm(&self, alarm: Alarm) {
        let targets = self.applicable_targets(alarm.site_id, alarm.point_id).await;
        let mut sends = Vec::new();
        for target in targets {
            if !Self::within_time_window(&target, alarm.timestamp) {
                continue;
            }
            let alarm = alarm.clone();
            sends.push(self.dispatch_alarm_to_target(target, alarm));
        }
        futures::future::join_all(sends).await;
    }

    async fn dispatch_alarm_to_target(&self, target: ExportTarget, alarm: Alarm) {
        let started_at = Utc::now();
        let payload = if alarm.manual_override {
            alarm.extra_info.clone().unwrap_or(Value::Null)
        } else {
            let template = self.resolve_template(&target).await;
            let ctx = TransformContext::from_alarm(&alarm);
            transform(&template, &ctx)
        };

        let handler = self.handler_for(target.kind);
        let result = handler.send_alarm(&target, &alarm, &payload).await;

        self.log_attempt(target.id, result.attempt_count, result.success, result.status_code, result.sent_payload.clone(), result.response_body.clone(), result.error_message.clone(), started_at, result.latency_ms).await;

        if !result.success {
            if let Err(e) = self.disk_queue.enqueue(&target, &alarm).await {
                error!(target_id = target.id, error = %e, "failed to persist alarm to failed-alarm disk queue");
            }
        }
    }

    /// spec §4.9 value branch plus batching: accumulates per-target until
    /// `max_batch_size` or `batch_timeout_ms`, whichever trips first.
    pub async fn dispatch_value(&self, device_id: i64, value: TimestampedValue) {
        let Some(device) = self.repos.devices.find_by_id(device_id).await else {
            warn!(device_id, "dispatch_value: device not found, dropping event");
            return;
        };
        let point = self.repos.data_points.find_by_id(value.point_id).await;
        let (point_name, description) = point.map(|p| (p.name, p.description)).unwrap_or_else(|| (format!("point-{}", value.point_id), None));

        let event = ValueEvent { site_id: device.site_id, point_id: value.point_id, point_name, description, value: value.value, timestamp: value.timestamp };

        let targets = self.applicable_targets(device.site_id, Some(value.point_id)).await;
        for target in targets {
            self.accumulate(target, event.clone()).await;
        }
    }

    async fn accumulate(&self, target: ExportTarget, event: ValueEvent) {
        let flush_batch = {
            let mut batches = self.batches.lock();
            let batch = batches.entry(target.id).or_insert_with(|| PendingBatch { values: Vec::new(), opened_at: std::time::Instant::now() });
            batch.values.push(event);
            let timed_out = batch.opened_at.elapsed() >= Duration::from_millis(target.batch_timeout_ms);
            let full = batch.values.len() as u32 >= target.max_batch_size;
            if timed_out || full {
                batches.remove(&target.id).map(|b| b.values)
            } else {
                None
            }
        };

        if let Some(values) = flush_batch {
            self.flush_value_batch(target, values).await;
        }
    }

    /// Flushes every batch still open past its `batch_timeout_ms`, regardless
    /// of fill level. Intended to be called on a timer by the binary wiring
    /// this coordinator so a slow trickle of values doesn't wait forever for
    /// `max_batch_size` to be reached.
    pub async fn flush_timed_out_batches(&self) {
        let targets = self.repos.export_targets.find_by_conditions(&[Condition::eq("enabled", true)], None, None).await;
        let timeouts: HashMap<i64, u64> = targets.iter().map(|t| (t.id, t.batch_timeout_ms)).collect();

        let due: Vec<(i64, Vec<ValueEvent>)> = {
            let mut batches = self.batches.lock();
            let due_ids: Vec<i64> = batches.iter().filter(|(id, b)| timeouts.get(id).map(|ms| b.opened_at.elapsed() >= Duration::from_millis(*ms)).unwrap_or(true)).map(|(id, _)| *id).collect();
            due_ids.into_iter().filter_map(|id| batches.remove(&id).map(|b| (id, b.values))).collect()
        };

        for (target_id, values) in due {
            if let Some(target) = targets.iter().find(|t| t.id == target_id).cloned() {
                self.flush_value_batch(target, values).await;
            }
        }
    }

    async fn flush_value_batch(&self, target: ExportTarget, values: Vec<ValueEvent>) {
        if values.is_empty() {
            return;
        }
        let started_at = Utc::now();
        let template = self.resolve_template(&target).await;
        let rendered: Vec<Value> = values.iter().map(|v| transform(&template, &v.transform_context())).collect();
        let payload = Value::Array(rendered);

        let handler = self.handler_for(target.kind);
        let result = handler.send_value_batch(&target, &values, &payload).await;

        self.log_attempt(target.id, result.attempt_count, result.success, result.status_code, result.sent_payload.clone(), result.response_body.clone(), result.error_message.clone(), started_at, result.latency_ms).await;

        if !result.success {
            warn!(target_id = target.id, count = values.len(), "value batch dispatch failed; value batches are not persisted to the failed-alarm disk queue per spec");
        }
    }

    /// Background retry sweep over the failed-alarm disk queue (spec §4.9
    /// step 5), shaped after `fc-outbox::recovery::RecoveryTask::run`: a
    /// `tokio::time::interval` with `MissedTickBehavior::Skip` so a slow
    /// tick never compounds into a burst of queued ticks.
    pub async fn run_disk_retry_loop(&self) {
        let mut ticker = interval(Duration::from_secs(self.disk_retry_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.retry_disk_queue_once().await;
        }
    }

    pub async fn retry_disk_queue_once(&self) {
        for (path, entry) in self.disk_queue.list().await {
            let Some(target) = self.repos.export_targets.find_by_id(entry.target_id).await else {
                self.disk_queue.remove(&path).await;
                continue;
            };
            let started_at = Utc::now();
            let payload = if entry.alarm.manual_override {
                entry.alarm.extra_info.clone().unwrap_or(Value::Null)
            } else {
                let template = self.resolve_template(&target).await;
                transform(&template, &TransformContext::from_alarm(&entry.alarm))
            };
            let handler = self.handler_for(target.kind);
            let result = handler.send_alarm(&target, &entry.alarm, &payload).await;
            self.log_attempt(target.id, result.attempt_count, result.success, result.status_code, result.sent_payload.clone(), result.response_body.clone(), result.error_message.clone(), started_at, result.latency_ms).await;

            if result.success {
                if self.auto_cleanup_success_files {
                    self.disk_queue.remove(&path).await;
                }
            } else {
                info!(target_id = target.id, path = %path.display(), "disk-queued alarm retry still failing");
            }
        }
        self.disk_queue.prune_older_than(self.keep_failed_files_days).await;
    }

    pub async fn validate_target(&self, target: &ExportTarget) -> Result<(), ExportError> {
        self.handler_for(target.kind).validate_config(target)
    }

    pub async fn test_target_connection(&self, target: &ExportTarget) -> Result<(), ExportError> {
        self.handler_for(target.kind).test_connection(target).await
    }

    pub fn failed_queue_len(&self) -> usize {
        self.batches.lock().values().map(|b| b.values.len()).sum()
    }

    /// Depth of the on-disk failed-alarm retry queue (spec §4.9 step 5),
    /// surfaced by the export-gateway's `/status` endpoint.
    pub async fn disk_queue_len(&self) -> usize {
        self.disk_queue.list().await.len()
    }

    pub fn template_category_for(kind: TargetKind) -> TemplateCategory {
        transport_default_category(kind)
    }

    /// spec §4.6: the `cmd:<collector_id>` pub/sub channel's `MANUAL_EXPORT`
    /// command resolves a target by name and sends one alarm to it directly,
    /// bypassing the mapping/time-window filtering that `dispatch_alarm`
    /// applies for the automatic fan-out path.
    pub async fn send_alarm_to_target(&self, target_name: &str, alarm: Alarm) -> Result<(), ExportError> {
        let targets = self.repos.export_targets.find_all().await;
        let target = targets
            .into_iter()
            .find(|t| t.name == target_name)
            .ok_or_else(|| ExportError::Config(format!("export target not found: {target_name}")))?;
        self.dispatch_alarm_to_target(target, alarm).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::{AlarmStatus, DataPoint, DataType, Device, Protocol, ProtocolType, Quality, Scaling};
    use std::collections::HashMap;
    use tempfile::tempdir;

    async fn seeded_coordinator() -> (ExportCoordinator, i64, i64, tempfile::TempDir) {
        let repos = Arc::new(RepositoryFactory::connect("sqlite::memory:", 5).await.unwrap());
        let secrets = Arc::new(SecretService::new(&pulse_secrets::SecretsConfig::default()).await.unwrap());

        let mut protocol = Protocol { id: 0, protocol_type: ProtocolType::ModbusTcp, category: "industrial".into(), default_port: Some(502), uses_serial: false, requires_broker: false, supported_operations: vec!["read".into()], supported_data_types: vec!["int16".into()], connection_params_schema: serde_json::json!({}) };
        repos.protocols.save(&mut protocol).await;

        let now = Utc::now();
        let mut device = Device { id: 0, tenant_id: 1, site_id: 7, edge_server_id: None, name: "d1".into(), protocol_id: protocol.id, endpoint: "x".into(), config_blob: serde_json::json!({}), enabled: true, polling_interval_ms: 1000, timeout_ms: 1000, retry_count: 1, created_at: now, updated_at: now };
        repos.devices.save(&mut device).await;

        let mut point = DataPoint { id: 0, device_id: device.id, name: "temp".into(), description: Some("boiler temp".into()), address: 0, data_type: DataType::Float, access_mode: pulse_common::AccessMode::Read, enabled: true, scaling: Scaling::default(), unit: None, logging_enabled: true, logging_interval_ms: 1000, deadband: 0.0, tags: vec![], protocol_params: serde_json::json!({}) };
        repos.data_points.save(&mut point).await;

        let dir = tempdir().unwrap();
        let coordinator = ExportCoordinator::new(repos.clone(), secrets, dir.path(), true, 14, 60);
        (coordinator, device.id, point.id, dir)
    }

    fn sample_alarm(site_id: i64, point_id: i64) -> Alarm {
        Alarm { site_id, point_id: Some(point_id), point_name: Some("temp".into()), description: Some("boiler temp".into()), measured_value: RawValue::Float(99.0), timestamp: Utc::now(), alarm_flag: true, status: AlarmStatus::Alert, manual_override: false, extra_info: None, custom_vars: HashMap::new() }
    }

    #[tokio::test]
    async fn dispatch_alarm_with_no_targets_is_a_no_op() {
        let (coordinator, _device_id, point_id, _dir) = seeded_coordinator().await;
        coordinator.dispatch_alarm(sample_alarm(7, point_id)).await;
    }

    #[tokio::test]
    async fn dispatch_alarm_writes_to_disk_queue_when_target_send_fails() {
        let (coordinator, _device_id, point_id, _dir) = seeded_coordinator().await;

        let mut target = ExportTarget {
            id: 0,
            tenant_id: 1,
            name: "unreachable".into(),
            kind: TargetKind::Http,
            enabled: true,
            template_id: None,
            transport_config: serde_json::json!({ "url": "http://127.0.0.1:1" }),
            max_retries: 0,
            initial_delay_ms: 10,
            backoff_multiplier: 1.0,
            max_backoff_ms: 10,
            alarm_ignore_minutes: None,
            use_local_time: false,
            max_batch_size: 50,
            batch_timeout_ms: 1000,
            batch_alarms: false,
        };
        coordinator.repos.export_targets.save(&mut target).await;

        coordinator.dispatch_alarm(sample_alarm(7, point_id)).await;
        let entries = coordinator.disk_queue.list().await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn time_window_filters_stale_alarms() {
        let target = ExportTarget {
            id: 1,
            tenant_id: 1,
            name: "t".into(),
            kind: TargetKind::Http,
            enabled: true,
            template_id: None,
            transport_config: serde_json::json!({}),
            max_retries: 0,
            initial_delay_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
            alarm_ignore_minutes: Some(5),
            use_local_time: false,
            max_batch_size: 50,
            batch_timeout_ms: 1000,
            batch_alarms: false,
        };
        let stale = Utc::now() - chrono::Duration::minutes(10);
        assert!(!ExportCoordinator::within_time_window(&target, stale));
        let fresh = Utc::now() - chrono::Duration::minutes(1);
        assert!(ExportCoordinator::within_time_window(&target, fresh));
    }

    #[tokio::test]
    async fn value_batch_flushes_once_max_batch_size_reached() {
        let (coordinator, device_id, point_id, _dir) = seeded_coordinator().await;

        let mut target = ExportTarget {
            id: 0,
            tenant_id: 1,
            name: "batcher".into(),
            kind: TargetKind::File,
            enabled: true,
            template_id: None,
            transport_config: serde_json::json!({ "directory": std::env::temp_dir().join("pulseone-export-test") }),
            max_retries: 0,
            initial_delay_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
            alarm_ignore_minutes: None,
            use_local_time: false,
            max_batch_size: 2,
            batch_timeout_ms: 600_000,
            batch_alarms: false,
        };
        coordinator.repos.export_targets.save(&mut target).await;

        for _ in 0..2 {
            coordinator
                .dispatch_value(device_id, TimestampedValue { point_id, value: RawValue::Float(1.0), quality: Quality::Good, timestamp: Utc::now(), sequence: 1 })
                .await;
        }

        assert!(coordinator.batches.lock().get(&target.id).is_none());
    }
}
