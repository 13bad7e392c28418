//! File target handler (spec §4.7): appends each payload as a JSON line to
//! `<transport_config.directory>/<point_name>.json`, one file per point. The
//! simplest of the four handlers — no client to pool, no auth to expand —
//! but it still goes through the closed [`TargetHandler`] dispatch so the
//! coordinator doesn't special-case it.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_common::{Alarm, ExportTarget, TargetSendResult};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::coordinator::ValueEvent;
use crate::handler::{target_name, TargetHandler};
use crate::ExportError;

pub struct FileTargetHandler {
    write_lock: Mutex<()>,
}

impl FileTargetHandler {
    pub fn new() -> Self {
        Self { write_lock: Mutex::new(()) }
    }

    fn directory(&self, target: &ExportTarget) -> Result<PathBuf, ExportError> {
        let dir = target.transport_config.get("directory").and_then(Value::as_str).ok_or_else(|| ExportError::Config(format!("target {} missing transport_config.directory", target.id)))?;
        Ok(PathBuf::from(dir))
    }

    /// `<directory>/<point_name>.json`. `point_name` comes from the event,
    /// never from target config, so a batch spanning several points fans
    /// out to several files.
    fn file_path(&self, target: &ExportTarget, point_name: &str) -> Result<PathBuf, ExportError> {
        let safe_name = sanitize_file_component(point_name);
        Ok(self.directory(target)?.join(format!("{safe_name}.json")))
    }

    async fn append_line(&self, target: &ExportTarget, point_name: &str, payload: &Value) -> TargetSendResult {
        let start = std::time::Instant::now();
        let body = payload.to_string();

        let result = async {
            let path = self.file_path(target, point_name)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(ExportError::DiskQueue)?;
            }
            let _guard = self.write_lock.lock();
            let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await.map_err(ExportError::DiskQueue)?;
            file.write_all(body.as_bytes()).await.map_err(ExportError::DiskQueue)?;
            file.write_all(b"\n").await.map_err(ExportError::DiskQueue)?;
            Ok::<(), ExportError>(())
        }
        .await;

        match result {
            Ok(()) => TargetSendResult {
                target_type: target.kind,
                target_name: target_name(target),
                success: true,
                status_code: None,
                error_message: None,
                sent_payload: Some(body),
                response_body: None,
                attempt_count: 1,
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => TargetSendResult {
                target_type: target.kind,
                target_name: target_name(target),
                success: false,
                status_code: None,
                error_message: Some(e.to_string()),
                sent_payload: Some(body),
                response_body: None,
                attempt_count: 1,
                latency_ms: start.elapsed().as_millis() as u64,
            },
        }
    }
}

/// Point names come from device config, not from a trusted operator
/// console, so strip path separators before using one as a filename.
fn sanitize_file_component(name: &str) -> String {
    let cleaned: String = name.chars().map(|c| if c == '/' || c == '\\' || c == '.' { '_' } else { c }).collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

impl Default for FileTargetHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetHandler for FileTargetHandler {
    async fn initialize(&self, target: &ExportTarget) -> Result<(), ExportError> {
        self.validate_config(target)
    }

    async fn send_alarm(&self, target: &ExportTarget, alarm: &Alarm, payload: &Value) -> TargetSendResult {
        let point_name = alarm.point_name.clone().unwrap_or_else(|| "alarm".to_string());
        self.append_line(target, &point_name, payload).await
    }

    /// Each value in the batch writes to its own `<point_name>.json`, so the
    /// combined `payload` array is split back out per value before writing.
    async fn send_value_batch(&self, target: &ExportTarget, values: &[ValueEvent], payload: &Value) -> TargetSendResult {
        if values.is_empty() {
            return TargetSendResult {
                target_type: target.kind,
                target_name: target_name(target),
                success: true,
                status_code: None,
                error_message: None,
                sent_payload: Some(payload.to_string()),
                response_body: None,
                attempt_count: 0,
                latency_ms: 0,
            };
        }

        let start = std::time::Instant::now();
        let bodies: Vec<Value> = payload.as_array().cloned().unwrap_or_else(|| values.iter().map(|_| payload.clone()).collect());

        let mut success = true;
        let mut errors = Vec::new();
        for (value, body) in values.iter().zip(bodies.iter()) {
            let result = self.append_line(target, &value.point_name, body).await;
            if !result.success {
                success = false;
                if let Some(e) = result.error_message {
                    errors.push(e);
                }
            }
        }

        TargetSendResult {
            target_type: target.kind,
            target_name: target_name(target),
            success,
            status_code: None,
            error_message: if errors.is_empty() { None } else { Some(errors.join("; ")) },
            sent_payload: Some(payload.to_string()),
            response_body: None,
            attempt_count: values.len() as u32,
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn test_connection(&self, target: &ExportTarget) -> Result<(), ExportError> {
        let path = self.directory(target)?;
        tokio::fs::create_dir_all(&path).await.map_err(ExportError::DiskQueue)?;
        Ok(())
    }

    fn validate_config(&self, target: &ExportTarget) -> Result<(), ExportError> {
        if target.transport_config.get("directory").and_then(Value::as_str).is_none() {
            return Err(ExportError::Config(format!("target {} missing transport_config.directory", target.id)));
        }
        Ok(())
    }

    async fn cleanup(&self, _target: &ExportTarget) {}

    fn target_type(&self) -> &'static str {
        "FILE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::TargetKind;
    use tempfile::tempdir;

    fn target(dir: &std::path::Path) -> ExportTarget {
        ExportTarget {
            id: 1,
            tenant_id: 1,
            name: "file-1".into(),
            kind: TargetKind::File,
            enabled: true,
            template_id: None,
            transport_config: serde_json::json!({ "directory": dir.to_string_lossy() }),
            max_retries: 0,
            initial_delay_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
            alarm_ignore_minutes: None,
            use_local_time: false,
            max_batch_size: 50,
            batch_timeout_ms: 1000,
            batch_alarms: false,
        }
    }

    #[tokio::test]
    async fn appends_payload_as_jsonl() {
        let dir = tempdir().unwrap();
        let handler = FileTargetHandler::new();
        let t = target(dir.path());
        let result = handler.append_line(&t, "temperature", &serde_json::json!({"x": 1})).await;
        assert!(result.success);
        let contents = tokio::fs::read_to_string(dir.path().join("temperature.json")).await.unwrap();
        assert_eq!(contents, "{\"x\":1}\n");
    }

    #[tokio::test]
    async fn second_write_appends_rather_than_overwrites() {
        let dir = tempdir().unwrap();
        let handler = FileTargetHandler::new();
        let t = target(dir.path());
        handler.append_line(&t, "temperature", &serde_json::json!({"x": 1})).await;
        handler.append_line(&t, "temperature", &serde_json::json!({"x": 2})).await;
        let contents = tokio::fs::read_to_string(dir.path().join("temperature.json")).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn distinct_points_write_distinct_files() {
        let dir = tempdir().unwrap();
        let handler = FileTargetHandler::new();
        let t = target(dir.path());
        handler.append_line(&t, "temperature", &serde_json::json!({"x": 1})).await;
        handler.append_line(&t, "humidity", &serde_json::json!({"x": 2})).await;
        assert!(dir.path().join("temperature.json").exists());
        assert!(dir.path().join("humidity.json").exists());
    }

    #[test]
    fn validate_config_rejects_missing_directory() {
        let handler = FileTargetHandler::new();
        let mut t = target(std::path::Path::new("/tmp"));
        t.transport_config = serde_json::json!({});
        assert!(handler.validate_config(&t).is_err());
    }
}
