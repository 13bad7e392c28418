//! Failed-alarm disk queue (spec §4.9 step 5, §6 "Persisted state on disk").
//!
//! On exhausted retries an alarm dispatch is written to
//! `failed_file_path/<ts>.json` instead of dropped. A background sweep
//! (wired by [`crate::coordinator::ExportCoordinator::run_disk_retry_loop`],
//! the same `tokio::time::interval` + `MissedTickBehavior::Skip` shape as
//! `fc-outbox::recovery::RecoveryTask::run`) periodically retries every file
//! still on disk; a retry that succeeds is deleted if
//! `auto_cleanup_success_files` is set, otherwise retained up to
//! `keep_failed_files_days`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pulse_common::{Alarm, ExportTarget};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAlarmEntry {
    pub target_id: i64,
    pub alarm: Alarm,
    pub queued_at: DateTime<Utc>,
}

pub struct FailedAlarmQueue {
    dir: PathBuf,
}

impl FailedAlarmQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Writes one failed alarm as `failed_file_path/<unix_ms>-<target_id>.json`.
    pub async fn enqueue(&self, target: &ExportTarget, alarm: &Alarm) -> std::io::Result<PathBuf> {
        self.ensure_dir().await?;
        let entry = FailedAlarmEntry { target_id: target.id, alarm: alarm.clone(), queued_at: Utc::now() };
        let file_name = format!("{}-{}.json", entry.queued_at.timestamp_millis(), target.id);
        let path = self.dir.join(file_name);
        let body = serde_json::to_vec_pretty(&entry)?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    /// Lists every queued entry currently on disk, skipping files that fail
    /// to parse (logged, not fatal — a corrupt file must not wedge the
    /// retry sweep).
    pub async fn list(&self) -> Vec<(PathBuf, FailedAlarmEntry)> {
        let mut out = Vec::new();
        let Ok(mut read_dir) = tokio::fs::read_dir(&self.dir).await else {
            return out;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<FailedAlarmEntry>(&bytes) {
                    Ok(parsed) => out.push((path, parsed)),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to parse queued alarm file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read queued alarm file"),
            }
        }
        out
    }

    pub async fn remove(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove queued alarm file after successful retry");
        }
    }

    /// Deletes files older than `keep_failed_files_days` (spec §4.9 step 5
    /// retention for entries still failing after the window).
    pub async fn prune_older_than(&self, keep_days: u32) {
        let cutoff = Utc::now() - chrono::Duration::days(keep_days as i64);
        for (path, entry) in self.list().await {
            if entry.queued_at < cutoff {
                self.remove(&path).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::{AlarmStatus, RawValue, TargetKind};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn sample_alarm() -> Alarm {
        Alarm {
            site_id: 1,
            point_id: Some(1),
            point_name: Some("p".into()),
            description: None,
            measured_value: RawValue::Int(1),
            timestamp: Utc::now(),
            alarm_flag: true,
            status: AlarmStatus::Alert,
            manual_override: false,
            extra_info: None,
            custom_vars: HashMap::new(),
        }
    }

    fn sample_target() -> ExportTarget {
        ExportTarget {
            id: 9,
            tenant_id: 1,
            name: "t".into(),
            kind: TargetKind::Http,
            enabled: true,
            template_id: None,
            transport_config: serde_json::json!({}),
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 1000,
            alarm_ignore_minutes: None,
            use_local_time: false,
            max_batch_size: 50,
            batch_timeout_ms: 1000,
            batch_alarms: false,
        }
    }

    #[tokio::test]
    async fn enqueue_then_list_round_trips() {
        let dir = tempdir().unwrap();
        let queue = FailedAlarmQueue::new(dir.path());
        queue.enqueue(&sample_target(), &sample_alarm()).await.unwrap();
        let entries = queue.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.target_id, 9);
    }

    #[tokio::test]
    async fn remove_deletes_the_file() {
        let dir = tempdir().unwrap();
        let queue = FailedAlarmQueue::new(dir.path());
        let path = queue.enqueue(&sample_target(), &sample_alarm()).await.unwrap();
        queue.remove(&path).await;
        assert!(queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn prune_removes_only_entries_past_the_cutoff() {
        let dir = tempdir().unwrap();
        let queue = FailedAlarmQueue::new(dir.path());
        queue.enqueue(&sample_target(), &sample_alarm()).await.unwrap();
        queue.prune_older_than(14).await;
        assert_eq!(queue.list().await.len(), 1);
        queue.prune_older_than(0).await;
        assert!(queue.list().await.is_empty());
    }
}
