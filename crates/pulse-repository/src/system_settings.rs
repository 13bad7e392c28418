//! `SystemSetting` is a flat key/value table (spec §6), not an
//! autoincrement-id row, so it gets its own tiny repository rather than
//! bending the generic `Entity`/`Repository<E>` machinery around a string
//! primary key used nowhere else.

use crate::dialect::DbContext;
use pulse_common::SystemSetting;
use sqlx::Row;
use tracing::warn;

pub struct SystemSettingsRepository {
    ctx: DbContext,
}

impl SystemSettingsRepository {
    pub fn new(ctx: DbContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match sqlx::query("SELECT value FROM system_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.ctx.pool)
            .await
        {
            Ok(row) => row.and_then(|r| r.try_get::<String, _>("value").ok()),
            Err(e) => {
                warn!(key, error = %e, "system_settings get failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> bool {
        let sql = self.ctx.dialect.upsert_sql("system_settings", &["key", "value"], &["key"]);
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .execute(&self.ctx.pool)
            .await
            .map(|_| true)
            .unwrap_or_else(|e| {
                warn!(key, error = %e, "system_settings set failed");
                false
            })
    }

    pub async fn all(&self) -> Vec<SystemSetting> {
        match sqlx::query("SELECT key, value FROM system_settings").fetch_all(&self.ctx.pool).await {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| {
                    Some(SystemSetting {
                        key: r.try_get::<String, _>("key").ok()?,
                        value: r.try_get::<String, _>("value").ok()?,
                    })
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "system_settings all failed");
                Vec::new()
            }
        }
    }
}
