//! Cache / pub-sub store abstraction (spec §6 "Cache / pub-sub store
//! (Redis-compatible)"). Narrow on purpose: the core only ever needs to
//! write a point's current value and publish a JSON message on a channel.
//! Subscribing is channel-pattern-specific plumbing that lives with its
//! one caller (`pulse-dispatch`'s pub/sub ingress, spec §4.6) rather than
//! here.

use crate::TimestampedValue;
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),
    #[error("cache command error: {0}")]
    Command(String),
}

/// Per-point current-value keys namespaced by device id (spec §6: "exact
/// layout left to the writer module, but the reader must be able to
/// rehydrate a device's last-known point set on startup").
pub fn point_key(device_id: i64, point_id: i64) -> String {
    format!("pulseone:device:{device_id}:point:{point_id}")
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set_point_value(&self, device_id: i64, value: &TimestampedValue) -> Result<(), CacheError>;
    async fn get_point_value(&self, device_id: i64, point_id: i64) -> Result<Option<TimestampedValue>, CacheError>;
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError>;
}

/// Real backend (spec §6: "Redis-compatible").
pub struct RedisCacheStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn set_point_value(&self, device_id: i64, value: &TimestampedValue) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let key = point_key(device_id, value.point_id);
        let payload = serde_json::to_string(value).map_err(|e| CacheError::Command(e.to_string()))?;
        let _: () = conn.set(key, payload).await.map_err(|e| CacheError::Command(e.to_string()))?;
        Ok(())
    }

    async fn get_point_value(&self, device_id: i64, point_id: i64) -> Result<Option<TimestampedValue>, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let key = point_key(device_id, point_id);
        let raw: Option<String> = conn.get(key).await.map_err(|e| CacheError::Command(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| CacheError::Command(e.to_string()))).transpose()
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await.map_err(|e| CacheError::Command(e.to_string()))?;
        Ok(())
    }
}

/// In-memory fake used by unit tests across the collector and export
/// crates so they never need a live Redis instance (spec's ambient test
/// tooling: "plain in-memory fakes for repository and driver traits").
#[derive(Default)]
pub struct InMemoryCacheStore {
    values: DashMap<(i64, i64), TimestampedValue>,
    published: DashMap<String, Vec<String>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published.get(channel).map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn set_point_value(&self, device_id: i64, value: &TimestampedValue) -> Result<(), CacheError> {
        self.values.insert((device_id, value.point_id), value.clone());
        Ok(())
    }

    async fn get_point_value(&self, device_id: i64, point_id: i64) -> Result<Option<TimestampedValue>, CacheError> {
        Ok(self.values.get(&(device_id, point_id)).map(|v| v.clone()))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        self.published.entry(channel.to_string()).or_default().push(payload.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Quality, RawValue};
    use chrono::Utc;

    fn sample(point_id: i64) -> TimestampedValue {
        TimestampedValue { point_id, value: RawValue::Float(1.0), quality: Quality::Good, timestamp: Utc::now(), sequence: 1 }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_point_value() {
        let store = InMemoryCacheStore::new();
        store.set_point_value(1, &sample(10)).await.unwrap();
        let found = store.get_point_value(1, 10).await.unwrap().unwrap();
        assert_eq!(found.point_id, 10);
    }

    #[tokio::test]
    async fn in_memory_store_records_published_messages() {
        let store = InMemoryCacheStore::new();
        store.publish("config:reload", "{}").await.unwrap();
        assert_eq!(store.published_on("config:reload"), vec!["{}".to_string()]);
    }
}
