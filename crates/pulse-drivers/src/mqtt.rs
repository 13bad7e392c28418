//! MQTT driver (spec §4.2), backed by `rumqttc`'s async client.
//!
//! MQTT has no "read register" primitive; per spec §4.4 the polling group
//! engine treats an MQTT device as a subscription set rather than a poll
//! set. `read_single`/`read_batch` here serve the worker's occasional
//! on-demand read (e.g. a status-endpoint "give me the last value now")
//! by returning the most recent value the background event loop received,
//! not by issuing a new request — there is nothing to request.

use crate::{
    DriverCallback, DriverError, DriverEvent, PointDescriptor, PointReading, ProtocolDriver,
    SubscriptionHandle,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use pulse_common::{ProtocolType, Quality, RawValue};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Deserialize)]
struct MqttConfig {
    broker_host: String,
    #[serde(default = "default_port")]
    broker_port: u16,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_keep_alive_s")]
    keep_alive_s: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    format!("pulseone-{}", rand::random::<u32>())
}

fn default_keep_alive_s() -> u64 {
    30
}

struct TopicSub {
    point_id: i64,
    handle: SubscriptionHandle,
}

pub struct MqttDriver {
    client: RwLock<Option<AsyncClient>>,
    event_task: RwLock<Option<JoinHandle<()>>>,
    topic_subs: DashMap<String, TopicSub>,
    last_values: DashMap<i64, (RawValue, Quality)>,
    last_error: RwLock<Option<DriverError>>,
    next_handle: AtomicU64,
    connected: Arc<std::sync::atomic::AtomicBool>,
}

impl MqttDriver {
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            event_task: RwLock::new(None),
            topic_subs: DashMap::new(),
            last_values: DashMap::new(),
            last_error: RwLock::new(None),
            next_handle: AtomicU64::new(1),
            connected: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    fn record(&self, err: DriverError) -> DriverError {
        *self.last_error.write() = Some(err.clone());
        err
    }

    fn topic_for(point: &PointDescriptor) -> String {
        point
            .protocol_params
            .get("topic")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("pulseone/point/{}", point.point_id))
    }
}

impl Default for MqttDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolDriver for MqttDriver {
    async fn initialize(&self, config: Value, on_event: DriverCallback) -> Result<(), DriverError> {
        let cfg: MqttConfig = serde_json::from_value(config)
            .map_err(|e| self.record(DriverError::fatal(format!("invalid mqtt config: {e}"))))?;

        let mut opts = MqttOptions::new(cfg.client_id, cfg.broker_host, cfg.broker_port);
        opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_s));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        let topic_subs_values = self.last_values.clone();
        let connected_flag = self.connected.clone();
        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected_flag.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).to_string();
                        let value = parse_payload(&payload);
                        on_event(DriverEvent::PointUpdate {
                            point_id: topic_point_id(&publish.topic),
                            value: value.clone(),
                            quality: Quality::Good,
                        });
                        topic_subs_values.insert(topic_point_id(&publish.topic), (value, Quality::Good));
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected_flag.store(false, Ordering::SeqCst);
                    }
                    Err(_) => {
                        connected_flag.store(false, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    _ => {}
                }
            }
        });

        *self.client.write() = Some(client);
        *self.event_task.write() = Some(task);
        Ok(())
    }

    async fn connect(&self) -> Result<(), DriverError> {
        if self.client.read().is_none() {
            return Err(DriverError::fatal("driver not initialized"));
        }
        // rumqttc connects lazily on first poll; the event task already
        // started in `initialize` drives the handshake. We optimistically
        // mark connected and let `is_connected` reflect the real ConnAck.
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        if let Some(client) = self.client.write().take() {
            let _ = client.disconnect().await;
        }
        if let Some(task) = self.event_task.write().take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_single(&self, point: &PointDescriptor) -> Result<PointReading, DriverError> {
        self.last_values
            .get(&point.point_id)
            .map(|v| PointReading { point_id: point.point_id, value: v.0.clone(), quality: v.1 })
            .ok_or_else(|| DriverError::transient("no message received yet for point"))
    }

    async fn read_batch(&self, points: &[PointDescriptor]) -> Vec<PointReading> {
        points
            .iter()
            .map(|p| match self.last_values.get(&p.point_id) {
                Some(v) => PointReading { point_id: p.point_id, value: v.0.clone(), quality: v.1 },
                None => PointReading { point_id: p.point_id, value: RawValue::Bool(false), quality: Quality::Uncertain },
            })
            .collect()
    }

    async fn write_single(&self, point: &PointDescriptor, value: RawValue) -> Result<(), DriverError> {
        let guard = self.client.read();
        let client = guard.as_ref().ok_or_else(|| DriverError::transient("not connected"))?;
        let topic = Self::topic_for(point);
        let payload = value.to_json().to_string();
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| self.record(DriverError::transient(format!("mqtt publish failed: {e}"))))
    }

    async fn subscribe(
        &self,
        point: &PointDescriptor,
        _on_event: DriverCallback,
    ) -> Result<SubscriptionHandle, DriverError> {
        let guard = self.client.read();
        let client = guard.as_ref().ok_or_else(|| DriverError::transient("not connected"))?;
        let topic = Self::topic_for(point);
        client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| self.record(DriverError::transient(format!("mqtt subscribe failed: {e}"))))?;
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.topic_subs.insert(topic, TopicSub { point_id: point.point_id, handle });
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), DriverError> {
        let topic = self
            .topic_subs
            .iter()
            .find(|e| e.handle == handle)
            .map(|e| e.key().clone());
        if let Some(topic) = topic {
            if let Some(client) = self.client.read().as_ref() {
                client
                    .unsubscribe(&topic)
                    .await
                    .map_err(|e| self.record(DriverError::transient(format!("mqtt unsubscribe failed: {e}"))))?;
            }
            self.topic_subs.remove(&topic);
        }
        Ok(())
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Mqtt
    }

    fn last_error(&self) -> Option<DriverError> {
        self.last_error.read().clone()
    }
}

/// Best-effort point id recovery from a topic this driver itself
/// constructed (`pulseone/point/<id>`); user-templated topics fall back to
/// hashing since there is no reverse mapping available.
fn topic_point_id(topic: &str) -> i64 {
    topic
        .rsplit('/')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or_else(|| {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut h = DefaultHasher::new();
            topic.hash(&mut h);
            (h.finish() as i64).abs()
        })
}

fn parse_payload(payload: &str) -> RawValue {
    if let Ok(b) = payload.parse::<bool>() {
        return RawValue::Bool(b);
    }
    if let Ok(i) = payload.parse::<i64>() {
        return RawValue::Int(i);
    }
    if let Ok(f) = payload.parse::<f64>() {
        return RawValue::Float(f);
    }
    RawValue::Str(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_payload_prefers_numeric_then_string() {
        assert!(matches!(parse_payload("true"), RawValue::Bool(true)));
        assert!(matches!(parse_payload("42"), RawValue::Int(42)));
        assert!(matches!(parse_payload("3.5"), RawValue::Float(_)));
        assert!(matches!(parse_payload("hello"), RawValue::Str(_)));
    }

    #[test]
    fn topic_point_id_parses_trailing_integer() {
        assert_eq!(topic_point_id("pulseone/point/42"), 42);
    }

    #[tokio::test]
    async fn read_single_before_any_message_is_transient_error() {
        let driver = MqttDriver::new();
        let point = PointDescriptor {
            point_id: 7,
            address: 0,
            data_type: pulse_common::DataType::Float,
            access_mode: pulse_common::AccessMode::Read,
            protocol_params: Value::Null,
        };
        assert!(driver.read_single(&point).await.is_err());
    }
}
