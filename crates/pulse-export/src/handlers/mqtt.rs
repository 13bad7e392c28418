//! MQTT target handler (spec §4.7). Grounded on
//! `pulse-drivers::mqtt::MqttDriver`'s rumqttc usage: a lock-guarded
//! `AsyncClient` built lazily, a background task driving the eventloop for
//! connection-state tracking, and marking the client dead on publish
//! failure so the next send reconnects rather than retrying a broken
//! session forever.
//!
//! `transport_config` shape:
//! ```json
//! { "broker_host": "mqtt.local", "broker_port": 1883, "topic": "pulseone/export/{{site_id}}" }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_common::{Alarm, ExportTarget, TargetSendResult};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;

use crate::coordinator::ValueEvent;
use crate::handler::{target_name, TargetHandler};
use crate::transformer::interpolate;
use crate::ExportError;

struct Session {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

pub struct MqttTargetHandler {
    sessions: Mutex<std::collections::HashMap<i64, Session>>,
}

impl MqttTargetHandler {
    pub fn new() -> Self {
        Self { sessions: Mutex::new(std::collections::HashMap::new()) }
    }

    async fn ensure_session(&self, target: &ExportTarget) -> Result<AsyncClient, ExportError> {
        if let Some(session) = self.sessions.lock().get(&target.id) {
            if session.connected.load(Ordering::SeqCst) {
                return Ok(session.client.clone());
            }
        }

        let cfg = &target.transport_config;
        let host = cfg.get("broker_host").and_then(Value::as_str).ok_or_else(|| ExportError::Config(format!("target {} missing transport_config.broker_host", target.id)))?;
        let port = cfg.get("broker_port").and_then(Value::as_u64).unwrap_or(1883) as u16;
        let client_id = format!("pulseone-export-{}-{}", target.id, rand::random::<u32>());

        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        let connected = Arc::new(AtomicBool::new(false));
        let connected_flag = connected.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => connected_flag.store(true, Ordering::SeqCst),
                    Ok(Event::Incoming(Packet::Disconnect)) | Err(_) => {
                        connected_flag.store(false, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    _ => {}
                }
            }
        });

        // Give the background task a moment to observe the initial ConnAck
        // before the first publish — rumqttc connects lazily on first poll.
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.sessions.lock().insert(target.id, Session { client: client.clone(), connected });
        Ok(client)
    }

    fn topic(&self, target: &ExportTarget, ctx: &crate::transformer::TransformContext) -> String {
        let template = target.transport_config.get("topic").and_then(Value::as_str).unwrap_or("pulseone/export");
        interpolate(template, ctx)
    }

    async fn publish(&self, target: &ExportTarget, topic: &str, payload: &Value) -> TargetSendResult {
        let start = std::time::Instant::now();
        let body = payload.to_string();
        let client = match self.ensure_session(target).await {
            Ok(c) => c,
            Err(e) => {
                return TargetSendResult {
                    target_type: target.kind,
                    target_name: target_name(target),
                    success: false,
                    status_code: None,
                    error_message: Some(e.to_string()),
                    sent_payload: Some(body),
                    response_body: None,
                    attempt_count: 1,
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
        };

        match client.publish(topic, QoS::AtLeastOnce, false, body.clone()).await {
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
            Err(e) => {
                if let Some(session) = self.sessions.lock().get(&target.id) {
                    session.connected.store(false, Ordering::SeqCst);
                }
                TargetSendResult {
                    target_type: target.kind,
                    target_name: target_name(target),
                    success: false,
                    status_code: None,
                    error_message: Some(format!("mqtt publish failed: {e}")),
                    sent_payload: Some(body),
                    response_body: None,
                    attempt_count: 1,
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

impl Default for MqttTargetHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetHandler for MqttTargetHandler {
    async fn initialize(&self, target: &ExportTarget) -> Result<(), ExportError> {
        self.validate_config(target)?;
        self.ensure_session(target).await.map(|_| ())
    }

    async fn send_alarm(&self, target: &ExportTarget, alarm: &Alarm, payload: &Value) -> TargetSendResult {
        let ctx = crate::transformer::TransformContext::from_alarm(alarm);
        let topic = self.topic(target, &ctx);
        self.publish(target, &topic, payload).await
    }

    async fn send_value_batch(&self, target: &ExportTarget, values: &[ValueEvent], payload: &Value) -> TargetSendResult {
        let ctx = values.first().map(|v| v.transform_context()).unwrap_or_else(|| crate::transformer::TransformContext::from_value(0, 0, "batch", None, &pulse_common::RawValue::Int(0), chrono::Utc::now()));
        let topic = self.topic(target, &ctx);
        self.publish(target, &topic, payload).await
    }

    async fn test_connection(&self, target: &ExportTarget) -> Result<(), ExportError> {
        self.ensure_session(target).await.map(|_| ())
    }

    fn validate_config(&self, target: &ExportTarget) -> Result<(), ExportError> {
        if target.transport_config.get("broker_host").and_then(Value::as_str).is_none() {
            return Err(ExportError::Config(format!("target {} missing transport_config.broker_host", target.id)));
        }
        Ok(())
    }

    async fn cleanup(&self, target: &ExportTarget) {
        self.sessions.lock().remove(&target.id);
    }

    fn target_type(&self) -> &'static str {
        "MQTT"
    }
}
