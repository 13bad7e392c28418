//! Polling Group Engine (spec §4.4, component C4).
//!
//! [`build_polling_groups`] partitions a device's read-enabled points into
//! [`PollingGroup`]s; [`PollScheduler`] drives a per-worker min-heap keyed
//! by next-poll deadline; [`PointPipeline`] applies scaling, range
//! validation and deadband suppression to one reading at a time. Kept pure
//! (`Instant`-based, no I/O) so the grouping and scheduling math is unit
//! testable without a driver or a tokio runtime driving real time.

use pulse_common::{AccessMode, DataPoint, DataType, ProtocolType, Quality, RawValue};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// One scheduler-level batch of points sharing cadence and address
/// locality (spec §3 PollingGroup).
#[derive(Debug, Clone)]
pub struct PollingGroup {
    pub register_family: &'static str,
    pub interval_ms: u32,
    pub points: Vec<DataPoint>,
    pub next_deadline: Instant,
    pub last_response_at: Option<Instant>,
    pub success_count: u64,
    pub fail_count: u64,
    pub enabled: bool,
}

impl PollingGroup {
    fn new(register_family: &'static str, interval_ms: u32, points: Vec<DataPoint>, now: Instant) -> Self {
        Self {
            register_family,
            interval_ms,
            points,
            next_deadline: now,
            last_response_at: None,
            success_count: 0,
            fail_count: 0,
            enabled: true,
        }
    }
}

/// Protocol-native register family a point belongs to (spec §4.4 criterion
/// a). Not persisted on `DataPoint` itself — derived from protocol and
/// data type, the same way the original collector infers FC03 vs. FC01
/// addressing from a point's declared type.
pub fn register_family(protocol: ProtocolType, data_type: DataType) -> &'static str {
    match protocol {
        ProtocolType::ModbusTcp | ProtocolType::ModbusRtu => match data_type {
            DataType::Bool => "coil",
            _ => "holding_register",
        },
        ProtocolType::BacnetIp => "object",
        ProtocolType::OpcUa => "node",
        ProtocolType::Mqtt => "topic",
    }
}

/// Default address stride per spec §4.4 ("default 50 for Modbus, single
/// object for BACnet").
pub fn default_stride(protocol: ProtocolType) -> u32 {
    match protocol {
        ProtocolType::ModbusTcp | ProtocolType::ModbusRtu => 50,
        ProtocolType::BacnetIp => 0,
        ProtocolType::OpcUa => 0,
        ProtocolType::Mqtt => 0,
    }
}

/// Partition read-enabled points into polling groups (spec §4.4). For MQTT
/// the "group" is the whole subscription set (spec: "the group is a
/// subscription set rather than a poll set") — one group, interval
/// irrelevant, consumed by the subscription-diff path instead of the
/// deadline scheduler.
pub fn build_polling_groups(
    points: &[DataPoint],
    protocol: ProtocolType,
    polling_interval_ms: u32,
    stride: u32,
    now: Instant,
) -> Vec<PollingGroup> {
    let readable: Vec<&DataPoint> = points
        .iter()
        .filter(|p| p.enabled && matches!(p.access_mode, AccessMode::Read | AccessMode::ReadWrite))
        .collect();

    if readable.is_empty() {
        return Vec::new();
    }

    if protocol == ProtocolType::Mqtt {
        return vec![PollingGroup::new("topic", polling_interval_ms, readable.into_iter().cloned().collect(), now)];
    }

    let mut by_family: HashMap<&'static str, Vec<DataPoint>> = HashMap::new();
    for p in readable {
        by_family.entry(register_family(protocol, p.data_type)).or_default().push(p.clone());
    }

    let mut groups = Vec::new();
    let mut families: Vec<&'static str> = by_family.keys().copied().collect();
    families.sort_unstable();
    for family in families {
        let mut pts = by_family.remove(family).unwrap();
        pts.sort_by_key(|p| p.address);

        let mut current: Vec<DataPoint> = Vec::new();
        let mut last_addr: Option<i64> = None;
        for p in pts {
            if let Some(last) = last_addr {
                if p.address - last > stride as i64 {
                    groups.push(PollingGroup::new(family, polling_interval_ms, std::mem::take(&mut current), now));
                }
            }
            last_addr = Some(p.address);
            current.push(p);
        }
        if !current.is_empty() {
            groups.push(PollingGroup::new(family, polling_interval_ms, current, now));
        }
    }
    groups
}

/// Per-worker min-heap keyed by next-poll deadline (spec §4.4 scheduling).
/// Skip-one-slot policy: a deadline that has already slipped by more than
/// one interval is rescheduled from "now", never bursting reads to catch
/// up (spec: "no catch-up storms").
pub struct PollScheduler {
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
}

impl PollScheduler {
    pub fn new(groups: &[PollingGroup]) -> Self {
        let heap = groups.iter().enumerate().map(|(i, g)| Reverse((g.next_deadline, i))).collect();
        Self { heap }
    }

    /// Pop every group due at or before `now`. Same-deadline groups come
    /// out in insertion order (spec §4.4 tie-break), since `Reverse((deadline,
    /// idx))` ties break on ascending `idx`.
    pub fn due(&mut self, now: Instant, groups: &mut [PollingGroup]) -> Vec<usize> {
        let mut due = Vec::new();
        while let Some(&Reverse((deadline, idx))) = self.heap.peek() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            due.push(idx);
        }
        for &idx in &due {
            let g = &mut groups[idx];
            let mut next = g.next_deadline + Duration::from_millis(g.interval_ms.max(1) as u64);
            if next <= now {
                next = now + Duration::from_millis(g.interval_ms.max(1) as u64);
            }
            g.next_deadline = next;
            self.heap.push(Reverse((next, idx)));
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((d, _))| *d)
    }

    /// Resume from pause (spec §4.4: "on resume, deadlines are bumped to
    /// now").
    pub fn bump_all_to_now(&mut self, now: Instant, groups: &mut [PollingGroup]) {
        let indices: Vec<usize> = self.heap.drain().map(|Reverse((_, idx))| idx).collect();
        for idx in indices {
            groups[idx].next_deadline = now;
            self.heap.push(Reverse((now, idx)));
        }
    }
}

/// Outcome of running one reading through the quality/scaling/deadband
/// pipeline (spec §4.4 steps 1-4). `None` means "suppressed or failed,
/// nothing emitted"; the caller (worker) is responsible for sequence
/// numbers and wrapping into a `TimestampedValue`.
pub struct ProcessedReading {
    pub value: RawValue,
    pub quality: Quality,
}

/// Per-point deadband/scaling state, owned by the worker across poll
/// cycles (spec §4.4 step 4 needs the previous emission).
#[derive(Default)]
pub struct PointPipeline {
    last_emitted: HashMap<i64, f64>,
}

impl PointPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies spec §4.4 steps 1-4 to one reading.
    ///
    /// Step 1 (bad/comm-failure quality) is the caller's job before
    /// invoking this — it increments the *group* fail counter, which this
    /// per-point pipeline has no visibility into.
    pub fn process(&mut self, point: &DataPoint, value: RawValue, mut quality: Quality, data_validation_enabled: bool) -> Option<ProcessedReading> {
        let Some(raw) = value.as_f64() else {
            // Non-numeric (string/bytes) points skip scaling/range/deadband
            // entirely; only quality passes through.
            return Some(ProcessedReading { value, quality });
        };

        let eng = raw * point.scaling.factor + point.scaling.offset;

        if data_validation_enabled {
            if let (Some(min), Some(max)) = (point.scaling.min, point.scaling.max) {
                if eng < min || eng > max {
                    quality = Quality::OutOfRange;
                }
            }
        }

        if point.deadband > 0.0 {
            if let Some(last) = self.last_emitted.get(&point.id) {
                if (eng - last).abs() < point.deadband {
                    return None;
                }
            }
        }
        self.last_emitted.insert(point.id, eng);

        Some(ProcessedReading { value: RawValue::Float(eng), quality })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::{AccessMode, DataType, Scaling};

    fn make_point(id: i64, address: i64, enabled: bool, access: AccessMode) -> DataPoint {
        DataPoint {
            id,
            device_id: 1,
            name: format!("p{id}"),
            description: None,
            address,
            data_type: DataType::Float,
            access_mode: access,
            enabled,
            scaling: Scaling::default(),
            unit: None,
            logging_enabled: true,
            logging_interval_ms: 1000,
            deadband: 0.0,
            tags: vec![],
            protocol_params: serde_json::Value::Null,
        }
    }

    #[test]
    fn groups_split_on_stride_gap() {
        let now = Instant::now();
        let points = vec![
            make_point(1, 40001, true, AccessMode::Read),
            make_point(2, 40002, true, AccessMode::Read),
            make_point(3, 40200, true, AccessMode::Read),
        ];
        let groups = build_polling_groups(&points, ProtocolType::ModbusTcp, 1000, 50, now);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].points.len(), 2);
        assert_eq!(groups[1].points.len(), 1);
    }

    #[test]
    fn disabled_and_write_only_points_are_excluded() {
        let now = Instant::now();
        let points = vec![
            make_point(1, 1, false, AccessMode::Read),
            make_point(2, 2, true, AccessMode::Write),
            make_point(3, 3, true, AccessMode::Read),
        ];
        let groups = build_polling_groups(&points, ProtocolType::ModbusTcp, 1000, 50, now);
        assert_eq!(groups.iter().map(|g| g.points.len()).sum::<usize>(), 1);
    }

    #[test]
    fn zero_enabled_points_yields_no_groups() {
        let now = Instant::now();
        let points = vec![make_point(1, 1, false, AccessMode::Read)];
        assert!(build_polling_groups(&points, ProtocolType::ModbusTcp, 1000, 50, now).is_empty());
    }

    #[test]
    fn mqtt_points_form_a_single_subscription_group() {
        let now = Instant::now();
        let points = vec![make_point(1, 1, true, AccessMode::Read), make_point(2, 999, true, AccessMode::Read)];
        let groups = build_polling_groups(&points, ProtocolType::Mqtt, 1000, 50, now);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].points.len(), 2);
    }

    #[test]
    fn scheduler_fires_groups_in_insertion_order_on_tie() {
        let now = Instant::now();
        let groups = vec![
            PollingGroup::new("holding_register", 1000, vec![], now),
            PollingGroup::new("holding_register", 1000, vec![], now),
        ];
        let mut sched = PollScheduler::new(&groups);
        let mut groups = groups;
        let due = sched.due(now, &mut groups);
        assert_eq!(due, vec![0, 1]);
    }

    #[test]
    fn scheduler_skips_rather_than_bursts_when_behind() {
        let now = Instant::now();
        let groups = vec![PollingGroup::new("holding_register", 1000, vec![], now)];
        let mut sched = PollScheduler::new(&groups);
        let mut groups = groups;

        // Simulate falling behind by 3 intervals.
        let far_future = now + Duration::from_millis(3500);
        let due = sched.due(far_future, &mut groups);
        assert_eq!(due, vec![0]);
        // Rescheduled from `far_future`, not from the missed deadline --
        // i.e. exactly one interval out, not a backlog of three.
        assert_eq!(groups[0].next_deadline, far_future + Duration::from_millis(1000));
    }

    #[test]
    fn pipeline_applies_scaling_and_offset() {
        let mut pipeline = PointPipeline::new();
        let mut point = make_point(1, 40001, true, AccessMode::Read);
        point.scaling.factor = 0.1;
        point.scaling.offset = 0.0;
        let result = pipeline.process(&point, RawValue::Int(235), Quality::Good, false).unwrap();
        assert!(matches!(result.value, RawValue::Float(v) if (v - 23.5).abs() < 1e-9));
    }

    #[test]
    fn pipeline_flags_out_of_range_but_still_emits() {
        let mut pipeline = PointPipeline::new();
        let mut point = make_point(1, 1, true, AccessMode::Read);
        point.scaling.min = Some(0.0);
        point.scaling.max = Some(10.0);
        let result = pipeline.process(&point, RawValue::Float(99.0), Quality::Good, true).unwrap();
        assert_eq!(result.quality, Quality::OutOfRange);
    }

    #[test]
    fn pipeline_suppresses_within_deadband_after_first_emission() {
        let mut pipeline = PointPipeline::new();
        let mut point = make_point(1, 1, true, AccessMode::Read);
        point.deadband = 1.0;
        assert!(pipeline.process(&point, RawValue::Float(20.0), Quality::Good, false).is_some());
        assert!(pipeline.process(&point, RawValue::Float(20.5), Quality::Good, false).is_none());
        assert!(pipeline.process(&point, RawValue::Float(22.0), Quality::Good, false).is_some());
    }

    #[test]
    fn zero_deadband_never_suppresses() {
        let mut pipeline = PointPipeline::new();
        let point = make_point(1, 1, true, AccessMode::Read);
        assert!(pipeline.process(&point, RawValue::Float(5.0), Quality::Good, false).is_some());
        assert!(pipeline.process(&point, RawValue::Float(5.0), Quality::Good, false).is_some());
    }
}
