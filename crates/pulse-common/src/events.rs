//! Worker out-queue / dispatcher in-process ingress (spec §4.6 path 1:
//! "Workers push alarm and value-changed events onto an in-memory bounded
//! queue; the dispatcher drains into the coordinator").
//!
//! Lives in `pulse-common` rather than in the collector or the dispatcher
//! because both sides need the type: the worker is the producer, the
//! dispatcher the consumer, and neither crate should depend on the other
//! just to share a queue.

use crate::DispatchEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Producer-side handle a Worker pushes events into. Implemented by
/// [`BoundedEventQueue`] in production and trivially fakeable in tests.
pub trait EventSink: Send + Sync {
    fn push(&self, event: DispatchEvent);
}

/// Two independent lanes so a burst of telemetry can never crowd out an
/// alarm (spec §4.6: "alarms have a higher priority lane and never drop
/// silently"). The alarm lane's capacity is intentionally generous; true
/// last-resort persistence when even that overflows is the failed-alarm
/// disk queue owned by the export coordinator (spec §4.9), not this queue.
pub struct BoundedEventQueue {
    values: Mutex<VecDeque<DispatchEvent>>,
    alarms: Mutex<VecDeque<DispatchEvent>>,
    value_capacity: usize,
    alarm_capacity: usize,
}

impl BoundedEventQueue {
    pub fn new(value_capacity: usize, alarm_capacity: usize) -> Self {
        Self {
            values: Mutex::new(VecDeque::with_capacity(value_capacity)),
            alarms: Mutex::new(VecDeque::with_capacity(alarm_capacity)),
            value_capacity,
            alarm_capacity,
        }
    }

    /// Drains everything currently queued, alarms first (spec §4.6:
    /// alarms take the priority lane ahead of plain value updates).
    pub fn drain(&self) -> Vec<DispatchEvent> {
        let mut out: Vec<DispatchEvent> = self.alarms.lock().drain(..).collect();
        out.extend(self.values.lock().drain(..));
        out
    }

    pub fn len(&self) -> usize {
        self.alarms.lock().len() + self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for BoundedEventQueue {
    fn push(&self, event: DispatchEvent) {
        match event {
            DispatchEvent::AlarmRaised(_) => {
                let mut q = self.alarms.lock();
                if q.len() >= self.alarm_capacity {
                    q.pop_front();
                }
                q.push_back(event);
            }
            DispatchEvent::Value { .. } => {
                let mut q = self.values.lock();
                if q.len() >= self.value_capacity {
                    q.pop_front();
                }
                q.push_back(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Alarm, AlarmStatus, Quality, RawValue, TimestampedValue};
    use chrono::Utc;
    use std::collections::HashMap;

    fn value_event(point_id: i64) -> DispatchEvent {
        DispatchEvent::Value {
            device_id: 1,
            value: TimestampedValue { point_id, value: RawValue::Int(1), quality: Quality::Good, timestamp: Utc::now(), sequence: 1 },
        }
    }

    fn alarm_event(point_id: i64) -> DispatchEvent {
        DispatchEvent::AlarmRaised(Alarm {
            site_id: 1,
            point_id: Some(point_id),
            point_name: None,
            description: Some("high temp".into()),
            measured_value: RawValue::Float(99.0),
            timestamp: Utc::now(),
            alarm_flag: true,
            status: AlarmStatus::Alert,
            manual_override: false,
            extra_info: None,
            custom_vars: HashMap::new(),
        })
    }

    #[test]
    fn value_queue_drops_oldest_when_full() {
        let q = BoundedEventQueue::new(2, 10);
        q.push(value_event(1));
        q.push(value_event(2));
        q.push(value_event(3));
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        match &drained[0] {
            DispatchEvent::Value { value, .. } => assert_eq!(value.point_id, 2),
            _ => panic!("expected value event"),
        }
    }

    #[test]
    fn alarms_drain_ahead_of_values() {
        let q = BoundedEventQueue::new(10, 10);
        q.push(value_event(1));
        q.push(alarm_event(1));
        let drained = q.drain();
        assert!(matches!(drained[0], DispatchEvent::AlarmRaised(_)));
        assert!(matches!(drained[1], DispatchEvent::Value { .. }));
    }

    #[test]
    fn drain_empties_the_queue() {
        let q = BoundedEventQueue::new(10, 10);
        q.push(value_event(1));
        assert!(!q.is_empty());
        q.drain();
        assert!(q.is_empty());
    }
}
