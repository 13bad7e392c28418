//! Shared plumbing for the software-simulated drivers ([`crate::bacnet`],
//! [`crate::opcua`]): connection state, the last-error slot, and an
//! in-memory point table standing in for the real device. Kept out of
//! `lib.rs` since it is driver-internal, not part of the public
//! [`crate::ProtocolDriver`] surface.

use crate::{DriverCallback, DriverError};
use parking_lot::RwLock;
use pulse_common::{Quality, RawValue};
use std::collections::HashMap;

pub struct SimulatedState {
    pub connected: RwLock<bool>,
    pub last_error: RwLock<Option<DriverError>>,
    pub callback: RwLock<Option<DriverCallback>>,
    pub values: RwLock<HashMap<i64, (RawValue, Quality)>>,
}

impl Default for SimulatedState {
    fn default() -> Self {
        Self {
            connected: RwLock::new(false),
            last_error: RwLock::new(None),
            callback: RwLock::new(None),
            values: RwLock::new(HashMap::new()),
        }
    }
}

impl SimulatedState {
    pub fn record_error(&self, err: DriverError) -> DriverError {
        *self.last_error.write() = Some(err.clone());
        err
    }

    /// Deterministic pseudo-reading for a point with no seeded value: a
    /// small sawtooth keyed by the address so repeated reads vary slightly
    /// without requiring a real field device in tests.
    pub fn simulate_reading(&self, address: i64) -> (RawValue, Quality) {
        if let Some(v) = self.values.read().get(&address) {
            return v.clone();
        }
        let synthetic = (address % 100) as f64 / 10.0;
        (RawValue::Float(synthetic), Quality::Good)
    }

    pub fn seed(&self, address: i64, value: RawValue, quality: Quality) {
        self.values.write().insert(address, (value, quality));
    }
}
