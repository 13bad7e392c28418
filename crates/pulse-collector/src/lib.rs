//! Worker Scheduling & Protocol Polling Core (spec components C3-C5, plus
//! the supplemental worker monitor task).
//!
//! Layering mirrors the spec's component split: [`state`] is the pure
//! per-device transition table (C3), [`polling_group`] is the pure
//! grouping/scheduling/pipeline math (C4), [`worker`] wires both to a real
//! [`pulse_drivers::ProtocolDriver`] (C3+C4 runtime), and
//! [`registry`]/[`factory`]/[`scheduler`] together form the registry and
//! scheduler (C5). [`monitor`] is the supervisory sweep for workers stuck
//! in `Reconnecting`.

pub mod factory;
pub mod monitor;
pub mod polling_group;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod worker;

pub use factory::WorkerFactory;
pub use monitor::{MonitorConfig, WorkerMonitor};
pub use registry::WorkerRegistry;
pub use scheduler::WorkerScheduler;
pub use worker::Worker;
