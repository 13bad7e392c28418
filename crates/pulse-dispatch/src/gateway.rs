//! CSPGateway: a facade over the whole export path (C6-C9) with one
//! health/status view, grounded in the original's `main.cpp` boot
//! sequence (load config, init DB, init secrets, init targets, start
//! dispatcher, serve status) and modeled on the teacher's health-endpoint
//! idiom (a `HealthReport`-shaped JSON body behind `axum`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pulse_export::ExportCoordinator;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::ingress::IngressDispatcher;
use crate::pubsub::PubSubDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub status: GatewayHealth,
    pub ingress_enabled: bool,
    pub pubsub_connected: bool,
    pub pending_value_batches: usize,
    pub disk_queue_len: usize,
}

/// Delay between pub/sub reconnect attempts after the connection drops
/// or fails to establish.
const PUBSUB_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct CspGateway {
    coordinator: Arc<ExportCoordinator>,
    ingress: Option<Arc<IngressDispatcher>>,
    pubsub: Arc<PubSubDispatcher>,
    pubsub_connected: Arc<AtomicBool>,
}

impl CspGateway {
    pub fn new(coordinator: Arc<ExportCoordinator>, ingress: Option<Arc<IngressDispatcher>>, pubsub: Arc<PubSubDispatcher>) -> Self {
        Self { coordinator, ingress, pubsub, pubsub_connected: Arc::new(AtomicBool::new(false)) }
    }

    /// Runs every background loop this gateway owns until the process
    /// exits: the optional in-process ingress drain, the pub/sub
    /// subscriber (reconnecting on drop), the disk-queue retry sweep, and
    /// the value-batch timeout flush. Returns once all of them exit,
    /// which in practice only happens on cancellation.
    pub async fn run(&self) {
        let mut tasks = Vec::new();

        if let Some(ingress) = self.ingress.clone() {
            tasks.push(tokio::spawn(async move { ingress.run().await }));
        }

        {
            let pubsub = Arc::clone(&self.pubsub);
            let connected = Arc::clone(&self.pubsub_connected);
            tasks.push(tokio::spawn(async move { Self::run_pubsub_with_reconnect(pubsub, connected).await }));
        }

        {
            let coordinator = Arc::clone(&self.coordinator);
            tasks.push(tokio::spawn(async move { Self::run_batch_flush_loop(coordinator).await }));
        }

        {
            let coordinator = Arc::clone(&self.coordinator);
            tasks.push(tokio::spawn(async move { coordinator.run_disk_retry_loop().await }));
        }

        for task in tasks {
            let _ = task.await;
        }
    }

    async fn run_pubsub_with_reconnect(pubsub: Arc<PubSubDispatcher>, connected: Arc<AtomicBool>) {
        loop {
            connected.store(true, Ordering::Relaxed);
            let result = pubsub.run().await;
            connected.store(false, Ordering::Relaxed);
            match result {
                Ok(()) => warn!("pub/sub subscriber loop exited cleanly, reconnecting"),
                Err(e) => error!(error = %e, "pub/sub subscriber failed, reconnecting"),
            }
            sleep(PUBSUB_RECONNECT_DELAY).await;
        }
    }

    async fn run_batch_flush_loop(coordinator: Arc<ExportCoordinator>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            coordinator.flush_timed_out_batches().await;
        }
    }

    pub async fn status(&self) -> GatewayStatus {
        let disk_queue_len = self.coordinator.disk_queue_len().await;
        let pending_value_batches = self.coordinator.failed_queue_len();
        let pubsub_connected = self.pubsub_connected.load(Ordering::Relaxed);
        let status = if disk_queue_len > 0 && !pubsub_connected { GatewayHealth::Degraded } else { GatewayHealth::Healthy };
        GatewayStatus { status, ingress_enabled: self.ingress.is_some(), pubsub_connected, pending_value_batches, disk_queue_len }
    }
}
