//! Target Handler Framework, Payload Transformer and Export Coordinator
//! (spec §4.7, §4.8, §4.9 — components C7, C8, C9).

pub mod client_cache;
pub mod coordinator;
pub mod disk_queue;
pub mod handler;
pub mod handlers;
pub mod secret_expand;
pub mod transformer;

pub use coordinator::{ExportCoordinator, ValueEvent};
pub use handler::{backoff_delay, target_name, TargetHandler};
pub use transformer::{interpolate, transform, TransformContext};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("target configuration error: {0}")]
    Config(String),
    #[error("secret resolution error: {0}")]
    Secret(#[from] pulse_secrets::SecretsError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("disk queue error: {0}")]
    DiskQueue(#[from] std::io::Error),
}
