//! Closed tagged-dispatch `TargetHandler` factory (spec §9: "tagged dispatch
//! over vtables" — `build_handler()` matches on [`TargetKind`] the same way
//! `pulse-drivers::build_driver()` matches on `ProtocolType`, instead of a
//! self-registering handler-class registry).

pub mod file;
pub mod http;
pub mod mqtt;
pub mod s3;

use std::sync::Arc;

use pulse_common::TargetKind;
use pulse_secrets::SecretService;

use crate::handler::TargetHandler;

pub fn build_handler(kind: TargetKind, secrets: Arc<SecretService>) -> Arc<dyn TargetHandler> {
    match kind {
        TargetKind::Http => Arc::new(http::HttpTargetHandler::new(secrets)),
        TargetKind::S3 => Arc::new(s3::S3TargetHandler::new(secrets)),
        TargetKind::Mqtt => Arc::new(mqtt::MqttTargetHandler::new()),
        TargetKind::File => Arc::new(file::FileTargetHandler::new()),
    }
}
