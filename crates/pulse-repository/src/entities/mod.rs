pub mod device;
pub mod device_schedule;
pub mod device_settings;
pub mod data_point;
pub mod edge_server;
pub mod export_log;
pub mod export_schedule;
pub mod export_target;
pub mod export_target_mapping;
pub mod payload_template;
pub mod protocol;
pub mod site;
pub mod tenant;
pub mod user;
