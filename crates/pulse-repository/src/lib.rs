//! Repository Layer (spec §4.1, component C1).
//!
//! One generic [`Repository<E>`] trait, implemented once by
//! [`SqlRepository`] and optionally decorated with an advisory per-id LRU by
//! [`CachedRepository`], serves every configuration entity in spec §3. A
//! [`DbContext`] (spec's "Database Abstraction Layer") hides SQL dialect
//! differences so no entity-specific code ever embeds dialect text.
//!
//! [`RepositoryFactory`] is the thing C5 (worker registry/scheduler) and C9
//! (export coordinator) actually depend on: one struct holding a cached
//! repository per entity, built once at boot from a single `DbContext`.

pub mod dialect;
pub mod entities;
pub mod entity;
pub mod error;
pub mod repository;
pub mod schema;
pub mod system_settings;

pub use dialect::{DbContext, Dialect};
pub use entity::Entity;
pub use error::RepoError;
pub use repository::{CachedRepository, Condition, Op, Page, Repository};
pub use system_settings::SystemSettingsRepository;

use pulse_common::{
    DataPoint, Device, DeviceSchedule, DeviceSettings, EdgeServer, ExportLog, ExportSchedule,
    ExportTarget, ExportTargetMapping, PayloadTemplate, Protocol, Site, Tenant, User,
};
use std::sync::Arc;

/// Default entity-cache capacity (spec §4.1 leaves sizing unspecified; chosen
/// generously for an edge collector with at most a few thousand rows per
/// table).
const DEFAULT_CACHE_CAPACITY: usize = 4096;

type CachedRepo<E> = CachedRepository<E, SqlRepository<E>>;
use repository::SqlRepository;

/// One cached repository per configuration entity, built from a single
/// database connection (spec §4.1, §4.5 "factory component (C1 + C2)").
pub struct RepositoryFactory {
    pub tenants: Arc<CachedRepo<Tenant>>,
    pub users: Arc<CachedRepo<User>>,
    pub sites: Arc<CachedRepo<Site>>,
    pub edge_servers: Arc<CachedRepo<EdgeServer>>,
    pub protocols: Arc<CachedRepo<Protocol>>,
    pub devices: Arc<CachedRepo<Device>>,
    pub data_points: Arc<CachedRepo<DataPoint>>,
    pub device_settings: Arc<CachedRepo<DeviceSettings>>,
    pub device_schedules: Arc<CachedRepo<DeviceSchedule>>,
    pub payload_templates: Arc<CachedRepo<PayloadTemplate>>,
    pub export_targets: Arc<CachedRepo<ExportTarget>>,
    pub export_target_mappings: Arc<CachedRepo<ExportTargetMapping>>,
    pub export_schedules: Arc<CachedRepo<ExportSchedule>>,
    pub export_logs: Arc<CachedRepo<ExportLog>>,
    pub system_settings: Arc<SystemSettingsRepository>,
    ctx: DbContext,
}

impl RepositoryFactory {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let ctx = DbContext::connect(url, max_connections).await?;
        schema::init_schema(&ctx).await?;
        Ok(Self::new(ctx))
    }

    pub fn new(ctx: DbContext) -> Self {
        macro_rules! cached {
            () => {
                Arc::new(CachedRepository::new(SqlRepository::new(ctx.clone()), DEFAULT_CACHE_CAPACITY))
            };
        }
        Self {
            tenants: cached!(),
            users: cached!(),
            sites: cached!(),
            edge_servers: cached!(),
            protocols: cached!(),
            devices: cached!(),
            data_points: cached!(),
            device_settings: cached!(),
            device_schedules: cached!(),
            payload_templates: cached!(),
            export_targets: cached!(),
            export_target_mappings: cached!(),
            export_schedules: cached!(),
            export_logs: cached!(),
            system_settings: Arc::new(SystemSettingsRepository::new(ctx.clone())),
            ctx,
        }
    }

    pub fn db_context(&self) -> &DbContext {
        &self.ctx
    }

    /// Drops every entity-level cache (spec §4.1 `clearCache()`).
    pub fn clear_all_caches(&self) {
        self.tenants.clear_cache();
        self.users.clear_cache();
        self.sites.clear_cache();
        self.edge_servers.clear_cache();
        self.protocols.clear_cache();
        self.devices.clear_cache();
        self.data_points.clear_cache();
        self.device_settings.clear_cache();
        self.device_schedules.clear_cache();
        self.payload_templates.clear_cache();
        self.export_targets.clear_cache();
        self.export_target_mappings.clear_cache();
        self.export_schedules.clear_cache();
        self.export_logs.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repository::Condition;

    async fn test_factory() -> RepositoryFactory {
        RepositoryFactory::connect("sqlite::memory:", 5).await.unwrap()
    }

    #[tokio::test]
    async fn save_then_find_by_id_round_trips() {
        let factory = test_factory().await;
        let mut tenant = Tenant { id: 0, name: "acme".into(), enabled: true };
        assert!(factory.tenants.save(&mut tenant).await);
        assert!(tenant.id > 0);

        let found = factory.tenants.find_by_id(tenant.id).await.unwrap();
        assert_eq!(found.name, "acme");
        assert!(found.enabled);
    }

    #[tokio::test]
    async fn delete_by_id_evicts_cache_and_removes_row() {
        let factory = test_factory().await;
        let mut tenant = Tenant { id: 0, name: "acme".into(), enabled: true };
        factory.tenants.save(&mut tenant).await;
        assert!(factory.tenants.find_by_id(tenant.id).await.is_some());

        assert!(factory.tenants.delete_by_id(tenant.id).await);
        assert!(factory.tenants.find_by_id(tenant.id).await.is_none());
    }

    #[tokio::test]
    async fn find_by_conditions_filters_rows() {
        let factory = test_factory().await;
        for (name, enabled) in [("a", true), ("b", false), ("c", true)] {
            let mut t = Tenant { id: 0, name: name.into(), enabled };
            factory.tenants.save(&mut t).await;
        }
        let enabled_only = factory
            .tenants
            .find_by_conditions(&[Condition::eq("enabled", 1)], Some("name ASC"), None)
            .await;
        assert_eq!(enabled_only.len(), 2);
    }

    #[tokio::test]
    async fn exists_reflects_saved_rows_only() {
        let factory = test_factory().await;
        assert!(!factory.tenants.exists(999).await);
        let mut t = Tenant { id: 0, name: "x".into(), enabled: true };
        factory.tenants.save(&mut t).await;
        assert!(factory.tenants.exists(t.id).await);
    }

    #[tokio::test]
    async fn system_settings_upsert_round_trips() {
        let factory = test_factory().await;
        assert!(factory.system_settings.set("log_level", "debug").await);
        assert_eq!(factory.system_settings.get("log_level").await, Some("debug".to_string()));
        assert!(factory.system_settings.set("log_level", "trace").await);
        assert_eq!(factory.system_settings.get("log_level").await, Some("trace".to_string()));
    }

    #[tokio::test]
    async fn device_round_trip_preserves_all_fields() {
        let factory = test_factory().await;
        let now = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc);
        let mut device = Device {
            id: 0,
            tenant_id: 1,
            site_id: 1,
            edge_server_id: Some(1001),
            name: "PLC-1".into(),
            protocol_id: 1,
            endpoint: "127.0.0.1:5020".into(),
            config_blob: serde_json::json!({"slave_id": 1}),
            enabled: true,
            polling_interval_ms: 1000,
            timeout_ms: 3000,
            retry_count: 3,
            created_at: now,
            updated_at: now,
        };
        factory.devices.save(&mut device).await;
        let found = factory.devices.find_by_id(device.id).await.unwrap();
        assert_eq!(found.name, "PLC-1");
        assert_eq!(found.edge_server_id, Some(1001));
        assert_eq!(found.config_blob["slave_id"], 1);
    }
}
