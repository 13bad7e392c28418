//! SQLite bootstrap schema for local/dev runs and tests (spec §6 table list).
//! Production deployments against Postgres/MySQL/MSSQL are expected to run
//! their own migrations; this module exists so `pulse-dev` and the test
//! suite can stand up a throwaway store without an external migration tool.

use crate::dialect::DbContext;

const TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS tenants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id INTEGER NOT NULL,
        username TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        timezone TEXT NOT NULL DEFAULT 'UTC'
    )"#,
    r#"CREATE TABLE IF NOT EXISTS edge_servers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS protocols (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        protocol_type TEXT NOT NULL UNIQUE,
        category TEXT NOT NULL,
        default_port INTEGER,
        uses_serial INTEGER NOT NULL DEFAULT 0,
        requires_broker INTEGER NOT NULL DEFAULT 0,
        supported_operations TEXT NOT NULL DEFAULT '[]',
        supported_data_types TEXT NOT NULL DEFAULT '[]',
        connection_params_schema TEXT NOT NULL DEFAULT '{}'
    )"#,
    r#"CREATE TABLE IF NOT EXISTS devices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id INTEGER NOT NULL,
        site_id INTEGER NOT NULL,
        edge_server_id INTEGER,
        name TEXT NOT NULL,
        protocol_id INTEGER NOT NULL,
        endpoint TEXT NOT NULL,
        config_blob TEXT NOT NULL DEFAULT '{}',
        enabled INTEGER NOT NULL DEFAULT 1,
        polling_interval_ms INTEGER NOT NULL DEFAULT 1000,
        timeout_ms INTEGER NOT NULL DEFAULT 3000,
        retry_count INTEGER NOT NULL DEFAULT 3,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(tenant_id, site_id, name)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS data_points (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        address INTEGER NOT NULL,
        data_type TEXT NOT NULL,
        access_mode TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        scaling_factor REAL NOT NULL DEFAULT 1.0,
        scaling_offset REAL NOT NULL DEFAULT 0.0,
        scaling_min REAL,
        scaling_max REAL,
        unit TEXT,
        logging_enabled INTEGER NOT NULL DEFAULT 1,
        logging_interval_ms INTEGER NOT NULL DEFAULT 1000,
        deadband REAL NOT NULL DEFAULT 0.0,
        tags TEXT NOT NULL DEFAULT '[]',
        protocol_params TEXT NOT NULL DEFAULT '{}',
        UNIQUE(device_id, address, data_type)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_settings (
        device_id INTEGER PRIMARY KEY,
        polling_interval_ms INTEGER NOT NULL DEFAULT 1000,
        connection_timeout_ms INTEGER NOT NULL DEFAULT 3000,
        read_timeout_ms INTEGER NOT NULL DEFAULT 2000,
        write_timeout_ms INTEGER NOT NULL DEFAULT 2000,
        max_retry_count INTEGER NOT NULL DEFAULT 3,
        retry_interval_ms INTEGER NOT NULL DEFAULT 5000,
        backoff_time_ms INTEGER NOT NULL DEFAULT 5000,
        backoff_multiplier REAL NOT NULL DEFAULT 1.5,
        max_backoff_time_ms INTEGER NOT NULL DEFAULT 300000,
        keep_alive_enabled INTEGER NOT NULL DEFAULT 1,
        keep_alive_interval_s INTEGER NOT NULL DEFAULT 30,
        keep_alive_timeout_s INTEGER NOT NULL DEFAULT 5,
        data_validation_enabled INTEGER NOT NULL DEFAULT 1,
        performance_monitoring_enabled INTEGER NOT NULL DEFAULT 0,
        diagnostic_mode INTEGER NOT NULL DEFAULT 0,
        scan_rate_override INTEGER
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL,
        cron_expression TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS payload_templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category TEXT NOT NULL,
        body TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS export_targets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        template_id INTEGER,
        transport_config TEXT NOT NULL DEFAULT '{}',
        max_retries INTEGER NOT NULL DEFAULT 3,
        initial_delay_ms INTEGER NOT NULL DEFAULT 500,
        backoff_multiplier REAL NOT NULL DEFAULT 2.0,
        max_backoff_ms INTEGER NOT NULL DEFAULT 60000,
        alarm_ignore_minutes INTEGER,
        use_local_time INTEGER NOT NULL DEFAULT 0,
        max_batch_size INTEGER NOT NULL DEFAULT 100,
        batch_timeout_ms INTEGER NOT NULL DEFAULT 5000,
        batch_alarms INTEGER NOT NULL DEFAULT 0,
        UNIQUE(tenant_id, name)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS export_target_mappings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL,
        point_id INTEGER,
        site_id INTEGER,
        target_field_name TEXT NOT NULL,
        conversion TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS export_schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cron_expression TEXT NOT NULL,
        target_id INTEGER,
        target_group TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run_at TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS export_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 1,
        success INTEGER NOT NULL DEFAULT 0,
        status_code INTEGER,
        sent_payload TEXT,
        response_body TEXT,
        error_message TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        latency_ms INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS system_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )"#,
];

/// Creates every table in `TABLES` if absent. Idempotent; safe to call on
/// every boot (spec §6's "Primary keys are integers (autoincrement on
/// insert)" plus the table list are the only DDL-level contract spec.md
/// states).
pub async fn init_schema(ctx: &DbContext) -> Result<(), sqlx::Error> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(&ctx.pool).await?;
    }
    Ok(())
}
