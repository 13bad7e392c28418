//! Database Abstraction Layer (spec §4.1): hides SQL dialect differences so
//! repositories never embed dialect-specific text. Mirrors the role
//! `fc-outbox`'s per-backend repository impls play for FlowCatalyst, but
//! collapsed into one dialect-parameterized SQL generator instead of one
//! struct per backend, since the repository surface here is far wider
//! (fourteen entities vs. one outbox table).

use sqlx::any::{AnyKind, AnyPool};

/// The SQL dialects the abstraction layer normalizes over (spec §4.1 and §6:
/// SQLite, PostgreSQL, MySQL, MSSQL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
    Mssql,
}

impl Dialect {
    pub fn from_any_kind(kind: AnyKind) -> Self {
        match kind {
            AnyKind::Sqlite => Dialect::Sqlite,
            AnyKind::Postgres => Dialect::Postgres,
            AnyKind::MySql => Dialect::MySql,
            #[allow(unreachable_patterns)]
            _ => Dialect::Sqlite,
        }
    }

    /// Literal spelling of a boolean value in a hand-built WHERE/SET clause.
    pub fn bool_literal(&self, value: bool) -> &'static str {
        match self {
            Dialect::Postgres => if value { "TRUE" } else { "FALSE" },
            Dialect::Sqlite | Dialect::MySql | Dialect::Mssql => if value { "1" } else { "0" },
        }
    }

    /// Current-timestamp function/expression per dialect (spec §6).
    pub fn now_fn(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "datetime('now','localtime')",
            Dialect::Postgres => "NOW()",
            Dialect::MySql => "NOW()",
            Dialect::Mssql => "GETDATE()",
        }
    }

    /// Autoincrement integer primary-key column type.
    pub fn autoincrement_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
            Dialect::Mssql => "BIGINT IDENTITY(1,1) PRIMARY KEY",
        }
    }

    /// `LIMIT`/`OFFSET` clause text. MSSQL needs `OFFSET ... FETCH NEXT`
    /// instead of the `LIMIT`/`OFFSET` syntax every other dialect shares.
    pub fn limit_offset(&self, limit: i64, offset: i64) -> String {
        match self {
            Dialect::Mssql => format!("OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY"),
            _ => format!("LIMIT {limit} OFFSET {offset}"),
        }
    }

    /// A positional parameter placeholder for the `n`th (1-based) bind.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite | Dialect::MySql | Dialect::Mssql => "?".to_string(),
        }
    }

    /// Build an `UPSERT` statement so repositories never embed
    /// dialect-specific `INSERT ... ON CONFLICT` text (spec §4.1).
    ///
    /// `cols` is the full ordered column list (including primary keys);
    /// `primary_keys` names the conflict target.
    pub fn upsert_sql(&self, table: &str, cols: &[&str], primary_keys: &[&str]) -> String {
        let col_list = cols.join(", ");
        let placeholders: Vec<String> = (1..=cols.len()).map(|i| self.placeholder(i)).collect();
        let values = placeholders.join(", ");
        let update_cols: Vec<&str> = cols.iter().copied().filter(|c| !primary_keys.contains(c)).collect();

        match self {
            Dialect::Sqlite | Dialect::Postgres => {
                let pk_list = primary_keys.join(", ");
                let set_clause: Vec<String> = update_cols
                    .iter()
                    .map(|c| format!("{c} = EXCLUDED.{c}"))
                    .collect();
                format!(
                    "INSERT INTO {table} ({col_list}) VALUES ({values}) \
                     ON CONFLICT ({pk_list}) DO UPDATE SET {}",
                    set_clause.join(", ")
                )
            }
            Dialect::MySql => {
                let set_clause: Vec<String> = update_cols
                    .iter()
                    .map(|c| format!("{c} = VALUES({c})"))
                    .collect();
                format!(
                    "INSERT INTO {table} ({col_list}) VALUES ({values}) \
                     ON DUPLICATE KEY UPDATE {}",
                    set_clause.join(", ")
                )
            }
            Dialect::Mssql => {
                // MERGE is the closest MSSQL equivalent; kept simple (single-row)
                // since the core never upserts in bulk (spec §4.1 is per-row).
                let pk_join: Vec<String> = primary_keys
                    .iter()
                    .map(|pk| format!("target.{pk} = source.{pk}"))
                    .collect();
                let set_clause: Vec<String> = update_cols
                    .iter()
                    .map(|c| format!("target.{c} = source.{c}"))
                    .collect();
                let source_cols: Vec<String> =
                    cols.iter().enumerate().map(|(i, c)| format!("{} AS {c}", self.placeholder(i + 1))).collect();
                format!(
                    "MERGE {table} AS target USING (SELECT {}) AS source ({col_list}) \
                     ON {} WHEN MATCHED THEN UPDATE SET {} \
                     WHEN NOT MATCHED THEN INSERT ({col_list}) VALUES ({values});",
                    source_cols.join(", "),
                    pk_join.join(" AND "),
                    set_clause.join(", ")
                )
            }
        }
    }
}

/// Connection context shared by every repository: the pool plus the dialect
/// it was opened under.
#[derive(Clone)]
pub struct DbContext {
    pub pool: AnyPool,
    pub dialect: Dialect,
}

impl DbContext {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let dialect = Dialect::from_any_kind(pool.any_kind());
        Ok(Self { pool, dialect })
    }
}
