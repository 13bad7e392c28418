//! The seam that lets one generic [`crate::repository::SqlRepository`] serve
//! all fourteen configuration tables (spec §6) instead of fourteen hand-rolled
//! CRUD impls. Resolves spec §9's "Entity ↔ Repository" cyclic-reference note
//! by inverting the relationship: `Entity` impls carry only column mapping
//! data, never a reference back to a repository or connection.

use crate::error::RepoError;
use serde_json::Value;
use sqlx::any::AnyRow;

/// A row-mapped configuration entity with an integer primary key.
///
/// Implementors describe their own shape; `SqlRepository<E>` supplies the
/// SQL generation, binding and dialect handling once for all of them.
pub trait Entity: Send + Sync + Sized + Clone + 'static {
    /// Table name (spec §6 table list).
    const TABLE: &'static str;
    /// Full ordered column list, including the primary key.
    const COLUMNS: &'static [&'static str];
    /// Primary key column name (always `"id"` for every entity here).
    const PRIMARY_KEY: &'static str = "id";

    /// `None` before the row has been assigned an id by `save`.
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);

    /// Ordered values matching `Self::COLUMNS`, for INSERT/UPSERT binding.
    fn column_values(&self) -> Vec<Value>;

    /// Reconstruct an entity from a result row.
    fn from_row(row: &AnyRow) -> Result<Self, RepoError>;
}

use chrono::{DateTime, Utc};
use sqlx::Row;

/// Booleans round-trip as 0/1 across every dialect the abstraction layer
/// targets (spec §4.1), so entities read/write them through these helpers
/// rather than relying on a native `BOOLEAN` column type.
pub fn get_bool(row: &AnyRow, col: &str) -> Result<bool, RepoError> {
    Ok(row.try_get::<i64, _>(col).map_err(RepoError::Query)? != 0)
}

pub fn get_opt_i64(row: &AnyRow, col: &str) -> Result<Option<i64>, RepoError> {
    Ok(row.try_get::<Option<i64>, _>(col).map_err(RepoError::Query)?)
}

pub fn get_i64(row: &AnyRow, col: &str) -> Result<i64, RepoError> {
    Ok(row.try_get::<i64, _>(col).map_err(RepoError::Query)?)
}

pub fn get_f64(row: &AnyRow, col: &str) -> Result<f64, RepoError> {
    Ok(row.try_get::<f64, _>(col).map_err(RepoError::Query)?)
}

pub fn get_string(row: &AnyRow, col: &str) -> Result<String, RepoError> {
    Ok(row.try_get::<String, _>(col).map_err(RepoError::Query)?)
}

pub fn get_opt_string(row: &AnyRow, col: &str) -> Result<Option<String>, RepoError> {
    Ok(row.try_get::<Option<String>, _>(col).map_err(RepoError::Query)?)
}

/// Timestamps are stored as RFC3339 text uniformly across dialects.
pub fn get_datetime(row: &AnyRow, col: &str) -> Result<DateTime<Utc>, RepoError> {
    let raw = get_string(row, col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RepoError::Column(format!("{col}: {e}")))
}

pub fn get_json(row: &AnyRow, col: &str) -> Result<Value, RepoError> {
    let raw = get_string(row, col)?;
    serde_json::from_str(&raw).map_err(RepoError::Serde)
}
