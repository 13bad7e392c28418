use thiserror::Error;

/// Internal repository error. Per spec §4.1/§7, this never crosses the
/// `Repository<E>` boundary: every public method logs it and returns an
/// empty/false value instead. It exists so the SQL-generation layer has
/// somewhere to put a `?`.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("missing or malformed column: {0}")]
    Column(String),
}
