//! Generic `Repository<Entity>` (spec §4.1).
//!
//! One SQL-generating implementation (`SqlRepository<E>`) serves every
//! configuration entity; an optional decorator (`CachedRepository<E>`) adds
//! the advisory per-id LRU described in spec §4.1 without the underlying
//! implementation knowing caching exists at all — composition over the
//! inheritance the original exhibits (spec §9 design notes).

use crate::dialect::DbContext;
use crate::entity::Entity;
use crate::error::RepoError;
use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use sqlx::any::AnyArguments;
use sqlx::{Arguments, Row};
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::{debug, warn};

/// A single equality/comparison predicate for `find_by_conditions`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: &'static str,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self { column, op: Op::Eq, value: value.into() }
    }

    pub fn is_null(column: &'static str) -> Self {
        Self { column, op: Op::Eq, value: Value::Null }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    fn sql(&self, is_null: bool) -> &'static str {
        if is_null {
            return match self {
                Op::Eq => "IS NULL",
                _ => "IS NOT NULL",
            };
        }
        match self {
            Op::Eq => "= ",
            Op::Ne => "<> ",
            Op::Lt => "< ",
            Op::Lte => "<= ",
            Op::Gt => "> ",
            Op::Gte => ">= ",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

/// Generic read/write surface over one configuration entity (spec §4.1).
/// Every method absorbs its own query errors and returns an empty/false
/// value — repository operations never throw across the component boundary.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Option<E>;
    async fn find_all(&self) -> Vec<E>;
    async fn find_by_conditions(&self, conds: &[Condition], order: Option<&str>, page: Option<Page>) -> Vec<E>;
    async fn count_by_conditions(&self, conds: &[Condition]) -> i64;
    async fn save(&self, entity: &mut E) -> bool;
    async fn update(&self, entity: &E) -> bool;
    async fn delete_by_id(&self, id: i64) -> bool;
    async fn exists(&self, id: i64) -> bool;
    async fn save_all(&self, entities: &mut [E]) -> usize;
    async fn delete_all_by_id(&self, ids: &[i64]) -> usize;
    fn clear_cache(&self) {}
}

fn bind_one<'q>(
    mut args: AnyArguments<'q>,
    value: &'q Value,
) -> AnyArguments<'q> {
    match value {
        Value::Null => { let _ = args.add(None::<String>); }
        Value::Bool(b) => { let _ = args.add(if *b { 1i64 } else { 0i64 }); }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let _ = args.add(i);
            } else {
                let _ = args.add(n.as_f64().unwrap_or_default());
            }
        }
        Value::String(s) => { let _ = args.add(s.as_str()); }
        other => { let _ = args.add(other.to_string()); }
    }
    args
}

fn where_clause(dialect: &crate::dialect::Dialect, conds: &[Condition], start: usize) -> (String, Vec<Value>) {
    if conds.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut clauses = Vec::with_capacity(conds.len());
    let mut values = Vec::new();
    let mut n = start;
    for c in conds {
        let is_null = matches!(c.value, Value::Null);
        if is_null {
            clauses.push(format!("{} {}", c.column, c.op.sql(true)));
        } else {
            clauses.push(format!("{} {}{}", c.column, c.op.sql(false), dialect.placeholder(n)));
            values.push(c.value.clone());
            n += 1;
        }
    }
    (format!(" WHERE {}", clauses.join(" AND ")), values)
}

/// Plain SQL-backed implementation of `Repository<E>`, with no caching.
pub struct SqlRepository<E: Entity> {
    ctx: DbContext,
    _marker: PhantomData<E>,
}

impl<E: Entity> SqlRepository<E> {
    pub fn new(ctx: DbContext) -> Self {
        Self { ctx, _marker: PhantomData }
    }

    fn select_prefix() -> String {
        format!("SELECT {} FROM {}", E::COLUMNS.join(", "), E::TABLE)
    }

    async fn fetch_rows(&self, sql: &str, binds: &[Value]) -> Result<Vec<E>, RepoError> {
        let mut args = AnyArguments::default();
        for v in binds {
            args = bind_one(args, v);
        }
        let rows = sqlx::query_with(sql, args).fetch_all(&self.ctx.pool).await?;
        rows.iter().map(E::from_row).collect()
    }

    async fn try_find_by_id(&self, id: i64) -> Result<Option<E>, RepoError> {
        let sql = format!("{} WHERE {} = {}", Self::select_prefix(), E::PRIMARY_KEY, self.ctx.dialect.placeholder(1));
        let mut args = AnyArguments::default();
        args.add(id).map_err(RepoError::Query)?;
        let row = sqlx::query_with(&sql, args).fetch_optional(&self.ctx.pool).await?;
        row.as_ref().map(E::from_row).transpose()
    }

    async fn try_save(&self, entity: &mut E) -> Result<bool, RepoError> {
        let cols = E::COLUMNS;
        let pk = &[E::PRIMARY_KEY];
        let sql = self.ctx.dialect.upsert_sql(E::TABLE, cols, pk);
        let values = entity.column_values();
        let mut args = AnyArguments::default();
        for v in &values {
            args = bind_one(args, v);
        }
        sqlx::query_with(&sql, args).execute(&self.ctx.pool).await?;

        if entity.id().is_none() {
            // Dialect-agnostic id lookup for the row we just inserted: every
            // entity here has a unique natural key we could join on, but the
            // simplest portable approach is a dialect-specific last-insert id.
            let id_sql = match self.ctx.dialect {
                crate::dialect::Dialect::Sqlite => "SELECT last_insert_rowid() AS id",
                crate::dialect::Dialect::Postgres => "SELECT lastval() AS id",
                crate::dialect::Dialect::MySql => "SELECT LAST_INSERT_ID() AS id",
                crate::dialect::Dialect::Mssql => "SELECT SCOPE_IDENTITY() AS id",
            };
            if let Ok(row) = sqlx::query(id_sql).fetch_one(&self.ctx.pool).await {
                if let Ok(id) = row.try_get::<i64, _>("id") {
                    entity.set_id(id);
                }
            }
        }
        Ok(true)
    }

    async fn try_delete_by_id(&self, id: i64) -> Result<bool, RepoError> {
        let sql = format!("DELETE FROM {} WHERE {} = {}", E::TABLE, E::PRIMARY_KEY, self.ctx.dialect.placeholder(1));
        let mut args = AnyArguments::default();
        args.add(id).map_err(RepoError::Query)?;
        let result = sqlx::query_with(&sql, args).execute(&self.ctx.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for SqlRepository<E> {
    async fn find_by_id(&self, id: i64) -> Option<E> {
        match self.try_find_by_id(id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(table = E::TABLE, id, error = %e, "find_by_id failed");
                None
            }
        }
    }

    async fn find_all(&self) -> Vec<E> {
        match self.fetch_rows(&Self::select_prefix(), &[]).await {
            Ok(v) => v,
            Err(e) => {
                warn!(table = E::TABLE, error = %e, "find_all failed");
                Vec::new()
            }
        }
    }

    async fn find_by_conditions(&self, conds: &[Condition], order: Option<&str>, page: Option<Page>) -> Vec<E> {
        let (where_sql, values) = where_clause(&self.ctx.dialect, conds, 1);
        let mut sql = format!("{}{}", Self::select_prefix(), where_sql);
        if let Some(order) = order {
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        if let Some(page) = page {
            sql.push(' ');
            sql.push_str(&self.ctx.dialect.limit_offset(page.limit, page.offset));
        }
        match self.fetch_rows(&sql, &values).await {
            Ok(v) => v,
            Err(e) => {
                warn!(table = E::TABLE, error = %e, "find_by_conditions failed");
                Vec::new()
            }
        }
    }

    async fn count_by_conditions(&self, conds: &[Condition]) -> i64 {
        let (where_sql, values) = where_clause(&self.ctx.dialect, conds, 1);
        let sql = format!("SELECT COUNT(*) AS n FROM {}{}", E::TABLE, where_sql);
        let mut args = AnyArguments::default();
        for v in &values {
            args = bind_one(args, v);
        }
        match sqlx::query_with(&sql, args).fetch_one(&self.ctx.pool).await {
            Ok(row) => row.try_get::<i64, _>("n").unwrap_or(0),
            Err(e) => {
                warn!(table = E::TABLE, error = %e, "count_by_conditions failed");
                0
            }
        }
    }

    async fn save(&self, entity: &mut E) -> bool {
        match self.try_save(entity).await {
            Ok(v) => v,
            Err(e) => {
                warn!(table = E::TABLE, error = %e, "save failed");
                false
            }
        }
    }

    async fn update(&self, entity: &E) -> bool {
        let mut copy = entity.clone();
        self.save(&mut copy).await
    }

    async fn delete_by_id(&self, id: i64) -> bool {
        match self.try_delete_by_id(id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(table = E::TABLE, id, error = %e, "delete_by_id failed");
                false
            }
        }
    }

    async fn exists(&self, id: i64) -> bool {
        self.find_by_id(id).await.is_some()
    }

    async fn save_all(&self, entities: &mut [E]) -> usize {
        let mut n = 0;
        for e in entities.iter_mut() {
            if self.save(e).await {
                n += 1;
            }
        }
        n
    }

    async fn delete_all_by_id(&self, ids: &[i64]) -> usize {
        let mut n = 0;
        for id in ids {
            if self.delete_by_id(*id).await {
                n += 1;
            }
        }
        n
    }
}

/// Decorates any `Repository<E>` with an advisory per-id LRU (spec §4.1).
/// Invalidation: `save`/`update`/`delete_by_id` evict the affected id;
/// `clear_cache` drops everything. Correctness never depends on the cache —
/// a miss always falls through to `inner`.
pub struct CachedRepository<E: Entity, R: Repository<E>> {
    inner: R,
    cache: Mutex<LruCache<i64, E>>,
}

impl<E: Entity, R: Repository<E>> CachedRepository<E, R> {
    pub fn new(inner: R, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner, cache: Mutex::new(LruCache::new(capacity)) }
    }
}

#[async_trait]
impl<E: Entity, R: Repository<E>> Repository<E> for CachedRepository<E, R> {
    async fn find_by_id(&self, id: i64) -> Option<E> {
        if let Some(hit) = self.cache.lock().unwrap().get(&id).cloned() {
            debug!(table = E::TABLE, id, "cache hit");
            return Some(hit);
        }
        let found = self.inner.find_by_id(id).await;
        if let Some(ref e) = found {
            self.cache.lock().unwrap().put(id, e.clone());
        }
        found
    }

    async fn find_all(&self) -> Vec<E> {
        self.inner.find_all().await
    }

    async fn find_by_conditions(&self, conds: &[Condition], order: Option<&str>, page: Option<Page>) -> Vec<E> {
        self.inner.find_by_conditions(conds, order, page).await
    }

    async fn count_by_conditions(&self, conds: &[Condition]) -> i64 {
        self.inner.count_by_conditions(conds).await
    }

    async fn save(&self, entity: &mut E) -> bool {
        let ok = self.inner.save(entity).await;
        if ok {
            if let Some(id) = entity.id() {
                self.cache.lock().unwrap().pop(&id);
            }
        }
        ok
    }

    async fn update(&self, entity: &E) -> bool {
        let ok = self.inner.update(entity).await;
        if ok {
            if let Some(id) = entity.id() {
                self.cache.lock().unwrap().pop(&id);
            }
        }
        ok
    }

    async fn delete_by_id(&self, id: i64) -> bool {
        let ok = self.inner.delete_by_id(id).await;
        if ok {
            self.cache.lock().unwrap().pop(&id);
        }
        ok
    }

    async fn exists(&self, id: i64) -> bool {
        if self.cache.lock().unwrap().contains(&id) {
            return true;
        }
        self.inner.exists(id).await
    }

    async fn save_all(&self, entities: &mut [E]) -> usize {
        let n = self.inner.save_all(entities).await;
        let mut cache = self.cache.lock().unwrap();
        for e in entities.iter() {
            if let Some(id) = e.id() {
                cache.pop(&id);
            }
        }
        n
    }

    async fn delete_all_by_id(&self, ids: &[i64]) -> usize {
        let n = self.inner.delete_all_by_id(ids).await;
        let mut cache = self.cache.lock().unwrap();
        for id in ids {
            cache.pop(id);
        }
        n
    }

    fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}
