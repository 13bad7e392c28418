use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::EdgeServer;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for EdgeServer {
    const TABLE: &'static str = "edge_servers";
    const COLUMNS: &'static [&'static str] = &["id", "tenant_id", "name", "enabled"];

    fn id(&self) -> Option<i64> {
        if self.id == 0 { None } else { Some(self.id) }
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.id().map(Value::from).unwrap_or(Value::Null),
            json!(self.tenant_id),
            json!(self.name),
            json!(self.enabled),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(EdgeServer {
            id: entity::get_i64(row, "id")?,
            tenant_id: entity::get_i64(row, "tenant_id")?,
            name: entity::get_string(row, "name")?,
            enabled: entity::get_bool(row, "enabled")?,
        })
    }
}
