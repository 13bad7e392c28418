use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::Tenant;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for Tenant {
    const TABLE: &'static str = "tenants";
    const COLUMNS: &'static [&'static str] = &["id", "name", "enabled"];

    fn id(&self) -> Option<i64> {
        if self.id == 0 { None } else { Some(self.id) }
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.id().map(Value::from).unwrap_or(Value::Null),
            json!(self.name),
            json!(self.enabled),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(Tenant {
            id: entity::get_i64(row, "id")?,
            name: entity::get_string(row, "name")?,
            enabled: entity::get_bool(row, "enabled")?,
        })
    }
}
