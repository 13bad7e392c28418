use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::User;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "tenant_id", "username", "enabled"];

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
            json!(self.username),
            json!(self.enabled),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(User {
            id: entity::get_i64(row, "id")?,
            tenant_id: entity::get_i64(row, "tenant_id")?,
            username: entity::get_string(row, "username")?,
            enabled: entity::get_bool(row, "enabled")?,
        })
    }
}
