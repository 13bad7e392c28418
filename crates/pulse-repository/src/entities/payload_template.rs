use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::PayloadTemplate;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for PayloadTemplate {
    const TABLE: &'static str = "payload_templates";
    const COLUMNS: &'static [&'static str] = &["id", "category", "body"];

    fn id(&self) -> Option<i64> {
        if self.id == 0 { None } else { Some(self.id) }
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.id().map(Value::from).unwrap_or(Value::Null),
            json!(self.category.as_str()),
            self.body.clone(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        let category_str = entity::get_string(row, "category")?;
        Ok(PayloadTemplate {
            id: entity::get_i64(row, "id")?,
            category: category_str
                .parse()
                .map_err(|_| RepoError::Column(format!("unknown category: {category_str}")))?,
            body: entity::get_json(row, "body")?,
        })
    }
}
