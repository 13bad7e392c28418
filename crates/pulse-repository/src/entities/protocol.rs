use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::Protocol;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for Protocol {
    const TABLE: &'static str = "protocols";
    const COLUMNS: &'static [&'static str] = &[
        "id", "protocol_type", "category", "default_port", "uses_serial", "requires_broker",
        "supported_operations", "supported_data_types", "connection_params_schema",
    ];

    fn id(&self) -> Option<i64> {
        if self.id == 0 { None } else { Some(self.id) }
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.id().map(Value::from).unwrap_or(Value::Null),
            json!(self.protocol_type.symbolic()),
            json!(self.category),
            self.default_port.map(Value::from).unwrap_or(Value::Null),
            json!(self.uses_serial),
            json!(self.requires_broker),
            json!(serde_json::to_string(&self.supported_operations).unwrap_or_default()),
            json!(serde_json::to_string(&self.supported_data_types).unwrap_or_default()),
            self.connection_params_schema.clone(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        let protocol_type_str = entity::get_string(row, "protocol_type")?;
        let protocol_type = protocol_type_str
            .parse()
            .map_err(|_| RepoError::Column(format!("unknown protocol_type: {protocol_type_str}")))?;
        Ok(Protocol {
            id: entity::get_i64(row, "id")?,
            protocol_type,
            category: entity::get_string(row, "category")?,
            default_port: entity::get_opt_i64(row, "default_port")?.map(|p| p as u16),
            uses_serial: entity::get_bool(row, "uses_serial")?,
            requires_broker: entity::get_bool(row, "requires_broker")?,
            supported_operations: serde_json::from_str(&entity::get_string(row, "supported_operations")?)
                .unwrap_or_default(),
            supported_data_types: serde_json::from_str(&entity::get_string(row, "supported_data_types")?)
                .unwrap_or_default(),
            connection_params_schema: entity::get_json(row, "connection_params_schema")?,
        })
    }
}
