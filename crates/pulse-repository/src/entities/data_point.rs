use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::{DataPoint, Scaling};
use serde_json::{json, Value};
use sqlx::any::AnyRow;
use sqlx::Row;

impl Entity for DataPoint {
    const TABLE: &'static str = "data_points";
    const COLUMNS: &'static [&'static str] = &[
        "id", "device_id", "name", "description", "address", "data_type", "access_mode",
        "enabled", "scaling_factor", "scaling_offset", "scaling_min", "scaling_max", "unit",
        "logging_enabled", "logging_interval_ms", "deadband", "tags", "protocol_params",
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
            json!(self.device_id),
            json!(self.name),
            self.description.clone().map(Value::from).unwrap_or(Value::Null),
            json!(self.address),
            json!(self.data_type.as_str()),
            json!(self.access_mode.as_str()),
            json!(self.enabled),
            json!(self.scaling.factor),
            json!(self.scaling.offset),
            self.scaling.min.map(Value::from).unwrap_or(Value::Null),
            self.scaling.max.map(Value::from).unwrap_or(Value::Null),
            self.unit.clone().map(Value::from).unwrap_or(Value::Null),
            json!(self.logging_enabled),
            json!(self.logging_interval_ms),
            json!(self.deadband),
            json!(serde_json::to_string(&self.tags).unwrap_or_default()),
            self.protocol_params.clone(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        let data_type_str = entity::get_string(row, "data_type")?;
        let access_mode_str = entity::get_string(row, "access_mode")?;
        Ok(DataPoint {
            id: entity::get_i64(row, "id")?,
            device_id: entity::get_i64(row, "device_id")?,
            name: entity::get_string(row, "name")?,
            description: entity::get_opt_string(row, "description")?,
            address: entity::get_i64(row, "address")?,
            data_type: data_type_str
                .parse()
                .map_err(|_| RepoError::Column(format!("unknown data_type: {data_type_str}")))?,
            access_mode: access_mode_str
                .parse()
                .map_err(|_| RepoError::Column(format!("unknown access_mode: {access_mode_str}")))?,
            enabled: entity::get_bool(row, "enabled")?,
            scaling: Scaling {
                factor: entity::get_f64(row, "scaling_factor")?,
                offset: entity::get_f64(row, "scaling_offset")?,
                min: row.try_get::<Option<f64>, _>("scaling_min").ok().flatten(),
                max: row.try_get::<Option<f64>, _>("scaling_max").ok().flatten(),
            },
            unit: entity::get_opt_string(row, "unit")?,
            logging_enabled: entity::get_bool(row, "logging_enabled")?,
            logging_interval_ms: entity::get_i64(row, "logging_interval_ms")? as u32,
            deadband: entity::get_f64(row, "deadband")?,
            tags: serde_json::from_str(&entity::get_string(row, "tags")?).unwrap_or_default(),
            protocol_params: entity::get_json(row, "protocol_params")?,
        })
    }
}
