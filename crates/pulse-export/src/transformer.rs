//! Payload Transformer (spec §4.8 C8).
//!
//! `transform(template, context)` walks a JSON template tree and substitutes
//! `{{variable}}` leaves from a [`TransformContext`]. Grounded on
//! `test_payload_transformer.cpp`'s leaf rule: a leaf that is *exactly*
//! `{{var}}` with no surrounding text keeps the variable's native JSON type
//! (so a numeric `value` stays a number); any other leaf is string
//! interpolated. Missing variables are left as the literal `{{var}}` text —
//! non-fatal per spec, the export still goes out with the hole visible.

use chrono::{DateTime, Utc};
use pulse_common::{Alarm, AlarmStatus, TargetKind, TemplateCategory};
use serde_json::Value;
use std::collections::HashMap;

fn alarm_status_str(status: AlarmStatus) -> &'static str {
    match status {
        AlarmStatus::Normal => "normal",
        AlarmStatus::Alert => "alert",
        AlarmStatus::Acknowledged => "acknowledged",
    }
}

/// Resolved `{{var}}` → value table for one transform pass. Built once per
/// dispatched event and reused across every target's template.
pub struct TransformContext {
    vars: HashMap<String, Value>,
}

impl TransformContext {
    pub fn from_alarm(alarm: &Alarm) -> Self {
        let mut vars = HashMap::new();
        vars.insert("building_id".into(), Value::from(alarm.site_id));
        vars.insert("site_id".into(), Value::from(alarm.site_id));
        if let Some(point_id) = alarm.point_id {
            vars.insert("point_id".into(), Value::from(point_id));
        }
        if let Some(name) = &alarm.point_name {
            vars.insert("point_name".into(), Value::String(name.clone()));
        }
        if let Some(desc) = &alarm.description {
            vars.insert("description".into(), Value::String(desc.clone()));
        }
        vars.insert("value".into(), alarm.measured_value.to_json());
        vars.insert("alarm_flag".into(), Value::Bool(alarm.alarm_flag));
        vars.insert("status".into(), Value::String(alarm_status_str(alarm.status).into()));
        vars.insert("alarm_status".into(), Value::String(alarm_status_str(alarm.status).into()));
        insert_time_vars(&mut vars, alarm.timestamp);
        for (k, v) in &alarm.custom_vars {
            vars.insert(format!("custom_vars.{k}"), v.clone());
        }
        Self { vars }
    }

    /// Builds a context for a plain point value (no alarm state), used when
    /// dispatching value batches through the same templates.
    pub fn from_value(site_id: i64, point_id: i64, point_name: &str, description: Option<&str>, value: &pulse_common::RawValue, timestamp: DateTime<Utc>) -> Self {
        let mut vars = HashMap::new();
        vars.insert("building_id".into(), Value::from(site_id));
        vars.insert("site_id".into(), Value::from(site_id));
        vars.insert("point_id".into(), Value::from(point_id));
        vars.insert("point_name".into(), Value::String(point_name.to_string()));
        if let Some(desc) = description {
            vars.insert("description".into(), Value::String(desc.to_string()));
        }
        vars.insert("value".into(), value.to_json());
        vars.insert("alarm_flag".into(), Value::Bool(false));
        vars.insert("status".into(), Value::String("normal".into()));
        vars.insert("alarm_status".into(), Value::String("normal".into()));
        insert_time_vars(&mut vars, timestamp);
        Self { vars }
    }

    /// Overlays mapping-derived variables (spec's `target_field_name` /
    /// `target_description` / `converted_value`), which take precedence
    /// over the base alarm/value set since they are target-specific.
    pub fn with_mapping(mut self, target_field_name: Option<&str>, target_description: Option<&str>, converted_value: Option<&Value>) -> Self {
        if let Some(name) = target_field_name {
            self.vars.insert("target_field_name".into(), Value::String(name.to_string()));
        }
        if let Some(desc) = target_description {
            self.vars.insert("target_description".into(), Value::String(desc.to_string()));
        }
        if let Some(v) = converted_value {
            self.vars.insert("converted_value".into(), v.clone());
        }
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

fn insert_time_vars(vars: &mut HashMap<String, Value>, ts: DateTime<Utc>) {
    vars.insert("timestamp_iso8601".into(), Value::String(ts.to_rfc3339()));
    vars.insert("timestamp_unix_ms".into(), Value::from(ts.timestamp_millis()));
    vars.insert("year".into(), Value::from(ts.format("%Y").to_string()));
    vars.insert("month".into(), Value::from(ts.format("%m").to_string()));
    vars.insert("day".into(), Value::from(ts.format("%d").to_string()));
    vars.insert("hour".into(), Value::from(ts.format("%H").to_string()));
    vars.insert("minute".into(), Value::from(ts.format("%M").to_string()));
    vars.insert("second".into(), Value::from(ts.format("%S").to_string()));
    vars.insert("date".into(), Value::from(ts.format("%Y-%m-%d").to_string()));
}

/// Parses a leaf string for the `{{var}}`-only shape, returning the bare
/// variable name when it matches exactly (no surrounding text).
fn exact_var(s: &str) -> Option<&str> {
    let s = s.trim();
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Replaces every `{{var}}` occurrence in `s` with its string form, leaving
/// unresolved variables untouched.
fn interpolate_string(s: &str, ctx: &TransformContext) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find("}}") {
            let var = after[..end].trim();
            match ctx.resolve(var) {
                Some(Value::String(s)) => out.push_str(s),
                Some(v) => out.push_str(&value_to_plain_string(v)),
                None => out.push_str(&format!("{{{{{var}}}}}")),
            }
            rest = &after[end + 2..];
        } else {
            out.push_str("{{");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

fn value_to_plain_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Public string-interpolation entry point, used outside JSON bodies (an S3
/// object key template, a file handler's target filename) where there is no
/// leaf-type-preservation rule to apply — the result is always a string.
pub fn interpolate(s: &str, ctx: &TransformContext) -> String {
    interpolate_string(s, ctx)
}

/// Recursively substitutes `{{var}}` throughout `template`.
pub fn transform(template: &Value, ctx: &TransformContext) -> Value {
    match template {
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), transform(v, ctx))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(|v| transform(v, ctx)).collect()),
        Value::String(s) => match exact_var(s) {
            Some(var) => match ctx.resolve(var) {
                Some(v) if matches!(v, Value::Bool(_) | Value::Number(_)) => v.clone(),
                Some(v) => Value::String(value_to_plain_string(v)),
                None => Value::String(s.clone()),
            },
            None => Value::String(interpolate_string(s, ctx)),
        },
        other => other.clone(),
    }
}

pub fn default_template_body(kind: TemplateCategory) -> Value {
    match kind {
        TemplateCategory::Insite => insite_default_template(),
        TemplateCategory::Hdc => hdc_default_template(),
        TemplateCategory::Bems => bems_default_template(),
        TemplateCategory::Generic | TemplateCategory::User => generic_default_template(),
    }
}

/// Picks the transport-appropriate default when a target carries no
/// `template_id` (spec §4.9 step 3 "else transport-default" — Open Question
/// resolved in DESIGN.md: HTTP/MQTT/File fall back to GENERIC, S3 has no
/// payload template of its own since its body is the object content).
pub fn transport_default_category(kind: TargetKind) -> TemplateCategory {
    match kind {
        TargetKind::Http | TargetKind::Mqtt | TargetKind::File | TargetKind::S3 => TemplateCategory::Generic,
    }
}

fn generic_default_template() -> Value {
    serde_json::json!({
        "site_id": "{{site_id}}",
        "point_id": "{{point_id}}",
        "point_name": "{{point_name}}",
        "value": "{{value}}",
        "status": "{{status}}",
        "timestamp": "{{timestamp_iso8601}}"
    })
}

fn insite_default_template() -> Value {
    serde_json::json!({
        "buildingId": "{{building_id}}",
        "pointId": "{{point_id}}",
        "pointName": "{{point_name}}",
        "value": "{{value}}",
        "alarmStatus": "{{alarm_status}}",
        "timestamp": "{{timestamp_iso8601}}"
    })
}

fn hdc_default_template() -> Value {
    serde_json::json!({
        "deviceId": "{{site_id}}-{{point_id}}",
        "metric": "{{point_name}}",
        "reading": "{{value}}",
        "collectedAt": "{{timestamp_unix_ms}}"
    })
}

fn bems_default_template() -> Value {
    serde_json::json!({
        "energy_point": {
            "site": "{{site_id}}",
            "point": "{{point_name}}",
            "description": "{{description}}"
        },
        "value": "{{value}}",
        "quality": "{{status}}",
        "date": "{{date}}",
        "time": { "hour": "{{hour}}", "minute": "{{minute}}", "second": "{{second}}" }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::RawValue;

    fn sample_alarm() -> Alarm {
        Alarm {
            site_id: 7,
            point_id: Some(42),
            point_name: Some("Boiler Temp".into()),
            description: Some("boiler outlet".into()),
            measured_value: RawValue::Float(98.6),
            timestamp: "2026-01-15T10:30:00Z".parse().unwrap(),
            alarm_flag: true,
            status: AlarmStatus::Alert,
            manual_override: false,
            extra_info: None,
            custom_vars: HashMap::new(),
        }
    }

    #[test]
    fn exact_var_leaf_preserves_native_numeric_type() {
        let ctx = TransformContext::from_alarm(&sample_alarm());
        let template = serde_json::json!({ "value": "{{value}}" });
        let out = transform(&template, &ctx);
        assert_eq!(out["value"], serde_json::json!(98.6));
    }

    #[test]
    fn exact_var_leaf_preserves_native_bool_type() {
        let ctx = TransformContext::from_alarm(&sample_alarm());
        let template = serde_json::json!({ "is_alarm": "{{alarm_flag}}" });
        let out = transform(&template, &ctx);
        assert_eq!(out["is_alarm"], Value::Bool(true));
    }

    #[test]
    fn non_exact_leaf_is_string_interpolated() {
        let ctx = TransformContext::from_alarm(&sample_alarm());
        let template = serde_json::json!({ "msg": "alarm on {{point_name}}: {{value}}" });
        let out = transform(&template, &ctx);
        assert_eq!(out["msg"], Value::String("alarm on Boiler Temp: 98.6".into()));
    }

    #[test]
    fn missing_variable_is_left_literal() {
        let ctx = TransformContext::from_alarm(&sample_alarm());
        let template = serde_json::json!({ "x": "{{nonexistent}}" });
        let out = transform(&template, &ctx);
        assert_eq!(out["x"], Value::String("{{nonexistent}}".into()));
    }

    #[test]
    fn arrays_and_nested_objects_are_walked() {
        let ctx = TransformContext::from_alarm(&sample_alarm());
        let template = serde_json::json!({ "tags": ["{{point_name}}", {"site": "{{site_id}}"}] });
        let out = transform(&template, &ctx);
        assert_eq!(out["tags"][0], Value::String("Boiler Temp".into()));
        assert_eq!(out["tags"][1]["site"], serde_json::json!(7));
    }

    #[test]
    fn custom_vars_resolve_with_dotted_prefix() {
        let mut alarm = sample_alarm();
        alarm.custom_vars.insert("shift".into(), Value::String("night".into()));
        let ctx = TransformContext::from_alarm(&alarm);
        let template = serde_json::json!({ "shift": "{{custom_vars.shift}}" });
        let out = transform(&template, &ctx);
        assert_eq!(out["shift"], Value::String("night".into()));
    }

    #[test]
    fn default_templates_cover_all_categories() {
        let ctx = TransformContext::from_alarm(&sample_alarm());
        for cat in [TemplateCategory::Insite, TemplateCategory::Hdc, TemplateCategory::Bems, TemplateCategory::Generic] {
            let body = default_template_body(cat);
            let out = transform(&body, &ctx);
            assert!(out.is_object());
        }
    }
}
