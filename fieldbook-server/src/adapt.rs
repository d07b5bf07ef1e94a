//! Payload adapters: how an arbitrary pushed value becomes a card payload
//!
//! An explicit ordered list of typed adapters, each a predicate plus a
//! converter, evaluated in priority order. The first matching adapter
//! produces a tagged value; anything unmatched falls back to a plain text
//! rendering. Every card kind is an enum variant, so rendering downstream
//! is exhaustive at compile time.

use crate::store::TableData;
use base64::Engine;
use fieldbook_common::model::KeyValueEntry;
use fieldbook_common::{Error, Result};
use serde_json::Value;

/// A pushed value after shape adaptation, before artifact storage
#[derive(Debug)]
pub enum AdaptedValue {
    Table(TableData),
    Chart(Value),
    Image { bytes: Vec<u8>, media_type: String },
    KeyValue(Vec<KeyValueEntry>),
    Section,
    AgentTask { status: String, detail: Option<String> },
    Markdown(String),
    Text(String),
}

struct Adapter {
    name: &'static str,
    probe: fn(&Value) -> bool,
    convert: fn(&Value) -> Result<AdaptedValue>,
}

/// Priority order matters: the most specific shapes probe first, and the
/// key/value adapter must come after every other object shape.
const ADAPTERS: &[Adapter] = &[
    Adapter {
        name: "records_table",
        probe: probe_records_table,
        convert: convert_records_table,
    },
    Adapter {
        name: "columnar_table",
        probe: probe_columnar_table,
        convert: convert_columnar_table,
    },
    Adapter {
        name: "chart",
        probe: probe_chart,
        convert: convert_chart,
    },
    Adapter {
        name: "image",
        probe: probe_image,
        convert: convert_image,
    },
    Adapter {
        name: "section",
        probe: probe_section,
        convert: convert_section,
    },
    Adapter {
        name: "agent_task",
        probe: probe_agent_task,
        convert: convert_agent_task,
    },
    Adapter {
        name: "keyvalue",
        probe: probe_keyvalue,
        convert: convert_keyvalue,
    },
    Adapter {
        name: "markdown",
        probe: probe_markdown,
        convert: convert_markdown,
    },
];

/// Adapt a pushed value, falling back to plain text when nothing matches
pub fn adapt(value: &Value) -> Result<AdaptedValue> {
    for adapter in ADAPTERS {
        if (adapter.probe)(value) {
            tracing::debug!("Value matched '{}' adapter", adapter.name);
            return (adapter.convert)(value);
        }
    }
    Ok(AdaptedValue::Text(
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
    ))
}

fn probe_records_table(value: &Value) -> bool {
    match value.as_array() {
        Some(rows) => !rows.is_empty() && rows.iter().all(Value::is_object),
        None => false,
    }
}

fn convert_records_table(value: &Value) -> Result<AdaptedValue> {
    let rows = value
        .as_array()
        .ok_or_else(|| Error::InvalidInput("expected an array of records".to_string()))?;
    Ok(AdaptedValue::Table(TableData::from_records(rows)?))
}

fn probe_columnar_table(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            !obj.is_empty()
                && obj.values().all(Value::is_array)
                && obj
                    .values()
                    .filter_map(Value::as_array)
                    .map(Vec::len)
                    .collect::<std::collections::HashSet<_>>()
                    .len()
                    == 1
        }
        None => false,
    }
}

fn convert_columnar_table(value: &Value) -> Result<AdaptedValue> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidInput("expected a columnar object".to_string()))?;
    Ok(AdaptedValue::Table(TableData::from_columns(obj)?))
}

/// Vega-lite-like spec (`mark` + `data`) or an explicit `$chart` wrapper
fn probe_chart(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            obj.contains_key("$chart")
                || (obj.contains_key("mark") && obj.contains_key("data"))
        }
        None => false,
    }
}

fn convert_chart(value: &Value) -> Result<AdaptedValue> {
    let spec = value
        .as_object()
        .and_then(|obj| obj.get("$chart"))
        .cloned()
        .unwrap_or_else(|| value.clone());
    Ok(AdaptedValue::Chart(spec))
}

/// A `data:image/...;base64,` URL, or `{image: <base64>, media_type}`
fn probe_image(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with("data:image/"),
        Value::Object(obj) => obj.get("image").map(Value::is_string).unwrap_or(false),
        _ => false,
    }
}

fn convert_image(value: &Value) -> Result<AdaptedValue> {
    let engine = base64::engine::general_purpose::STANDARD;
    match value {
        Value::String(url) => {
            let rest = url.strip_prefix("data:").unwrap_or(url);
            let (media_type, data) = rest.split_once(";base64,").ok_or_else(|| {
                Error::InvalidInput("image data URL must be base64-encoded".to_string())
            })?;
            let bytes = engine
                .decode(data)
                .map_err(|e| Error::InvalidInput(format!("invalid image base64: {}", e)))?;
            Ok(AdaptedValue::Image {
                bytes,
                media_type: media_type.to_string(),
            })
        }
        Value::Object(obj) => {
            let data = obj
                .get("image")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidInput("missing image data".to_string()))?;
            let bytes = engine
                .decode(data)
                .map_err(|e| Error::InvalidInput(format!("invalid image base64: {}", e)))?;
            let media_type = obj
                .get("media_type")
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            Ok(AdaptedValue::Image { bytes, media_type })
        }
        _ => Err(Error::InvalidInput("unsupported image value".to_string())),
    }
}

fn probe_section(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.len() == 1 && obj.contains_key("section"))
        .unwrap_or(false)
}

fn convert_section(_value: &Value) -> Result<AdaptedValue> {
    Ok(AdaptedValue::Section)
}

fn probe_agent_task(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.contains_key("task") && obj.contains_key("status"))
        .unwrap_or(false)
}

fn convert_agent_task(value: &Value) -> Result<AdaptedValue> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidInput("expected a task object".to_string()))?;
    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("pending")
        .to_string();
    let detail = obj
        .get("task")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(AdaptedValue::AgentTask { status, detail })
}

/// A flat object of scalars reads as a key/value card
fn probe_keyvalue(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            !obj.is_empty()
                && obj.len() <= 64
                && obj
                    .values()
                    .all(|v| v.is_string() || v.is_number() || v.is_boolean() || v.is_null())
        }
        None => false,
    }
}

fn convert_keyvalue(value: &Value) -> Result<AdaptedValue> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidInput("expected an object".to_string()))?;
    Ok(AdaptedValue::KeyValue(
        obj.iter()
            .map(|(key, value)| KeyValueEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
    ))
}

fn probe_markdown(value: &Value) -> bool {
    value.is_string()
}

fn convert_markdown(value: &Value) -> Result<AdaptedValue> {
    Ok(AdaptedValue::Markdown(
        value.as_str().unwrap_or_default().to_string(),
    ))
}

/// Section heading from a `{"section": "..."}` push, used as the card title
pub fn section_heading(value: &Value) -> Option<String> {
    value
        .as_object()
        .and_then(|obj| obj.get("section"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_win_over_everything() {
        let value = json!([{"a": 1}, {"a": 2}]);
        assert!(matches!(adapt(&value).unwrap(), AdaptedValue::Table(_)));
    }

    #[test]
    fn test_columnar_object() {
        let value = json!({"a": [1, 2], "b": ["x", "y"]});
        match adapt(&value).unwrap() {
            AdaptedValue::Table(table) => assert_eq!(table.row_count(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_ragged_columns_are_not_a_table() {
        // Arrays of different lengths fail the probe and fall through
        let value = json!({"a": [1, 2], "b": ["x"]});
        assert!(!matches!(adapt(&value).unwrap(), AdaptedValue::Table(_)));
    }

    #[test]
    fn test_chart_spec() {
        let value = json!({"mark": "bar", "data": {"values": []}});
        assert!(matches!(adapt(&value).unwrap(), AdaptedValue::Chart(_)));

        let wrapped = json!({"$chart": {"kind": "scatter"}});
        match adapt(&wrapped).unwrap() {
            AdaptedValue::Chart(spec) => assert_eq!(spec, json!({"kind": "scatter"})),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_image_data_url() {
        let engine = base64::engine::general_purpose::STANDARD;
        let encoded = engine.encode(b"pixels");
        let value = json!(format!("data:image/png;base64,{}", encoded));
        match adapt(&value).unwrap() {
            AdaptedValue::Image { bytes, media_type } => {
                assert_eq!(bytes, b"pixels");
                assert_eq!(media_type, "image/png");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_section_marker() {
        let value = json!({"section": "Phase 2: enrollment"});
        assert!(matches!(adapt(&value).unwrap(), AdaptedValue::Section));
        assert_eq!(
            section_heading(&value).as_deref(),
            Some("Phase 2: enrollment")
        );
    }

    #[test]
    fn test_agent_task() {
        let value = json!({"task": "fit the model", "status": "running"});
        match adapt(&value).unwrap() {
            AdaptedValue::AgentTask { status, detail } => {
                assert_eq!(status, "running");
                assert_eq!(detail.as_deref(), Some("fit the model"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_flat_object_is_keyvalue() {
        let value = json!({"model": "cox", "n": 412, "converged": true});
        match adapt(&value).unwrap() {
            AdaptedValue::KeyValue(entries) => assert_eq!(entries.len(), 3),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_string_is_markdown() {
        let value = json!("## Findings\nnothing significant");
        assert!(matches!(adapt(&value).unwrap(), AdaptedValue::Markdown(_)));
    }

    #[test]
    fn test_fallback_to_text() {
        // Nested object: not a table, chart, image, task, or flat keyvalue
        let value = json!({"nested": {"deep": [1, {"x": 2}]}});
        assert!(matches!(adapt(&value).unwrap(), AdaptedValue::Text(_)));

        let number = json!(42);
        assert!(matches!(adapt(&number).unwrap(), AdaptedValue::Text(_)));
    }
}
