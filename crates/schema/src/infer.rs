//! Schema inference for imports.
//!
//! Builds or evolves a collection schema from a batch of documents. Types
//! widen monotonically: integer joins number as number, and any clash
//! falls back to string. String formats (uuid, date-time) are detected
//! per value and kept only while every observed value agrees.

use lodestone_types::{ApiError, ApiResult};
use serde_json::{json, Map, Value};

/// Infers a schema for `coll_name` from `docs`, seeded with the current
/// schema when the collection already exists.
///
/// `primary_key` overrides the key fields; when empty, the existing
/// schema's key is kept, falling back to an auto-generated `id`.
/// `autogenerated` names fields to tag for server-side generation.
pub fn infer_schema(
    existing: Option<&[u8]>,
    coll_name: &str,
    docs: &[Vec<u8>],
    primary_key: &[String],
    autogenerated: &[String],
) -> ApiResult<Vec<u8>> {
    let mut properties = Map::new();
    let mut existing_pk: Option<Value> = None;

    if let Some(existing) = existing {
        let root: Value = serde_json::from_slice(existing)
            .map_err(|e| ApiError::internal(format!("stored schema is not valid JSON: {e}")))?;
        if let Some(props) = root.get("properties").and_then(Value::as_object) {
            properties = props.clone();
        }
        existing_pk = root.get("primary_key").cloned();
    }

    for doc in docs {
        let parsed: Map<String, Value> = serde_json::from_slice(doc).map_err(|e| {
            ApiError::invalid_argument(format!("document is not a valid JSON object: {e}"))
        })?;
        merge_object(&mut properties, &parsed);
    }

    let primary_key: Value = if !primary_key.is_empty() {
        json!(primary_key)
    } else if let Some(pk) = existing_pk {
        pk
    } else {
        // no natural key: generate one
        if !properties.contains_key("id") {
            properties.insert(
                "id".to_owned(),
                json!({"type": "string", "format": "uuid", "autoGenerate": true}),
            );
        }
        json!(["id"])
    };

    for name in autogenerated {
        if let Some(Value::Object(prop)) = properties.get_mut(name) {
            prop.insert("autoGenerate".to_owned(), Value::Bool(true));
        }
    }

    for pk in primary_key.as_array().into_iter().flatten() {
        if let Some(name) = pk.as_str() {
            if !properties.contains_key(name) {
                return Err(ApiError::invalid_argument(format!(
                    "primary key field '{name}' is missing in the documents"
                )));
            }
        }
    }

    let schema = json!({
        "title": coll_name,
        "properties": properties,
        "primary_key": primary_key,
    });
    serde_json::to_vec(&schema).map_err(|e| ApiError::internal(e.to_string()))
}

fn merge_object(properties: &mut Map<String, Value>, doc: &Map<String, Value>) {
    for (name, value) in doc {
        if value.is_null() {
            continue;
        }
        let inferred = infer_property(value);
        match properties.get(name) {
            None => {
                properties.insert(name.clone(), inferred);
            }
            Some(existing) => {
                let merged = merge_property(existing, &inferred);
                properties.insert(name.clone(), merged);
            }
        }
    }
}

fn infer_property(value: &Value) -> Value {
    match value {
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                json!({"type": "integer"})
            } else {
                json!({"type": "number"})
            }
        }
        Value::String(s) => {
            if uuid::Uuid::parse_str(s).is_ok() {
                json!({"type": "string", "format": "uuid"})
            } else if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
                json!({"type": "string", "format": "date-time"})
            } else {
                json!({"type": "string"})
            }
        }
        Value::Array(items) => {
            let item = items
                .iter()
                .filter(|v| !v.is_null())
                .map(infer_property)
                .reduce(|a, b| merge_property(&a, &b));
            match item {
                Some(item) => json!({"type": "array", "items": item}),
                None => json!({"type": "array"}),
            }
        }
        Value::Object(child) => {
            let mut properties = Map::new();
            merge_object(&mut properties, child);
            json!({"type": "object", "properties": properties})
        }
        Value::Null => json!({"type": "string"}),
    }
}

/// Joins two property definitions, widening on clash.
fn merge_property(a: &Value, b: &Value) -> Value {
    let (Some(a_obj), Some(b_obj)) = (a.as_object(), b.as_object()) else {
        return json!({"type": "string"});
    };
    let a_type = a_obj.get("type").and_then(Value::as_str).unwrap_or("string");
    let b_type = b_obj.get("type").and_then(Value::as_str).unwrap_or("string");

    if a_type == b_type {
        let mut merged = a_obj.clone();
        match a_type {
            "string" => {
                // formats survive only while both sides agree
                if a_obj.get("format") != b_obj.get("format") {
                    merged.remove("format");
                }
            }
            "object" => {
                let mut properties = a_obj
                    .get("properties")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if let Some(b_props) = b_obj.get("properties").and_then(Value::as_object) {
                    for (name, prop) in b_props {
                        let joined = match properties.get(name) {
                            Some(existing) => merge_property(existing, prop),
                            None => prop.clone(),
                        };
                        properties.insert(name.clone(), joined);
                    }
                }
                merged.insert("properties".to_owned(), Value::Object(properties));
            }
            "array" => {
                let joined = match (a_obj.get("items"), b_obj.get("items")) {
                    (Some(a_items), Some(b_items)) => Some(merge_property(a_items, b_items)),
                    (Some(items), None) | (None, Some(items)) => Some(items.clone()),
                    (None, None) => None,
                };
                if let Some(items) = joined {
                    merged.insert("items".to_owned(), items);
                }
            }
            _ => {}
        }
        return Value::Object(merged);
    }

    match (a_type, b_type) {
        ("integer", "number") | ("number", "integer") => json!({"type": "number"}),
        _ => json!({"type": "string"}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(raw: &[&str]) -> Vec<Vec<u8>> {
        raw.iter().map(|d| d.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_infer_basic_types() {
        let schema = infer_schema(
            None,
            "events",
            &docs(&[r#"{"name": "a", "count": 3, "score": 1.5, "ok": true}"#]),
            &["name".to_owned()],
            &[],
        )
        .expect("infer");

        let parsed: Value = serde_json::from_slice(&schema).expect("json");
        assert_eq!(parsed["title"], "events");
        assert_eq!(parsed["properties"]["name"]["type"], "string");
        assert_eq!(parsed["properties"]["count"]["type"], "integer");
        assert_eq!(parsed["properties"]["score"]["type"], "number");
        assert_eq!(parsed["properties"]["ok"]["type"], "boolean");
        assert_eq!(parsed["primary_key"], json!(["name"]));
    }

    #[test]
    fn test_infer_formats() {
        let schema = infer_schema(
            None,
            "events",
            &docs(&[r#"{"uid": "8f8e8c80-6d2f-4f5c-9d9d-111111111111", "at": "2023-01-01T00:00:00Z"}"#]),
            &["uid".to_owned()],
            &[],
        )
        .expect("infer");

        let parsed: Value = serde_json::from_slice(&schema).expect("json");
        assert_eq!(parsed["properties"]["uid"]["format"], "uuid");
        assert_eq!(parsed["properties"]["at"]["format"], "date-time");
    }

    #[test]
    fn test_infer_generates_id_key() {
        let schema = infer_schema(None, "events", &docs(&[r#"{"name": "a"}"#]), &[], &[])
            .expect("infer");
        let parsed: Value = serde_json::from_slice(&schema).expect("json");
        assert_eq!(parsed["primary_key"], json!(["id"]));
        assert_eq!(parsed["properties"]["id"]["autoGenerate"], json!(true));
    }

    #[test]
    fn test_widening_int_to_number_and_string() {
        let schema = infer_schema(
            None,
            "events",
            &docs(&[r#"{"k": "a", "v": 1}"#, r#"{"k": "b", "v": 1.5}"#]),
            &["k".to_owned()],
            &[],
        )
        .expect("infer");
        let parsed: Value = serde_json::from_slice(&schema).expect("json");
        assert_eq!(parsed["properties"]["v"]["type"], "number");

        // clash with string widens to string, seeded from the previous schema
        let evolved = infer_schema(
            Some(&schema),
            "events",
            &docs(&[r#"{"k": "c", "v": "surprise"}"#]),
            &[],
            &[],
        )
        .expect("infer");
        let parsed: Value = serde_json::from_slice(&evolved).expect("json");
        assert_eq!(parsed["properties"]["v"]["type"], "string");
        // the key survives from the seed schema
        assert_eq!(parsed["primary_key"], json!(["k"]));
    }

    #[test]
    fn test_nested_objects_and_arrays() {
        let schema = infer_schema(
            None,
            "events",
            &docs(&[r#"{"k": "a", "meta": {"n": 1}, "tags": ["x", "y"]}"#]),
            &["k".to_owned()],
            &[],
        )
        .expect("infer");
        let parsed: Value = serde_json::from_slice(&schema).expect("json");
        assert_eq!(parsed["properties"]["meta"]["type"], "object");
        assert_eq!(parsed["properties"]["meta"]["properties"]["n"]["type"], "integer");
        assert_eq!(parsed["properties"]["tags"]["items"]["type"], "string");
    }

    #[test]
    fn test_missing_pk_field_rejected() {
        let err = infer_schema(
            None,
            "events",
            &docs(&[r#"{"name": "a"}"#]),
            &["absent".to_owned()],
            &[],
        )
        .expect_err("missing pk");
        assert!(err.to_string().contains("primary key field 'absent'"));
    }
}
