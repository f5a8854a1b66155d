//! Schema factory: parses collection schema JSON into the field model.

use lodestone_types::{ApiError, ApiResult, IndexId};
use serde_json::{Map, Value};

use crate::field::{build_queryable_fields, Field, FieldType, QueryableField};
use crate::reserved::RESERVED_PREFIX;

/// Name of the primary-key index of every collection.
pub const PRIMARY_KEY_INDEX_NAME: &str = "pkey";

/// A primary-key part: the field it binds and the value type expected in
/// the encoded tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    pub name: String,
    pub data_type: FieldType,
}

/// A secondary (or primary) index over a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    /// Dictionary-encoded id, assigned when the collection is created.
    pub id: IndexId,
    pub fields: Vec<IndexField>,
}

/// Parsed form of a collection schema, produced by [`Factory::build`] and
/// consumed by the tenant manager when creating or updating a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Factory {
    pub name: String,
    /// The raw schema bytes as submitted, persisted verbatim.
    pub schema: Vec<u8>,
    pub fields: Vec<Field>,
    pub primary_key: Index,
}

impl Factory {
    /// Parses and validates a schema payload for the named collection.
    pub fn build(coll_name: &str, schema: &[u8]) -> ApiResult<Self> {
        if schema.is_empty() {
            return Err(ApiError::invalid_argument("schema is a required field"));
        }
        let root: Value = serde_json::from_slice(schema)
            .map_err(|e| ApiError::invalid_argument(format!("schema is not valid JSON: {e}")))?;
        let root = root
            .as_object()
            .ok_or_else(|| ApiError::invalid_argument("schema must be a JSON object"))?;

        if let Some(title) = root.get("title").and_then(Value::as_str) {
            if title != coll_name {
                return Err(ApiError::invalid_argument(format!(
                    "collection name is not same as schema name '{coll_name}' '{title}'"
                )));
            }
        }

        let properties = root
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| ApiError::invalid_argument("missing properties field in schema"))?;
        let required: Vec<&str> = root
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields = Vec::with_capacity(properties.len());
        for (name, prop) in properties {
            fields.push(parse_field(name, prop, &required)?);
        }

        let pk_names: Vec<String> = root
            .get("primary_key")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        if pk_names.is_empty() {
            return Err(ApiError::invalid_argument(
                "missing primary key field in schema",
            ));
        }

        let mut pk_fields = Vec::with_capacity(pk_names.len());
        for pk in &pk_names {
            let field = fields.iter().find(|f| &f.name == pk).ok_or_else(|| {
                ApiError::invalid_argument(format!(
                    "missing primary key field '{pk}' in schema properties"
                ))
            })?;
            if !field.data_type.primary_key_capable() {
                return Err(ApiError::invalid_argument(format!(
                    "unsupported primary key type detected '{}'",
                    field.data_type.type_keyword()
                )));
            }
            pk_fields.push(IndexField { name: pk.clone(), data_type: field.data_type });
        }

        Ok(Factory {
            name: coll_name.to_owned(),
            schema: schema.to_vec(),
            fields,
            primary_key: Index {
                name: PRIMARY_KEY_INDEX_NAME.to_owned(),
                id: IndexId::new(0),
                fields: pk_fields,
            },
        })
    }

    /// All indexes of the collection; the primary key is always first.
    pub fn indexes(&self) -> Vec<&Index> {
        vec![&self.primary_key]
    }

    /// Derives the queryable-field list for this schema.
    pub fn queryable_fields(&self) -> Vec<QueryableField> {
        build_queryable_fields(&self.fields)
    }
}

fn parse_field(name: &str, prop: &Value, required: &[&str]) -> ApiResult<Field> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(ApiError::invalid_argument(format!(
            "field name cannot start with reserved prefix '{RESERVED_PREFIX}': '{name}'"
        )));
    }
    let prop = prop
        .as_object()
        .ok_or_else(|| ApiError::invalid_argument(format!("property '{name}' must be an object")))?;

    let ty = prop
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::invalid_argument(format!("missing type for field '{name}'")))?;
    let format = prop.get("format").and_then(Value::as_str);
    let data_type = FieldType::parse(ty, format).ok_or_else(|| {
        ApiError::invalid_argument(format!("unsupported type '{ty}' for field '{name}'"))
    })?;

    let mut fields = Vec::new();
    if data_type == FieldType::Object {
        if let Some(children) = prop.get("properties").and_then(Value::as_object) {
            let child_required: Vec<&str> = prop
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            for (child_name, child_prop) in children {
                fields.push(parse_field(child_name, child_prop, &child_required)?);
            }
        }
    }

    let items = if data_type == FieldType::Array {
        prop.get("items")
            .and_then(Value::as_object)
            .and_then(item_type)
    } else {
        None
    };

    Ok(Field {
        name: name.to_owned(),
        data_type,
        max_length: prop
            .get("max_length")
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        required: required.contains(&name),
        default: prop.get("default").cloned(),
        created_at_tag: bool_tag(prop, "createdAt"),
        updated_at_tag: bool_tag(prop, "updatedAt"),
        auto_generate: bool_tag(prop, "autoGenerate"),
        sortable: bool_tag(prop, "sortable"),
        faceted: bool_tag(prop, "facet"),
        fields,
        items,
    })
}

fn item_type(items: &Map<String, Value>) -> Option<FieldType> {
    let ty = items.get("type").and_then(Value::as_str)?;
    FieldType::parse(ty, items.get("format").and_then(Value::as_str))
}

fn bool_tag(prop: &Map<String, Value>, tag: &str) -> bool {
    prop.get(tag).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "title": "orders",
        "properties": {
            "order_id": {"type": "string", "format": "uuid", "autoGenerate": true},
            "seq": {"type": "integer"},
            "note": {"type": "string", "max_length": 128},
            "placed_at": {"type": "string", "format": "date-time", "createdAt": true},
            "address": {"type": "object", "properties": {"city": {"type": "string"}}}
        },
        "primary_key": ["order_id", "seq"]
    }"#;

    #[test]
    fn test_build_factory() {
        let factory = Factory::build("orders", SCHEMA.as_bytes()).expect("build");
        assert_eq!(factory.name, "orders");
        assert_eq!(factory.fields.len(), 5);
        assert_eq!(factory.primary_key.fields.len(), 2);
        assert_eq!(factory.primary_key.fields[0].name, "order_id");
        assert_eq!(factory.primary_key.fields[0].data_type, FieldType::Uuid);
        assert_eq!(factory.primary_key.fields[1].data_type, FieldType::Integer);

        let queryable = factory.queryable_fields();
        assert!(queryable.iter().any(|f| f.name == "address.city"));
    }

    #[test]
    fn test_title_mismatch_rejected() {
        let err = Factory::build("users", SCHEMA.as_bytes()).expect_err("title mismatch");
        assert!(err.to_string().contains("not same as schema name"));
    }

    #[test]
    fn test_missing_primary_key_rejected() {
        let schema = br#"{"title": "t", "properties": {"a": {"type": "string"}}}"#;
        let err = Factory::build("t", schema).expect_err("no pk");
        assert!(err.to_string().contains("missing primary key"));
    }

    #[test]
    fn test_unknown_pk_field_rejected() {
        let schema =
            br#"{"title": "t", "properties": {"a": {"type": "string"}}, "primary_key": ["b"]}"#;
        let err = Factory::build("t", schema).expect_err("unknown pk field");
        assert!(err.to_string().contains("missing primary key field 'b'"));
    }

    #[test]
    fn test_boolean_pk_rejected() {
        let schema =
            br#"{"title": "t", "properties": {"a": {"type": "boolean"}}, "primary_key": ["a"]}"#;
        let err = Factory::build("t", schema).expect_err("bool pk");
        assert!(err.to_string().contains("unsupported primary key type"));
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let schema = br#"{"title": "t", "properties": {"_lodestone_x": {"type": "string"}}, "primary_key": ["_lodestone_x"]}"#;
        let err = Factory::build("t", schema).expect_err("reserved prefix");
        assert!(err.to_string().contains("reserved prefix"));
    }
}
