//! Payload mutators applied to incoming documents before validation.
//!
//! Two mutations happen on the way in: numeric fields submitted as
//! strings are coerced to int64 (JSON cannot carry the full 64-bit
//! range), and missing fields with defaults are filled. Insert fills
//! every tagged or defaulted field; update only refreshes fields tagged
//! with an update time.

use lodestone_types::{ApiError, ApiResult};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::field::{Field, FieldType};

/// A resolvable default value: either a literal from the schema or one of
/// the generator functions.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredDefault {
    Literal(Value),
    Now,
    Uuid,
}

impl StoredDefault {
    /// Classifies a schema `default` value.
    pub fn parse(value: &Value) -> Self {
        match value.as_str() {
            Some("now()") => StoredDefault::Now,
            Some("uuid()") => StoredDefault::Uuid,
            _ => StoredDefault::Literal(value.clone()),
        }
    }

    /// Materializes the default for a write happening at `ts_rfc3339`.
    pub fn resolve(&self, ts_rfc3339: &str) -> Value {
        match self {
            StoredDefault::Literal(value) => value.clone(),
            StoredDefault::Now => Value::String(ts_rfc3339.to_owned()),
            StoredDefault::Uuid => Value::String(Uuid::new_v4().to_string()),
        }
    }
}

/// Mutates a decoded document in place; `mutated()` reports whether the
/// payload needs re-serialization.
pub struct PayloadMutator<'a> {
    fields: &'a [Field],
    ts_rfc3339: &'a str,
    for_insert: bool,
    mutated: bool,
}

impl<'a> PayloadMutator<'a> {
    /// Mutator for inserts and replaces.
    pub fn for_insert(fields: &'a [Field], ts_rfc3339: &'a str) -> Self {
        Self { fields, ts_rfc3339, for_insert: true, mutated: false }
    }

    /// Mutator for updates and update-merged payloads.
    pub fn for_update(fields: &'a [Field], ts_rfc3339: &'a str) -> Self {
        Self { fields, ts_rfc3339, for_insert: false, mutated: false }
    }

    pub fn mutated(&self) -> bool {
        self.mutated
    }

    /// Coerces string-encoded integers into int64 for integer fields,
    /// recursing into typed objects.
    pub fn string_to_int64(&mut self, doc: &mut Map<String, Value>) -> ApiResult<()> {
        self.coerce_fields(self.fields, doc)
    }

    fn coerce_fields(&mut self, fields: &[Field], doc: &mut Map<String, Value>) -> ApiResult<()> {
        for field in fields {
            let Some(value) = doc.get_mut(&field.name) else {
                continue;
            };
            match field.data_type {
                FieldType::Integer => {
                    if let Value::String(raw) = value {
                        let parsed: i64 = raw.parse().map_err(|_| {
                            ApiError::invalid_argument(format!(
                                "expected integer for field '{}', found '{raw}'",
                                field.name
                            ))
                        })?;
                        *value = Value::from(parsed);
                        self.mutated = true;
                    }
                }
                FieldType::Object => {
                    if let Value::Object(child) = value {
                        let children = field.fields.clone();
                        self.coerce_fields(&children, child)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Fills defaults. On insert every missing defaulted/tagged field is
    /// set; on update only update-time-tagged fields are refreshed.
    pub fn set_defaults(&mut self, doc: &mut Map<String, Value>) -> ApiResult<()> {
        self.defaults_for(self.fields, doc)
    }

    fn defaults_for(&mut self, fields: &[Field], doc: &mut Map<String, Value>) -> ApiResult<()> {
        for field in fields {
            if field.data_type == FieldType::Object && !field.fields.is_empty() {
                if let Some(Value::Object(child)) = doc.get_mut(&field.name) {
                    let children = field.fields.clone();
                    self.defaults_for(&children, child)?;
                }
                continue;
            }

            if field.updated_at_tag {
                // refreshed on every write, insert included
                doc.insert(field.name.clone(), Value::String(self.ts_rfc3339.to_owned()));
                self.mutated = true;
                continue;
            }
            if !self.for_insert || doc.contains_key(&field.name) {
                continue;
            }
            if field.created_at_tag {
                doc.insert(field.name.clone(), Value::String(self.ts_rfc3339.to_owned()));
                self.mutated = true;
            } else if let Some(default) = &field.default {
                let resolved = StoredDefault::parse(default).resolve(self.ts_rfc3339);
                doc.insert(field.name.clone(), resolved);
                self.mutated = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn field(name: &str, data_type: FieldType) -> Field {
        Field {
            name: name.to_owned(),
            data_type,
            max_length: None,
            required: false,
            default: None,
            created_at_tag: false,
            updated_at_tag: false,
            auto_generate: false,
            sortable: false,
            faceted: false,
            fields: Vec::new(),
            items: None,
        }
    }

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn test_string_to_int64() {
        let fields = vec![field("seq", FieldType::Integer), field("name", FieldType::String)];
        let mut payload = doc(json!({"seq": "9223372036854775807", "name": "17"}));

        let mut mutator = PayloadMutator::for_insert(&fields, "");
        mutator.string_to_int64(&mut payload).expect("coerce");
        assert!(mutator.mutated());
        assert_eq!(payload["seq"], json!(i64::MAX));
        // non-integer fields stay untouched
        assert_eq!(payload["name"], json!("17"));
    }

    #[test]
    fn test_string_to_int64_rejects_garbage() {
        let fields = vec![field("seq", FieldType::Integer)];
        let mut payload = doc(json!({"seq": "not-a-number"}));
        let mut mutator = PayloadMutator::for_insert(&fields, "");
        let err = mutator.string_to_int64(&mut payload).expect_err("garbage");
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_insert_defaults() {
        let mut created = field("created", FieldType::DateTime);
        created.created_at_tag = true;
        let mut status = field("status", FieldType::String);
        status.default = Some(json!("open"));

        let fields = vec![created, status, field("name", FieldType::String)];
        let mut payload = doc(json!({"name": "a"}));

        let mut mutator = PayloadMutator::for_insert(&fields, "2023-01-01T00:00:00Z");
        mutator.set_defaults(&mut payload).expect("defaults");
        assert_eq!(payload["created"], json!("2023-01-01T00:00:00Z"));
        assert_eq!(payload["status"], json!("open"));
    }

    #[test]
    fn test_insert_defaults_do_not_overwrite() {
        let mut status = field("status", FieldType::String);
        status.default = Some(json!("open"));
        let fields = vec![status];
        let mut payload = doc(json!({"status": "closed"}));

        let mut mutator = PayloadMutator::for_insert(&fields, "");
        mutator.set_defaults(&mut payload).expect("defaults");
        assert_eq!(payload["status"], json!("closed"));
        assert!(!mutator.mutated());
    }

    #[test]
    fn test_update_refreshes_updated_at_only() {
        let mut touched = field("touched", FieldType::DateTime);
        touched.updated_at_tag = true;
        let mut status = field("status", FieldType::String);
        status.default = Some(json!("open"));

        let fields = vec![touched, status];
        let mut payload = doc(json!({}));

        let mut mutator = PayloadMutator::for_update(&fields, "2023-06-01T00:00:00Z");
        mutator.set_defaults(&mut payload).expect("defaults");
        assert_eq!(payload["touched"], json!("2023-06-01T00:00:00Z"));
        assert!(!payload.contains_key("status"));
    }

    #[test]
    fn test_uuid_default() {
        let mut id = field("id", FieldType::Uuid);
        id.default = Some(json!("uuid()"));
        let fields = vec![id];
        let mut payload = doc(json!({}));

        let mut mutator = PayloadMutator::for_insert(&fields, "");
        mutator.set_defaults(&mut payload).expect("defaults");
        let generated = payload["id"].as_str().expect("string");
        assert!(Uuid::parse_str(generated).is_ok());
    }
}
