//! The fully formed collection object.
//!
//! A [`DefaultCollection`] is built by the tenant manager from the latest
//! schema version plus the ordered schema history, and is the object the
//! query runners validate documents against. Rows written under older
//! schema versions are re-shaped on read.

use std::collections::HashMap;

use lodestone_types::{ApiError, ApiResult, CollectionId};
use serde_json::{Map, Value};

use crate::factory::{Factory, Index};
use crate::field::{Field, FieldType, QueryableField};
use crate::mutator::StoredDefault;
use crate::reserved::RESERVED_PREFIX;
use crate::search_index::{ImplicitSearchIndex, SearchIndex};

/// One persisted schema revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    pub version: i32,
    pub schema: Vec<u8>,
}

/// A collection with its schema history and search indexes resolved.
#[derive(Debug, Clone)]
pub struct DefaultCollection {
    pub id: CollectionId,
    pub name: String,
    version: i32,
    /// Latest raw schema bytes.
    pub schema: Vec<u8>,
    pub fields: Vec<Field>,
    pub primary_key: Index,
    pub queryable_fields: Vec<QueryableField>,
    /// Ascending schema history, latest last. Needed for on-read upgrade
    /// and describe.
    versions: Vec<SchemaVersion>,
    pub implicit_search_index: ImplicitSearchIndex,
    /// Explicit search indexes sourced from this collection, linked back
    /// by the tenant reload.
    pub search_indexes: HashMap<String, SearchIndex>,
    /// Encoded table prefix, assigned by the tenant manager.
    pub encoded_name: Vec<u8>,
}

impl DefaultCollection {
    /// Builds the collection from a parsed factory. `versions` carries the
    /// full ascending history; when absent the latest schema is the only
    /// revision.
    pub fn new(
        id: CollectionId,
        version: i32,
        factory: &Factory,
        versions: Option<Vec<SchemaVersion>>,
        implicit_search_index: ImplicitSearchIndex,
    ) -> ApiResult<Self> {
        let versions = versions.unwrap_or_else(|| {
            vec![SchemaVersion { version, schema: factory.schema.clone() }]
        });

        Ok(Self {
            id,
            name: factory.name.clone(),
            version,
            schema: factory.schema.clone(),
            fields: factory.fields.clone(),
            primary_key: factory.primary_key.clone(),
            queryable_fields: factory.queryable_fields(),
            versions,
            implicit_search_index,
            search_indexes: HashMap::new(),
            encoded_name: Vec::new(),
        })
    }

    /// The latest schema version of this collection.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// The ascending schema history.
    pub fn schema_versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    /// Looks up a queryable field by its dot-delimited path.
    pub fn queryable_field(&self, name: &str) -> ApiResult<&QueryableField> {
        self.queryable_fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                ApiError::invalid_argument(format!("`{name}` is not a schema field"))
            })
    }

    /// Attaches an explicit search index sourced from this collection.
    pub fn add_search_index(&mut self, index: SearchIndex) {
        self.search_indexes.insert(index.name.clone(), index);
    }

    /// True if any field must be refreshed on update (update-time tags).
    pub fn has_tagged_defaults_for_update(&self) -> bool {
        fields_have_update_tag(&self.fields)
    }

    /// True if a row written under `version` can be served without
    /// re-shaping.
    pub fn compatible_schema_since(&self, version: i32) -> bool {
        version >= self.version
    }

    /// Re-shapes a row written under an older schema: fields no longer in
    /// the schema are dropped; fields added since are filled from their
    /// literal defaults when one exists.
    pub fn update_row_schema(&self, doc: &mut Map<String, Value>) {
        doc.retain(|name, _| self.fields.iter().any(|f| &f.name == name));
        for field in &self.fields {
            if doc.contains_key(&field.name) {
                continue;
            }
            if let Some(default) = &field.default {
                if let StoredDefault::Literal(value) = StoredDefault::parse(default) {
                    doc.insert(field.name.clone(), value);
                }
            }
        }
    }

    /// Raw-bytes variant of [`Self::update_row_schema`].
    pub fn update_row_schema_raw(&self, raw: &[u8]) -> ApiResult<Vec<u8>> {
        let mut doc: Map<String, Value> = serde_json::from_slice(raw)
            .map_err(|e| ApiError::internal(format!("stored row is not valid JSON: {e}")))?;
        self.update_row_schema(&mut doc);
        serde_json::to_vec(&doc).map_err(|e| ApiError::internal(e.to_string()))
    }

    /// Validates a decoded document against the latest schema.
    pub fn validate(&self, doc: &Map<String, Value>) -> ApiResult<()> {
        validate_object(&self.fields, doc)
    }
}

fn fields_have_update_tag(fields: &[Field]) -> bool {
    fields
        .iter()
        .any(|f| f.updated_at_tag || fields_have_update_tag(&f.fields))
}

fn validate_object(fields: &[Field], doc: &Map<String, Value>) -> ApiResult<()> {
    for (name, value) in doc {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(ApiError::invalid_argument(format!(
                "field '{name}' is reserved"
            )));
        }
        let field = fields.iter().find(|f| &f.name == name).ok_or_else(|| {
            ApiError::invalid_argument(format!(
                "json schema validation failed for field '{name}': additional properties are not allowed"
            ))
        })?;
        validate_value(field, value)?;
    }
    for field in fields {
        if field.required && !doc.contains_key(&field.name) {
            return Err(ApiError::invalid_argument(format!(
                "missing required field '{}'",
                field.name
            )));
        }
    }
    Ok(())
}

fn validate_value(field: &Field, value: &Value) -> ApiResult<()> {
    if value.is_null() {
        if field.required {
            return Err(type_error(field, value));
        }
        return Ok(());
    }

    match field.data_type {
        FieldType::Integer => {
            if value.as_i64().is_none() {
                return Err(type_error(field, value));
            }
        }
        FieldType::Number => {
            if !value.is_number() {
                return Err(type_error(field, value));
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                return Err(type_error(field, value));
            }
        }
        FieldType::String => {
            let raw = value.as_str().ok_or_else(|| type_error(field, value))?;
            if let Some(max) = field.max_length {
                if raw.chars().count() as u32 > max {
                    return Err(ApiError::invalid_argument(format!(
                        "field '{}' exceeds maximum length {max}",
                        field.name
                    )));
                }
            }
        }
        FieldType::Uuid => {
            let raw = value.as_str().ok_or_else(|| type_error(field, value))?;
            uuid::Uuid::parse_str(raw).map_err(|_| {
                ApiError::invalid_argument(format!(
                    "field '{}' is not a valid UUID: '{raw}'",
                    field.name
                ))
            })?;
        }
        FieldType::DateTime => {
            let raw = value.as_str().ok_or_else(|| type_error(field, value))?;
            chrono::DateTime::parse_from_rfc3339(raw).map_err(|_| {
                ApiError::invalid_argument(format!(
                    "field '{}' is not a valid date-time: '{raw}'",
                    field.name
                ))
            })?;
        }
        FieldType::Bytes => {
            if !value.is_string() {
                return Err(type_error(field, value));
            }
        }
        FieldType::Array => {
            let items = value.as_array().ok_or_else(|| type_error(field, value))?;
            if let Some(item_type) = field.items {
                let item_field = Field {
                    name: field.name.clone(),
                    data_type: item_type,
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
                };
                for item in items {
                    validate_value(&item_field, item)?;
                }
            }
        }
        FieldType::Object => {
            let child = value.as_object().ok_or_else(|| type_error(field, value))?;
            if !field.fields.is_empty() {
                validate_object(&field.fields, child)?;
            }
        }
    }
    Ok(())
}

fn type_error(field: &Field, value: &Value) -> ApiError {
    ApiError::invalid_argument(format!(
        "json schema validation failed for field '{}': expected {}, found {value}",
        field.name,
        field.data_type.type_keyword(),
    ))
}
