//! Search-index schemas.
//!
//! Every collection carries an implicit search index mirroring its rows.
//! Users can additionally create explicit search indexes, sourced either
//! from a collection (mirrored on commit) or fed externally.

use lodestone_types::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::factory::Factory;
use crate::field::{build_queryable_fields, Field, QueryableField};
use crate::reserved::{to_search_date_key, CREATED_AT, UPDATED_AT};

/// A typed field as the search store sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub facet: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub sort: bool,
    #[serde(default)]
    pub optional: bool,
    /// Delta updates mark replaced fields with a drop entry followed by a
    /// re-add.
    #[serde(default)]
    pub drop: bool,
}

/// The schema pushed to the search store for one index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    pub fields: Vec<SearchField>,
}

/// Where an explicit search index gets its documents from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchSource {
    /// Mirrored from a collection on every commit.
    Collection {
        /// Database branch the collection lives on; `None` means main.
        branch: Option<String>,
        collection: String,
    },
    /// Documents are written by the user through the index API.
    External,
}

/// Parsed form of an explicit search-index schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchIndexFactory {
    pub name: String,
    pub schema: Vec<u8>,
    pub fields: Vec<Field>,
    pub source: SearchSource,
}

/// Parses an explicit search-index schema payload.
///
/// The payload mirrors a collection schema without a primary key, plus a
/// `source` block: `{"source": {"type": "collection"|"external",
/// "collection": …, "branch": …}}`.
pub fn build_search_factory(name: &str, schema: &[u8]) -> ApiResult<SearchIndexFactory> {
    // reuse the collection field parser by faking a primary key over the
    // synthetic id the search store assigns
    let root: Value = serde_json::from_slice(schema)
        .map_err(|e| ApiError::invalid_argument(format!("schema is not valid JSON: {e}")))?;
    let obj = root
        .as_object()
        .ok_or_else(|| ApiError::invalid_argument("schema must be a JSON object"))?;

    if let Some(title) = obj.get("title").and_then(Value::as_str) {
        if title != name {
            return Err(ApiError::invalid_argument(format!(
                "index name is not same as schema name '{name}' '{title}'"
            )));
        }
    }

    let source = match obj.get("source").and_then(Value::as_object) {
        None => SearchSource::External,
        Some(source) => match source.get("type").and_then(Value::as_str) {
            Some("collection") => SearchSource::Collection {
                branch: source
                    .get("branch")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                collection: source
                    .get("collection")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        ApiError::invalid_argument(
                            "collection-sourced index requires a source collection",
                        )
                    })?,
            },
            Some("external") | None => SearchSource::External,
            Some(other) => {
                return Err(ApiError::invalid_argument(format!(
                    "unsupported index source '{other}'"
                )))
            }
        },
    };

    // fields parse exactly like collection properties; an index schema has
    // no primary key of its own
    let mut coll_schema = obj.clone();
    coll_schema.remove("source");
    if coll_schema.get("properties").and_then(Value::as_object).is_none() {
        return Err(ApiError::invalid_argument("missing properties field in schema"));
    }
    let factory = parse_fields_only(name, &coll_schema)?;

    Ok(SearchIndexFactory {
        name: name.to_owned(),
        schema: schema.to_vec(),
        fields: factory.fields,
        source,
    })
}

fn parse_fields_only(name: &str, obj: &serde_json::Map<String, Value>) -> ApiResult<Factory> {
    // build with a synthetic string key so field parsing still runs
    let mut with_pk = obj.clone();
    let mut props = with_pk
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    props.insert(
        "__probe".to_owned(),
        serde_json::json!({"type": "string"}),
    );
    with_pk.insert("properties".to_owned(), Value::Object(props));
    with_pk.insert("primary_key".to_owned(), Value::from(vec!["__probe"]));
    let bytes = serde_json::to_vec(&with_pk).map_err(|e| ApiError::internal(e.to_string()))?;
    let mut factory = Factory::build(name, &bytes)?;
    factory.fields.retain(|f| f.name != "__probe");
    Ok(factory)
}

/// The search index automatically maintained for every collection.
#[derive(Debug, Clone)]
pub struct ImplicitSearchIndex {
    /// Collection name.
    pub name: String,
    store_index_name: String,
    pub queryable_fields: Vec<QueryableField>,
    pub store_schema: StoreSchema,
    /// Fields currently present in the search store, from the last
    /// describe; used for delta updates.
    pub fields_in_store: Vec<SearchField>,
}

impl ImplicitSearchIndex {
    pub fn new(
        coll_name: &str,
        store_index_name: &str,
        factory: &Factory,
        fields_in_store: &[SearchField],
    ) -> Self {
        let queryable_fields = factory.queryable_fields();
        let store_schema = StoreSchema {
            name: store_index_name.to_owned(),
            fields: store_fields_for(&queryable_fields),
        };
        Self {
            name: coll_name.to_owned(),
            store_index_name: store_index_name.to_owned(),
            queryable_fields,
            store_schema,
            fields_in_store: fields_in_store.to_vec(),
        }
    }

    /// Name of the backing index in the search store.
    pub fn store_index_name(&self) -> &str {
        &self.store_index_name
    }
}

/// An explicit, user-created search index.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    pub name: String,
    pub version: i32,
    pub schema: Vec<u8>,
    pub source: SearchSource,
    store_index_name: String,
    pub queryable_fields: Vec<QueryableField>,
    pub store_schema: StoreSchema,
    pub fields_in_store: Vec<SearchField>,
}

impl SearchIndex {
    pub fn new(
        version: i32,
        store_index_name: &str,
        factory: &SearchIndexFactory,
        fields_in_store: &[SearchField],
    ) -> Self {
        let queryable_fields = build_queryable_fields(&factory.fields);
        let store_schema = StoreSchema {
            name: store_index_name.to_owned(),
            fields: store_fields_for(&queryable_fields),
        };
        Self {
            name: factory.name.clone(),
            version,
            schema: factory.schema.clone(),
            source: factory.source.clone(),
            store_index_name: store_index_name.to_owned(),
            queryable_fields,
            store_schema,
            fields_in_store: fields_in_store.to_vec(),
        }
    }

    /// Name of the backing index in the search store.
    pub fn store_index_name(&self) -> &str {
        &self.store_index_name
    }
}

/// Builds the typed store fields for a queryable-field list, including
/// the reserved timestamp fields and date shadow keys.
fn store_fields_for(queryable: &[QueryableField]) -> Vec<SearchField> {
    let mut fields = Vec::with_capacity(queryable.len() + 2);
    for qf in queryable {
        let field_type = if qf.should_pack() && qf.search_type != "int64" {
            "string".to_owned()
        } else {
            qf.search_type.to_owned()
        };
        fields.push(SearchField {
            name: qf.name.clone(),
            field_type,
            facet: qf.faceted,
            index: qf.indexed,
            sort: qf.sortable,
            optional: true,
            drop: false,
        });
        if qf.data_type == crate::field::FieldType::DateTime {
            // shadow key keeps the original RFC 3339 string
            fields.push(SearchField {
                name: to_search_date_key(&qf.name),
                field_type: "string".to_owned(),
                facet: false,
                index: false,
                sort: false,
                optional: true,
                drop: false,
            });
        }
    }
    for reserved in [CREATED_AT, UPDATED_AT] {
        fields.push(SearchField {
            name: reserved.to_owned(),
            field_type: "int64".to_owned(),
            facet: false,
            index: true,
            sort: true,
            optional: true,
            drop: false,
        });
    }
    fields
}

/// Computes the delta schema patch to move the search store from
/// `fields_in_store` to the schema implied by `target`: new fields are
/// added, fields whose type changed are dropped and re-added.
pub fn search_delta_fields(
    target: &[SearchField],
    fields_in_store: &[SearchField],
) -> Vec<SearchField> {
    let mut delta = Vec::new();
    for field in target {
        match fields_in_store.iter().find(|f| f.name == field.name) {
            None => delta.push(field.clone()),
            Some(existing) if existing.field_type != field.field_type => {
                delta.push(SearchField { drop: true, ..existing.clone() });
                delta.push(field.clone());
            }
            Some(_) => {}
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLL_SCHEMA: &str = r#"{
        "title": "orders",
        "properties": {
            "order_id": {"type": "string"},
            "placed_at": {"type": "string", "format": "date-time"}
        },
        "primary_key": ["order_id"]
    }"#;

    #[test]
    fn test_implicit_index_store_schema() {
        let factory = Factory::build("orders", COLL_SCHEMA.as_bytes()).expect("factory");
        let index = ImplicitSearchIndex::new("orders", "ns-db-orders", &factory, &[]);

        assert_eq!(index.store_index_name(), "ns-db-orders");
        let names: Vec<&str> =
            index.store_schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"order_id"));
        assert!(names.contains(&"placed_at"));
        assert!(names.contains(&"_lodestone_date_placed_at"));
        assert!(names.contains(&"_lodestone_created_at"));
        assert!(names.contains(&"_lodestone_updated_at"));

        let placed = index
            .store_schema
            .fields
            .iter()
            .find(|f| f.name == "placed_at")
            .expect("field");
        assert_eq!(placed.field_type, "int64");
    }

    #[test]
    fn test_build_search_factory_collection_source() {
        let schema = br#"{
            "title": "order_text",
            "properties": {"note": {"type": "string"}},
            "source": {"type": "collection", "collection": "orders", "branch": "dev"}
        }"#;
        let factory = build_search_factory("order_text", schema).expect("factory");
        assert_eq!(
            factory.source,
            SearchSource::Collection { branch: Some("dev".to_owned()), collection: "orders".to_owned() }
        );
        assert_eq!(factory.fields.len(), 1);
    }

    #[test]
    fn test_build_search_factory_defaults_to_external() {
        let schema = br#"{"title": "t", "properties": {"note": {"type": "string"}}}"#;
        let factory = build_search_factory("t", schema).expect("factory");
        assert_eq!(factory.source, SearchSource::External);
    }

    #[test]
    fn test_search_delta_fields() {
        let target = vec![
            SearchField {
                name: "a".into(),
                field_type: "string".into(),
                facet: false,
                index: true,
                sort: false,
                optional: true,
                drop: false,
            },
            SearchField {
                name: "b".into(),
                field_type: "int64".into(),
                facet: false,
                index: true,
                sort: false,
                optional: true,
                drop: false,
            },
        ];
        let in_store = vec![SearchField {
            name: "b".into(),
            field_type: "string".into(),
            facet: false,
            index: true,
            sort: false,
            optional: true,
            drop: false,
        }];

        let delta = search_delta_fields(&target, &in_store);
        // "a" added; "b" dropped and re-added with the new type
        assert_eq!(delta.len(), 3);
        assert_eq!(delta[0].name, "a");
        assert!(delta[1].drop);
        assert_eq!(delta[1].name, "b");
        assert_eq!(delta[2].field_type, "int64");
    }

    #[test]
    fn test_delta_empty_when_unchanged() {
        let factory = Factory::build("orders", COLL_SCHEMA.as_bytes()).expect("factory");
        let index = ImplicitSearchIndex::new("orders", "ns-db-orders", &factory, &[]);
        let delta =
            search_delta_fields(&index.store_schema.fields, &index.store_schema.fields);
        assert!(delta.is_empty());
    }
}
