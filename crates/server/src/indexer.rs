//! Post-commit search indexer.
//!
//! Consumes the transaction event log after a successful commit and
//! mirrors row changes into the search store: the collection's implicit
//! index and every explicit index sourced from it. Mirroring is
//! best-effort; failures are surfaced to the session, logged, and never
//! roll back the committed transaction.

use std::sync::Arc;

use base64::Engine;
use lodestone_kv::{EventOp, TxEvent};
use lodestone_metadata::{Encoder, TenantManager};
use lodestone_schema::reserved::{
    to_search_date_key, ARR_NULL_ITEM, CREATED_AT, DATE_TIME_FORMAT, ID_TO_SEARCH_KEY,
    OBJ_FLATTEN_DELIMITER, SEARCH_ID, UPDATED_AT,
};
use lodestone_schema::{DefaultCollection, FieldType, QueryableField};
use lodestone_search::{IndexAction, SearchStore};
use lodestone_types::{ApiError, ApiResult, KeyPart, TableData, Timestamp};
use serde_json::{Map, Value};

/// Mirrors committed row events into the search store.
pub struct SearchIndexer {
    search: Arc<dyn SearchStore>,
    tenants: Arc<TenantManager>,
    encoder: Encoder,
}

impl SearchIndexer {
    pub fn new(search: Arc<dyn SearchStore>, tenants: Arc<TenantManager>) -> Self {
        Self { search, tenants, encoder: Encoder::new() }
    }

    /// Replays one transaction's event log against the search store, in
    /// event order.
    pub async fn on_post_commit(&self, events: &[TxEvent]) -> ApiResult<()> {
        for event in events {
            // stale events for dropped or unknown tables are skipped
            let Some((_, collection)) = self.tenants.lookup_collection(&event.table) else {
                continue;
            };

            let search_key = create_search_key(&self.encoder, &event.table, &event.key)?;

            let mut index_names =
                vec![collection.implicit_search_index.store_index_name().to_owned()];
            index_names.extend(
                collection
                    .search_indexes
                    .values()
                    .map(|index| index.store_index_name().to_owned()),
            );

            for index_name in index_names {
                self.apply(event, &collection, &index_name, &search_key).await?;
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        event: &TxEvent,
        collection: &DefaultCollection,
        index_name: &str,
        search_key: &str,
    ) -> ApiResult<()> {
        if event.op == EventOp::Delete {
            if let Err(err) = self.search.delete_document(index_name, search_key).await {
                if !err.is_not_found() {
                    return Err(err.into());
                }
            }
            return Ok(());
        }

        let action = match event.op {
            EventOp::Insert => IndexAction::Create,
            EventOp::Replace => IndexAction::Replace,
            EventOp::Update => IndexAction::Update,
            EventOp::Delete => unreachable!("handled above"),
        };

        let data = event
            .data
            .as_ref()
            .ok_or_else(|| ApiError::internal("write event without payload"))?;
        let doc = pack_search_fields(data, &collection.queryable_fields, search_key)?;

        self.search
            .index_document(index_name, search_key, doc, action)
            .await
            .map_err(ApiError::from)
    }
}

/// Derives the search document id from a row key: single integer or
/// string keys map directly, anything composite is the base64 of the
/// packed tuple.
pub fn create_search_key(encoder: &Encoder, table: &[u8], key: &[u8]) -> ApiResult<String> {
    let parts = encoder.decode_key(table, key)?;
    // the zeroth entry is the index id
    let pk = &parts[1..];
    match pk {
        [] => Err(ApiError::internal("row key without primary-key parts")),
        [KeyPart::Integer(value)] => Ok(value.to_string()),
        [KeyPart::String(value)] => Ok(value.clone()),
        [KeyPart::Bytes(value)] => {
            Ok(base64::engine::general_purpose::STANDARD.encode(value))
        }
        composite => {
            let packed = lodestone_metadata::encoder::encode_parts(composite);
            Ok(base64::engine::general_purpose::STANDARD.encode(packed))
        }
    }
}

/// Transforms a stored row into its search-document form: flattened
/// paths, packed typed fields, and the reserved id/timestamp fields.
pub fn pack_search_fields(
    data: &TableData,
    queryable: &[QueryableField],
    id: &str,
) -> ApiResult<Map<String, Value>> {
    let doc: Map<String, Value> = serde_json::from_slice(&data.raw)
        .map_err(|e| ApiError::internal(format!("stored row is not valid JSON: {e}")))?;

    let mut doc = flatten_objects(doc);

    if let Some(user_id) = doc.remove(SEARCH_ID) {
        // the document's own id moves aside for the search key
        doc.insert(ID_TO_SEARCH_KEY.to_owned(), user_id);
    }

    for field in queryable {
        match doc.get(&field.name) {
            None => continue,
            Some(Value::Null) => {
                doc.remove(&field.name);
                continue;
            }
            Some(_) => {}
        }

        if field.search_type == "string[]" {
            if let Some(Value::Array(items)) = doc.get_mut(&field.name) {
                for item in items {
                    if item.is_null() {
                        *item = Value::String(ARR_NULL_ITEM.to_owned());
                    }
                }
            }
        }

        if !field.should_pack() {
            continue;
        }
        match field.data_type {
            FieldType::DateTime => {
                let Some(raw) =
                    doc.get(&field.name).and_then(Value::as_str).map(str::to_owned)
                else {
                    continue;
                };
                let parsed = chrono::DateTime::parse_from_str(&raw, DATE_TIME_FORMAT)
                    .map_err(|_| {
                        ApiError::invalid_argument(format!(
                            "Validation failed, {raw} is not a valid date-time"
                        ))
                    })?;
                let nanos = parsed
                    .timestamp_nanos_opt()
                    .ok_or_else(|| ApiError::invalid_argument("date-time out of range"))?;
                // keep the original string under a shadow key
                doc.insert(to_search_date_key(&field.name), Value::String(raw.to_owned()));
                doc.insert(field.name.clone(), Value::from(nanos));
            }
            _ => {
                let value = doc.get(&field.name).cloned().unwrap_or(Value::Null);
                let packed = serde_json::to_string(&value)
                    .map_err(|e| ApiError::internal(e.to_string()))?;
                doc.insert(field.name.clone(), Value::String(packed));
            }
        }
    }

    doc.insert(SEARCH_ID.to_owned(), Value::String(id.to_owned()));
    doc.insert(CREATED_AT.to_owned(), Value::from(data.created_at.unix_nanos()));
    if let Some(updated_at) = data.updated_at {
        doc.insert(UPDATED_AT.to_owned(), Value::from(updated_at.unix_nanos()));
    }

    Ok(doc)
}

/// Exact inverse of [`pack_search_fields`]: restores user types, strips
/// the reserved fields, and unflattens the document.
pub fn unpack_search_fields(
    mut doc: Map<String, Value>,
    queryable: &[QueryableField],
) -> ApiResult<(String, TableData, Map<String, Value>)> {
    let created_at = doc
        .remove(CREATED_AT)
        .and_then(|v| v.as_i64())
        .map(Timestamp::from_unix_nanos)
        .unwrap_or(Timestamp::from_unix_nanos(0));
    let updated_at = doc
        .remove(UPDATED_AT)
        .and_then(|v| v.as_i64())
        .map(Timestamp::from_unix_nanos);

    for field in queryable {
        if field.search_type == "string[]" {
            if let Some(Value::Array(items)) = doc.get_mut(&field.name) {
                for item in items {
                    if item.as_str() == Some(ARR_NULL_ITEM) {
                        *item = Value::Null;
                    }
                }
            }
        }
        if !field.should_pack() {
            continue;
        }
        match field.data_type {
            FieldType::DateTime => {
                let shadow = to_search_date_key(&field.name);
                if let Some(original) = doc.remove(&shadow) {
                    doc.insert(field.name.clone(), original);
                }
            }
            _ => {
                if let Some(Value::String(packed)) = doc.get(&field.name) {
                    let restored: Value = serde_json::from_str(packed)
                        .map_err(|e| ApiError::internal(e.to_string()))?;
                    doc.insert(field.name.clone(), restored);
                }
            }
        }
    }

    let search_key = doc
        .remove(SEARCH_ID)
        .and_then(|v| v.as_str().map(str::to_owned))
        .ok_or_else(|| ApiError::internal("search document without id"))?;
    if let Some(user_id) = doc.remove(ID_TO_SEARCH_KEY) {
        doc.insert(SEARCH_ID.to_owned(), user_id);
    }

    let doc = unflatten_objects(doc);
    let raw = serde_json::to_vec(&doc).map_err(|e| ApiError::internal(e.to_string()))?;
    let mut data = TableData::new(created_at, raw);
    data.updated_at = updated_at;
    Ok((search_key, data, doc))
}

/// Flattens nested objects into dot-delimited paths.
pub fn flatten_objects(doc: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into("", doc, &mut out);
    out
}

fn flatten_into(prefix: &str, doc: Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}{OBJ_FLATTEN_DELIMITER}{key}")
        };
        match value {
            Value::Object(child) => flatten_into(&path, child, out),
            other => {
                out.insert(path, other);
            }
        }
    }
}

/// Rebuilds nested objects from dot-delimited paths.
pub fn unflatten_objects(flat: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (path, value) in flat {
        let mut keys: Vec<&str> = path.split(OBJ_FLATTEN_DELIMITER).collect();
        let leaf = keys.pop().unwrap_or(&path);
        insert_nested(&mut out, &keys, leaf, value);
    }
    out
}

/// Descends into `current` following `keys`, creating nested objects as
/// needed, then inserts `value` under `leaf` at the reached level.
fn insert_nested(current: &mut Map<String, Value>, keys: &[&str], leaf: &str, value: Value) {
    match keys.split_first() {
        None => {
            current.insert(leaf.to_owned(), value);
        }
        Some((key, rest)) => {
            let entry = current
                .entry((*key).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(child) => insert_nested(child, rest, leaf, value),
                _ => {
                    current.insert(leaf.to_owned(), value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lodestone_schema::Factory;
    use lodestone_types::{CollectionId, DatabaseId, IndexId, NamespaceId};
    use serde_json::json;

    use super::*;

    const SCHEMA: &str = r#"{
        "title": "orders",
        "properties": {
            "id": {"type": "string"},
            "placed_at": {"type": "string", "format": "date-time"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "scores": {"type": "array", "items": {"type": "integer"}},
            "address": {"type": "object", "properties": {"city": {"type": "string"}}}
        },
        "primary_key": ["id"]
    }"#;

    fn queryable() -> Vec<QueryableField> {
        Factory::build("orders", SCHEMA.as_bytes())
            .expect("factory")
            .queryable_fields()
    }

    fn data(doc: Value, updated: bool) -> TableData {
        let mut data = TableData::new(
            Timestamp::from_unix_nanos(1_000),
            serde_json::to_vec(&doc).expect("serialize"),
        );
        if updated {
            data.updated_at = Some(Timestamp::from_unix_nanos(2_000));
        }
        data
    }

    #[test]
    fn test_flatten_unflatten_roundtrip() {
        let doc = json!({"a": 1, "b": {"c": {"d": "x"}, "e": 2}})
            .as_object()
            .expect("object")
            .clone();
        let flat = flatten_objects(doc.clone());
        assert_eq!(flat.get("b.c.d"), Some(&json!("x")));
        assert_eq!(flat.get("b.e"), Some(&json!(2)));
        assert_eq!(unflatten_objects(flat), doc);
    }

    #[test]
    fn test_pack_fields() {
        let doc = json!({
            "id": "user-id",
            "placed_at": "2023-01-01T00:00:00Z",
            "tags": ["x", null],
            "scores": [1, 2],
            "address": {"city": "berlin"}
        });
        let packed =
            pack_search_fields(&data(doc, true), &queryable(), "search-key").expect("pack");

        // reserved ids and timestamps
        assert_eq!(packed[SEARCH_ID], json!("search-key"));
        assert_eq!(packed[ID_TO_SEARCH_KEY], json!("user-id"));
        assert_eq!(packed[CREATED_AT], json!(1_000));
        assert_eq!(packed[UPDATED_AT], json!(2_000));

        // dates become unix nanos with a shadow string
        assert_eq!(packed["placed_at"], json!(1_672_531_200_000_000_000i64));
        assert_eq!(packed["_lodestone_date_placed_at"], json!("2023-01-01T00:00:00Z"));

        // string arrays keep the null sentinel; other arrays are packed
        assert_eq!(packed["tags"], json!(["x", ARR_NULL_ITEM]));
        assert_eq!(packed["scores"], json!("[1,2]"));

        // nested objects are flattened
        assert_eq!(packed["address.city"], json!("berlin"));
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let doc = json!({
            "id": "user-id",
            "placed_at": "2023-01-01T00:00:00Z",
            "tags": ["x", null],
            "scores": [1, 2],
            "address": {"city": "berlin"}
        });
        let packed =
            pack_search_fields(&data(doc.clone(), true), &queryable(), "search-key")
                .expect("pack");

        let (key, restored_data, restored) =
            unpack_search_fields(packed, &queryable()).expect("unpack");
        assert_eq!(key, "search-key");
        assert_eq!(restored_data.created_at, Timestamp::from_unix_nanos(1_000));
        assert_eq!(restored_data.updated_at, Some(Timestamp::from_unix_nanos(2_000)));
        assert_eq!(Value::Object(restored), doc);
    }

    #[test]
    fn test_pack_rejects_bad_date() {
        let doc = json!({"id": "a", "placed_at": "yesterday"});
        let err = pack_search_fields(&data(doc, false), &queryable(), "k").expect_err("bad date");
        assert!(err.to_string().contains("not a valid date-time"));
    }

    #[test]
    fn test_create_search_key_shapes() {
        let encoder = Encoder::new();
        let table = encoder.encode_table_name(
            NamespaceId::new(1),
            Some(DatabaseId::new(2)),
            Some(CollectionId::new(3)),
        );

        // single string key maps directly
        let key = encoder.encode_key(&table, IndexId::new(1), &[KeyPart::from("a")]);
        assert_eq!(create_search_key(&encoder, &table, key.raw()).expect("key"), "a");

        // single integer key renders as decimal
        let key = encoder.encode_key(&table, IndexId::new(1), &[KeyPart::from(42)]);
        assert_eq!(create_search_key(&encoder, &table, key.raw()).expect("key"), "42");

        // composite keys are base64 of the packed tuple
        let parts = vec![KeyPart::from("a"), KeyPart::from(1)];
        let key = encoder.encode_key(&table, IndexId::new(1), &parts);
        let encoded = create_search_key(&encoder, &table, key.raw()).expect("key");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .expect("base64");
        assert_eq!(
            lodestone_metadata::encoder::decode_parts(&decoded).expect("parts"),
            parts
        );
    }
}
