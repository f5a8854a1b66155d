//! Primary-key generation for inserts.
//!
//! Binds the primary-key tuple from the document, generating values for
//! missing parts the schema tags as auto-generated: UUIDs for string
//! keys, the per-table counter for integer keys, the write timestamp for
//! date-time keys. Generated integer keys force strict-insert semantics
//! so racing workers cannot silently overwrite each other.

use lodestone_kv::Key;
use lodestone_metadata::{Dictionary, Encoder, Tx};
use lodestone_schema::{DefaultCollection, FieldType};
use lodestone_types::{ApiError, ApiResult, KeyPart, Timestamp};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Binds and encodes one document's primary key.
pub struct KeyGenerator {
    pub document: Map<String, Value>,
    parts: Vec<KeyPart>,
    /// Set when a generated part requires strict-insert semantics.
    pub force_insert: bool,
}

impl KeyGenerator {
    pub fn new(document: Map<String, Value>) -> Self {
        Self { document, parts: Vec::new(), force_insert: false }
    }

    /// Resolves every primary-key part and returns the encoded row key.
    /// Generated values are written back into the document.
    pub async fn generate(
        &mut self,
        tx: &mut Tx,
        dict: &Dictionary,
        encoder: &Encoder,
        collection: &DefaultCollection,
        ts: Timestamp,
    ) -> ApiResult<Key> {
        self.parts.clear();
        for pk_field in &collection.primary_key.fields {
            let value = match self.document.get(&pk_field.name) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    let field = collection
                        .fields
                        .iter()
                        .find(|f| f.name == pk_field.name);
                    if !field.is_some_and(|f| f.auto_generate) {
                        return Err(ApiError::invalid_argument(format!(
                            "missing primary key field '{}'",
                            pk_field.name
                        )));
                    }
                    let generated = self
                        .generate_value(tx, dict, collection, pk_field.data_type, ts)
                        .await?;
                    self.document.insert(pk_field.name.clone(), generated.clone());
                    generated
                }
            };
            self.parts.push(to_key_part(&pk_field.name, pk_field.data_type, &value)?);
        }

        Ok(encoder.encode_key(
            &collection.encoded_name,
            collection.primary_key.id,
            &self.parts,
        ))
    }

    async fn generate_value(
        &mut self,
        tx: &mut Tx,
        dict: &Dictionary,
        collection: &DefaultCollection,
        data_type: FieldType,
        ts: Timestamp,
    ) -> ApiResult<Value> {
        match data_type {
            FieldType::String | FieldType::Uuid => {
                Ok(Value::String(Uuid::new_v4().to_string()))
            }
            FieldType::Integer => {
                let next = dict.next_table_counter(tx, &collection.encoded_name).await?;
                self.force_insert = true;
                Ok(Value::from(next))
            }
            FieldType::DateTime => {
                self.force_insert = true;
                Ok(Value::String(ts.to_rfc3339()))
            }
            FieldType::Bytes => Ok(Value::String(Uuid::new_v4().simple().to_string())),
            other => Err(ApiError::invalid_argument(format!(
                "cannot auto-generate key of type '{}'",
                other.type_keyword()
            ))),
        }
    }

    /// Primary-key tuple echoed in the response, in key order.
    pub fn keys_for_response(&self) -> Value {
        Value::Array(
            self.parts
                .iter()
                .map(|part| match part {
                    KeyPart::Integer(v) => Value::from(*v),
                    KeyPart::String(v) => Value::String(v.clone()),
                    KeyPart::Bytes(v) => {
                        Value::String(String::from_utf8_lossy(v).into_owned())
                    }
                })
                .collect(),
        )
    }
}

/// Converts a bound document value into a key part of the declared type.
pub fn to_key_part(name: &str, data_type: FieldType, value: &Value) -> ApiResult<KeyPart> {
    let mismatch = || {
        ApiError::invalid_argument(format!(
            "unsupported value for primary key field '{name}'"
        ))
    };
    match data_type {
        FieldType::Integer => value.as_i64().map(KeyPart::Integer).ok_or_else(mismatch),
        FieldType::String | FieldType::Uuid | FieldType::DateTime => value
            .as_str()
            .map(|s| KeyPart::String(s.to_owned()))
            .ok_or_else(mismatch),
        FieldType::Bytes => value
            .as_str()
            .map(|s| KeyPart::Bytes(s.as_bytes().to_vec()))
            .ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lodestone_kv::MemoryKvStore;
    use lodestone_metadata::{NameRegistry, TxManager};
    use lodestone_schema::{Factory, ImplicitSearchIndex};
    use lodestone_types::CollectionId;
    use serde_json::json;

    use super::*;

    fn collection(schema: &str) -> DefaultCollection {
        let factory = Factory::build("t", schema.as_bytes()).expect("factory");
        let implicit = ImplicitSearchIndex::new("t", "ns-db-t", &factory, &[]);
        let mut coll = DefaultCollection::new(CollectionId::new(1), 1, &factory, None, implicit)
            .expect("collection");
        coll.encoded_name = b"tbl-keygen______".to_vec();
        coll
    }

    fn fixtures() -> (TxManager, Dictionary, Encoder) {
        let registry = Arc::new(NameRegistry::default());
        (
            TxManager::new(Arc::new(MemoryKvStore::new()), Arc::clone(&registry)),
            Dictionary::new(&registry),
            Encoder::new(),
        )
    }

    #[tokio::test]
    async fn test_bound_key() {
        let (manager, dict, encoder) = fixtures();
        let coll = collection(
            r#"{"title": "t", "properties": {"k": {"type": "string"}}, "primary_key": ["k"]}"#,
        );
        let doc = json!({"k": "a"}).as_object().expect("object").clone();

        let mut tx = manager.start_tx().await.expect("start");
        let mut keygen = KeyGenerator::new(doc);
        let key = keygen
            .generate(&mut tx, &dict, &encoder, &coll, Timestamp::now())
            .await
            .expect("generate");
        assert!(key.raw().starts_with(&coll.encoded_name));
        assert!(!keygen.force_insert);
        assert_eq!(keygen.keys_for_response(), json!(["a"]));
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_missing_key_without_autogenerate() {
        let (manager, dict, encoder) = fixtures();
        let coll = collection(
            r#"{"title": "t", "properties": {"k": {"type": "string"}}, "primary_key": ["k"]}"#,
        );

        let mut tx = manager.start_tx().await.expect("start");
        let mut keygen = KeyGenerator::new(Map::new());
        let err = keygen
            .generate(&mut tx, &dict, &encoder, &coll, Timestamp::now())
            .await
            .expect_err("missing");
        assert!(err.to_string().contains("missing primary key field 'k'"));
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_autogenerated_uuid() {
        let (manager, dict, encoder) = fixtures();
        let coll = collection(
            r#"{"title": "t", "properties": {"k": {"type": "string", "format": "uuid", "autoGenerate": true}}, "primary_key": ["k"]}"#,
        );

        let mut tx = manager.start_tx().await.expect("start");
        let mut keygen = KeyGenerator::new(Map::new());
        keygen
            .generate(&mut tx, &dict, &encoder, &coll, Timestamp::now())
            .await
            .expect("generate");
        let generated = keygen.document["k"].as_str().expect("string");
        assert!(Uuid::parse_str(generated).is_ok());
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_autogenerated_integer_uses_counter_and_forces_insert() {
        let (manager, dict, encoder) = fixtures();
        let coll = collection(
            r#"{"title": "t", "properties": {"k": {"type": "integer", "autoGenerate": true}}, "primary_key": ["k"]}"#,
        );

        let mut tx = manager.start_tx().await.expect("start");
        let mut first = KeyGenerator::new(Map::new());
        first
            .generate(&mut tx, &dict, &encoder, &coll, Timestamp::now())
            .await
            .expect("generate");
        let mut second = KeyGenerator::new(Map::new());
        second
            .generate(&mut tx, &dict, &encoder, &coll, Timestamp::now())
            .await
            .expect("generate");

        assert!(first.force_insert);
        assert_eq!(first.document["k"], json!(1));
        assert_eq!(second.document["k"], json!(2));
        tx.rollback().await.expect("rollback");
    }
}
