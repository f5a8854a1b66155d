//! Per-operation query runners.
//!
//! Each operation is a function sharing helpers through [`RunnerContext`]
//! by composition; the session manager dispatches the request union onto
//! them and owns the transaction lifecycle. Runners orchestrate
//! validation, mutation, key building, transactional execution, and the
//! search mirror.

pub mod ddl;
pub mod import;
pub mod read;
pub mod search;
pub mod write;

use std::sync::Arc;

use lodestone_kv::Key;
use lodestone_metadata::{Database, Dictionary, Encoder, Tenant, Tx, TxManager, VersionHandler};
use lodestone_query::{FilterFactory, KeyBuilder, SortKey};
use lodestone_schema::{DefaultCollection, PayloadMutator};
use lodestone_search::SearchStore;
use lodestone_types::{ApiError, ApiResult, TableData, Timestamp};
use serde_json::{Map, Value};
use tracing::warn;

use crate::api::WriteResponse;
use crate::indexer::SearchIndexer;
use crate::keygen::KeyGenerator;
use crate::reader::{DatabaseReader, RowIterator};

/// Shared dependencies of every runner.
pub struct RunnerContext {
    pub tx_manager: TxManager,
    pub dict: Dictionary,
    pub encoder: Encoder,
    pub versions: VersionHandler,
    pub search: Arc<dyn SearchStore>,
    pub indexer: SearchIndexer,
    pub search_read_enabled: bool,
}

impl RunnerContext {
    /// Starts a transaction and reloads the tenant when its cached state
    /// is behind the global metadata version.
    pub async fn start_synced_tx(&self, tenant: &Tenant) -> ApiResult<Tx> {
        let mut tx = self.tx_manager.start_tx().await.map_err(ApiError::from)?;
        let version = self.versions.read(tx.kv()).await.map_err(ApiError::from)?;
        tenant.reload_if_stale(&mut tx, version).await?;
        Ok(tx)
    }

    /// Commits a transaction and mirrors its event log into the search
    /// store. Mirror failures never fail the committed transaction.
    pub async fn commit_and_mirror(&self, tx: Tx) -> ApiResult<()> {
        let events = tx.commit().await.map_err(ApiError::from)?;
        if let Err(err) = self.indexer.on_post_commit(&events).await {
            warn!(%err, "search mirroring failed after commit");
        }
        Ok(())
    }
}

/// The database for this request: the transaction's staged clone when a
/// DDL already touched it, otherwise the tenant cache.
pub fn get_database(
    tx: &Tx,
    tenant: &Tenant,
    project: &str,
    branch: &str,
) -> ApiResult<Database> {
    if let Some(staged) = tx.staged_database() {
        return Ok(staged.clone());
    }
    tenant.get_database(project, branch)
}

pub fn get_collection(db: &Database, name: &str) -> ApiResult<DefaultCollection> {
    db.get_collection(name)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("collection doesn't exist '{name}'")))
}

/// Serializes the optional filter fragment; absent means match-all.
pub fn filter_bytes(filter: &Option<Value>) -> ApiResult<Vec<u8>> {
    match filter {
        None => Ok(b"{}".to_vec()),
        Some(value) => serde_json::to_vec(value).map_err(|e| ApiError::internal(e.to_string())),
    }
}

/// Applies the payload mutators (string→int64, defaults) and validates
/// the result against the collection schema.
pub fn mutate_and_validate(
    collection: &DefaultCollection,
    doc: &Value,
    ts: Timestamp,
    for_insert: bool,
) -> ApiResult<Map<String, Value>> {
    let mut doc = doc
        .as_object()
        .cloned()
        .ok_or_else(|| ApiError::invalid_argument("document must be a JSON object"))?;

    let ts_rfc3339 = ts.to_rfc3339();
    let mut mutator = if for_insert {
        PayloadMutator::for_insert(&collection.fields, &ts_rfc3339)
    } else {
        PayloadMutator::for_update(&collection.fields, &ts_rfc3339)
    };
    mutator.string_to_int64(&mut doc)?;
    mutator.set_defaults(&mut doc)?;

    collection.validate(&doc)?;
    Ok(doc)
}

/// Primary-key-bound row keys for the filter, when it strictly binds the
/// key; errors trigger the scan fallback in callers.
pub fn build_keys_using_filter(
    encoder: &Encoder,
    collection: &DefaultCollection,
    raw_filter: &[u8],
) -> ApiResult<Vec<Key>> {
    let factory = FilterFactory::new(collection.queryable_fields.clone());
    let filters = factory.factorize(raw_filter)?;
    let tuples = KeyBuilder::build(&filters, &collection.primary_key.fields)?;
    Ok(tuples
        .iter()
        .map(|tuple| {
            encoder.encode_key(&collection.encoded_name, collection.primary_key.id, tuple)
        })
        .collect())
}

/// Iterator for update/delete: a key iterator when the filter fully
/// binds the primary key, otherwise a filtered full scan.
pub async fn get_write_iterator(
    encoder: &Encoder,
    tx: &mut Tx,
    collection: &DefaultCollection,
    raw_filter: &[u8],
) -> ApiResult<Box<dyn RowIterator>> {
    let mut reader = DatabaseReader::new(tx);
    match build_keys_using_filter(encoder, collection, raw_filter) {
        Ok(keys) => reader.key_iterator(keys).await.map_err(ApiError::from),
        Err(_) => {
            let inner = reader
                .scan_table(&collection.encoded_name)
                .await
                .map_err(ApiError::from)?;
            let wrapped = FilterFactory::new(collection.queryable_fields.clone())
                .wrapped(raw_filter)?;
            Ok(DatabaseReader::filtered_read(inner, wrapped))
        }
    }
}

/// Parses and validates the sort fragment against the collection's
/// sortable fields.
pub fn get_sort_keys(
    collection: &DefaultCollection,
    sort: &Option<Value>,
) -> ApiResult<Option<Vec<SortKey>>> {
    let raw = match sort {
        None => return Ok(None),
        Some(value) => serde_json::to_vec(value).map_err(|e| ApiError::internal(e.to_string()))?,
    };
    let Some(keys) = lodestone_query::parse_sort(&raw)? else {
        return Ok(None);
    };
    for key in &keys {
        let field = collection.queryable_field(&key.name)?;
        if !field.sortable {
            return Err(ApiError::invalid_argument(format!(
                "Cannot sort on `{}` field",
                key.name
            )));
        }
    }
    Ok(Some(keys))
}

/// Writes one batch of documents. `insert` selects strict-insert
/// semantics; auto-generated integer keys force it per document.
pub async fn insert_or_replace(
    ctx: &RunnerContext,
    tx: &mut Tx,
    collection: &DefaultCollection,
    documents: &[Value],
    ts: Timestamp,
    insert: bool,
) -> ApiResult<Vec<Value>> {
    let mut all_keys = Vec::with_capacity(documents.len());
    for doc in documents {
        let mutated = mutate_and_validate(collection, doc, ts, true)?;

        let mut keygen = KeyGenerator::new(mutated);
        let key = keygen
            .generate(tx, &ctx.dict, &ctx.encoder, collection, ts)
            .await?;

        let raw = serde_json::to_vec(&keygen.document)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let data = TableData::new(ts, raw).with_version(collection.version());

        if insert || keygen.force_insert {
            tx.insert(&key, data).await.map_err(ApiError::from)?;
        } else {
            tx.replace(&key, data, false).await.map_err(ApiError::from)?;
        }
        all_keys.push(keygen.keys_for_response());
    }
    Ok(all_keys)
}

pub(crate) fn write_response(
    status: &str,
    metadata: crate::api::ResponseMetadata,
    keys: Vec<Value>,
    modified_count: i32,
) -> WriteResponse {
    WriteResponse { metadata, status: status.to_owned(), keys, modified_count }
}
