//! Insert, replace, update, and delete runners.

use lodestone_kv::Key;
use lodestone_metadata::{Tenant, Tx};
use lodestone_query::{self as query, FieldOperators};
use lodestone_schema::PayloadMutator;
use lodestone_types::{ApiError, ApiResult, TableData, Timestamp};
use serde_json::{Map, Value};

use super::{
    filter_bytes, get_collection, get_database, get_write_iterator, insert_or_replace,
    mutate_and_validate, write_response, RunnerContext,
};
use crate::api::{
    DeleteRequest, InsertRequest, ReplaceRequest, ResponseMetadata, UpdateRequest,
    WriteResponse, DELETED_STATUS, INSERTED_STATUS, REPLACED_STATUS, UPDATED_STATUS,
};
use crate::keygen::KeyGenerator;
use crate::reader::DatabaseReader;

pub async fn insert(
    ctx: &RunnerContext,
    tx: &mut Tx,
    tenant: &Tenant,
    req: &InsertRequest,
) -> ApiResult<WriteResponse> {
    let db = get_database(tx, tenant, &req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    let ts = Timestamp::now();
    let keys = insert_or_replace(ctx, tx, &collection, &req.documents, ts, true).await?;
    Ok(write_response(INSERTED_STATUS, ResponseMetadata::created(ts), keys, 0))
}

pub async fn replace(
    ctx: &RunnerContext,
    tx: &mut Tx,
    tenant: &Tenant,
    req: &ReplaceRequest,
) -> ApiResult<WriteResponse> {
    let db = get_database(tx, tenant, &req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    let ts = Timestamp::now();
    let keys = insert_or_replace(ctx, tx, &collection, &req.documents, ts, false).await?;
    Ok(write_response(REPLACED_STATUS, ResponseMetadata::created(ts), keys, 0))
}

pub async fn update(
    ctx: &RunnerContext,
    tx: &mut Tx,
    tenant: &Tenant,
    req: &UpdateRequest,
) -> ApiResult<WriteResponse> {
    let db = get_database(tx, tenant, &req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    let raw_filter = filter_bytes(&req.filter)?;
    if query::filter::none(&raw_filter) {
        return Err(ApiError::invalid_argument("updating all documents is not allowed"));
    }

    let fields = serde_json::to_vec(&req.fields).map_err(|e| ApiError::internal(e.to_string()))?;
    let mut operators = FieldOperators::build(&fields)?;

    let ts = Timestamp::now();
    if operators.has_set() {
        // the $set payload goes through the same mutation and validation
        // as an insert payload
        let payload = operators.set_payload()?;
        let payload: Value = serde_json::from_slice(&payload)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let mutated = mutate_and_validate(&collection, &payload, ts, false)?;
        let mutated =
            serde_json::to_vec(&mutated).map_err(|e| ApiError::internal(e.to_string()))?;
        operators.replace_set_payload(&mutated)?;
    }

    let limit = req.options.as_ref().map(|o| o.limit).unwrap_or(0);
    let pk_fields: Vec<String> = collection
        .primary_key
        .fields
        .iter()
        .map(|f| f.name.clone())
        .collect();

    let mut iterator = get_write_iterator(&ctx.encoder, tx, &collection, &raw_filter).await?;
    let mut modified_count: i32 = 0;
    while limit == 0 || i64::from(modified_count) < limit {
        let Some(row) = iterator.next().await.map_err(ApiError::from)? else {
            break;
        };

        let mut doc: Map<String, Value> = serde_json::from_slice(&row.data.raw)
            .map_err(|e| ApiError::internal(format!("stored row is not valid JSON: {e}")))?;

        // rows written under an older schema are upgraded before the merge
        if !collection.compatible_schema_since(row.data.version) {
            collection.update_row_schema(&mut doc);
        }
        if collection.has_tagged_defaults_for_update() {
            let ts_rfc3339 = ts.to_rfc3339();
            let mut mutator = PayloadMutator::for_update(&collection.fields, &ts_rfc3339);
            mutator.set_defaults(&mut doc)?;
        }

        let pk_mutation = operators.merge_into(&mut doc, &pk_fields)?;

        let raw = serde_json::to_vec(&doc).map_err(|e| ApiError::internal(e.to_string()))?;
        let new_data =
            TableData::updated(row.data.created_at, ts, raw).with_version(collection.version());

        let old_key = Key::from_raw(&collection.encoded_name, row.key);
        if pk_mutation {
            // the row moves: delete the old key and write under the new one
            let mut keygen = KeyGenerator::new(doc);
            let new_key = keygen
                .generate(tx, &ctx.dict, &ctx.encoder, &collection, ts)
                .await?;
            tx.delete(&old_key).await.map_err(ApiError::from)?;
            tx.replace(&new_key, new_data, false).await.map_err(ApiError::from)?;
        } else {
            tx.replace(&old_key, new_data, true).await.map_err(ApiError::from)?;
        }
        modified_count += 1;
    }

    Ok(write_response(
        UPDATED_STATUS,
        ResponseMetadata::updated(ts),
        Vec::new(),
        modified_count,
    ))
}

pub async fn delete(
    ctx: &RunnerContext,
    tx: &mut Tx,
    tenant: &Tenant,
    req: &DeleteRequest,
) -> ApiResult<WriteResponse> {
    let db = get_database(tx, tenant, &req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    let ts = Timestamp::now();
    let raw_filter = filter_bytes(&req.filter)?;

    let mut iterator = if query::filter::none(&raw_filter) {
        // match-all deletes walk the whole table
        DatabaseReader::new(tx)
            .scan_table(&collection.encoded_name)
            .await
            .map_err(ApiError::from)?
    } else {
        get_write_iterator(&ctx.encoder, tx, &collection, &raw_filter).await?
    };

    let limit = req.options.as_ref().map(|o| o.limit).unwrap_or(0);
    let mut modified_count: i32 = 0;
    while let Some(row) = iterator.next().await.map_err(ApiError::from)? {
        let key = Key::from_raw(&collection.encoded_name, row.key);
        tx.delete(&key).await.map_err(ApiError::from)?;
        modified_count += 1;
        if limit > 0 && i64::from(modified_count) == limit {
            break;
        }
    }

    Ok(write_response(
        DELETED_STATUS,
        ResponseMetadata::deleted(ts),
        Vec::new(),
        modified_count,
    ))
}
