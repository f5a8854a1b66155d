//! Import runner.
//!
//! Insert with schema inference: a missing collection is created from the
//! first batch (in its own transaction), and a batch rejected by schema
//! validation gets one recovery attempt after widening the schema from
//! the offending documents. The batch transaction is rolled back before
//! the retry, so the retry re-inserts the whole batch.

use lodestone_metadata::Tenant;
use lodestone_schema::{infer_schema, Factory};
use lodestone_types::{ApiError, ApiResult, ErrorCode, Timestamp};
use serde_json::Value;
use tracing::debug;

use super::{get_collection, get_database, insert_or_replace, RunnerContext};
use crate::api::{ImportRequest, ResponseMetadata, WriteResponse, INSERTED_STATUS};

pub async fn import(
    ctx: &RunnerContext,
    tenant: &Tenant,
    req: &ImportRequest,
) -> ApiResult<WriteResponse> {
    let mut tx = ctx.start_synced_tx(tenant).await?;

    let collection = match get_database(&tx, tenant, &req.project, &req.branch)
        .and_then(|db| get_collection(&db, &req.collection))
    {
        Ok(collection) => collection,
        Err(err) if err.code() == ErrorCode::NotFound && req.create_collection => {
            // infer a schema from the first batch and create the
            // collection in its own transaction
            tx.rollback().await.map_err(ApiError::from)?;
            evolve_schema(ctx, tenant, req, None).await?;

            tx = ctx.start_synced_tx(tenant).await?;
            let db = get_database(&tx, tenant, &req.project, &req.branch)?;
            get_collection(&db, &req.collection)?
        }
        Err(err) => {
            tx.rollback().await.map_err(ApiError::from)?;
            return Err(err);
        }
    };

    let ts = Timestamp::now();
    match insert_or_replace(ctx, &mut tx, &collection, &req.documents, ts, true).await {
        Ok(keys) => {
            ctx.commit_and_mirror(tx).await?;
            Ok(write_response(ts, keys))
        }
        Err(err) if err.code() == ErrorCode::AlreadyExists => {
            tx.rollback().await.map_err(ApiError::from)?;
            Err(err)
        }
        Err(err) if err.code() == ErrorCode::InvalidArgument => {
            // schema validation failed: roll back the partial batch,
            // widen the schema from the documents, and retry once
            tx.rollback().await.map_err(ApiError::from)?;
            debug!(%err, "import batch rejected, evolving schema");
            evolve_schema(ctx, tenant, req, Some(collection.schema.clone())).await?;

            let mut tx = ctx.start_synced_tx(tenant).await?;
            let db = get_database(&tx, tenant, &req.project, &req.branch)?;
            let collection = get_collection(&db, &req.collection)?;

            let keys =
                insert_or_replace(ctx, &mut tx, &collection, &req.documents, ts, true).await?;
            ctx.commit_and_mirror(tx).await?;
            Ok(write_response(ts, keys))
        }
        Err(err) => {
            tx.rollback().await.map_err(ApiError::from)?;
            Err(err)
        }
    }
}

fn write_response(ts: Timestamp, keys: Vec<Value>) -> WriteResponse {
    super::write_response(INSERTED_STATUS, ResponseMetadata::created(ts), keys, 0)
}

/// Infers a widened schema from the request documents and applies it as
/// a collection create/update in its own transaction. A duplicate-key
/// race with another creator aborts the request.
async fn evolve_schema(
    ctx: &RunnerContext,
    tenant: &Tenant,
    req: &ImportRequest,
    existing_schema: Option<Vec<u8>>,
) -> ApiResult<()> {
    let documents: Vec<Vec<u8>> = req
        .documents
        .iter()
        .map(|doc| serde_json::to_vec(doc).map_err(|e| ApiError::internal(e.to_string())))
        .collect::<ApiResult<_>>()?;

    let schema = infer_schema(
        existing_schema.as_deref(),
        &req.collection,
        &documents,
        &req.primary_key,
        &req.autogenerated,
    )?;
    debug!(
        collection = %req.collection,
        schema = %String::from_utf8_lossy(&schema),
        "evolving schema on import"
    );
    let factory = Factory::build(&req.collection, &schema)?;

    let mut tx = ctx.start_synced_tx(tenant).await?;
    let mut db = match get_database(&tx, tenant, &req.project, &req.branch) {
        Ok(db) => db,
        Err(err) => {
            tx.rollback().await.map_err(ApiError::from)?;
            return Err(err);
        }
    };

    match tenant.create_collection(&mut tx, &mut db, &factory).await {
        Ok(()) => tx.commit().await.map_err(ApiError::from).map(|_| ()),
        Err(err) if err.code() == ErrorCode::AlreadyExists => {
            tx.rollback().await.map_err(ApiError::from)?;
            Err(ApiError::aborted("concurrent create collection request, aborting"))
        }
        Err(err) => {
            tx.rollback().await.map_err(ApiError::from)?;
            Err(err)
        }
    }
}
