//! Streaming read runner.
//!
//! Resolves the request into one of four read paths: exact-key lookup
//! when the filter fully binds the primary key, scan-from-offset when a
//! resume token is present, full-table scan when no usable index exists,
//! and the search path when a sort requires it or the filter touches
//! unindexed fields.
//!
//! Long reads outlive the engine's transaction duration cap: when a scan
//! is interrupted, the runner records the last emitted key, starts a new
//! transaction, and continues from there. The same key doubles as the
//! client-facing resume token.

use base64::Engine;
use lodestone_kv::Key;
use lodestone_metadata::{Tenant, Tx};
use lodestone_query::{FieldProjection, FilterFactory, SortKey, WrappedFilter};
use lodestone_schema::DefaultCollection;
use lodestone_search::{SearchQuery, SortField, DEFAULT_PER_PAGE};
use lodestone_types::{ApiError, ApiResult};
use serde_json::Value;

use super::{build_keys_using_filter, filter_bytes, get_collection, get_sort_keys, RunnerContext};
use crate::api::{ReadRequest, ReadResponse, ResponseMetadata, Streaming};
use crate::reader::{DatabaseReader, IterationError, RowIterator};
use crate::search_reader::SearchReader;

struct ReaderOptions {
    table: Vec<u8>,
    ikeys: Vec<Key>,
    from: Option<Key>,
    no_filter: bool,
    use_search: bool,
    sort: Option<Vec<SortKey>>,
    filter: WrappedFilter,
    projection: Option<FieldProjection>,
}

fn build_reader_options(
    ctx: &RunnerContext,
    collection: &DefaultCollection,
    req: &ReadRequest,
) -> ApiResult<ReaderOptions> {
    let sort = get_sort_keys(collection, &req.sort)?;

    let raw_filter = filter_bytes(&req.filter)?;
    let filter = FilterFactory::new(collection.queryable_fields.clone()).wrapped(&raw_filter)?;

    let projection = match &req.fields {
        None => None,
        Some(fields) => {
            let raw = serde_json::to_vec(fields).map_err(|e| ApiError::internal(e.to_string()))?;
            FieldProjection::build(&raw)?
        }
    };

    let mut options = ReaderOptions {
        table: collection.encoded_name.clone(),
        ikeys: Vec::new(),
        from: None,
        no_filter: false,
        use_search: false,
        sort,
        filter,
        projection,
    };

    if let Some(offset) = req.options.as_ref().and_then(|o| o.offset.as_ref()) {
        let token = base64::engine::general_purpose::STANDARD
            .decode(offset)
            .map_err(|_| ApiError::invalid_argument("malformed resume token"))?;
        // resume strictly after the token key
        options.from = Some(Key::from_raw(&options.table, key_after(token)));
    }

    if options.filter.none() || !options.filter.is_indexed() {
        if options.sort.is_some() {
            // the KV path cannot satisfy a sort
            options.use_search = true;
        } else {
            options.no_filter = true;
        }
    } else {
        match build_keys_using_filter(&ctx.encoder, collection, &raw_filter) {
            Ok(keys) => options.ikeys = keys,
            Err(_) => {
                if ctx.search_read_enabled {
                    options.use_search = true;
                } else if options.from.is_none() {
                    // scan from the beginning of the table
                    options.from = Some(Key::table_root(options.table.clone()));
                }
            }
        }
    }

    Ok(options)
}

/// Lexicographic successor of a key: the smallest key strictly greater.
fn key_after(mut raw: Vec<u8>) -> Vec<u8> {
    raw.push(0x00);
    raw
}

/// Long-running read managing its own transactions. A single request may
/// span several read-only transactions when the duration cap interrupts
/// the scan.
pub async fn read(
    ctx: &RunnerContext,
    tenant: &Tenant,
    req: &ReadRequest,
    sink: &mut dyn Streaming<ReadResponse>,
) -> ApiResult<()> {
    let db = tenant.get_database(&req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    let mut options = build_reader_options(ctx, &collection, req)?;
    let limit = req.options.as_ref().map(|o| o.limit).unwrap_or(0);

    if options.use_search {
        return iterate_on_search_store(ctx, &collection, &options, limit, sink).await;
    }

    let mut emitted: i64 = 0;
    let mut last_key: Option<Vec<u8>> = None;
    loop {
        // a new transaction per round: the previous one either finished
        // or hit the duration cap
        let mut tx = ctx.tx_manager.start_tx().await.map_err(ApiError::from)?;
        let outcome = iterate_on_kv_store(
            &mut tx,
            &collection,
            &options,
            limit,
            &mut emitted,
            &mut last_key,
            sink,
        )
        .await;
        tx.rollback().await.map_err(ApiError::from)?;

        match outcome {
            Ok(()) => return Ok(()),
            Err(IterationError::TransactionLimit) => {
                let Some(last) = last_key.take() else {
                    // no progress inside the window; surface the error
                    // rather than spin
                    return Err(IterationError::TransactionLimit.into());
                };
                options.from = Some(Key::from_raw(&options.table, key_after(last)));
                continue;
            }
            Err(IterationError::Other(err)) => return Err(err),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn iterate_on_kv_store(
    tx: &mut Tx,
    collection: &DefaultCollection,
    options: &ReaderOptions,
    limit: i64,
    emitted: &mut i64,
    last_key: &mut Option<Vec<u8>>,
    sink: &mut dyn Streaming<ReadResponse>,
) -> Result<(), IterationError> {
    let mut reader = DatabaseReader::new(tx);
    let iterator: Box<dyn RowIterator> = if !options.ikeys.is_empty() {
        reader.key_iterator(options.ikeys.clone()).await?
    } else if let Some(from) = &options.from {
        let inner = reader.scan_iterator(from).await?;
        DatabaseReader::filtered_read(inner, options.filter.clone())
    } else {
        let inner = reader.scan_table(&options.table).await?;
        DatabaseReader::filtered_read(inner, options.filter.clone())
    };

    iterate(collection, iterator, options, limit, emitted, last_key, sink).await
}

async fn iterate_on_search_store(
    ctx: &RunnerContext,
    collection: &DefaultCollection,
    options: &ReaderOptions,
    limit: i64,
    sink: &mut dyn Streaming<ReadResponse>,
) -> ApiResult<()> {
    let sort = options
        .sort
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|key| SortField {
            name: key.name,
            ascending: key.ascending,
            missing_first: key.missing_first,
        })
        .collect();
    let query = SearchQuery::builder()
        .filters(options.filter.to_search_filter())
        .sort(sort)
        .page_size(DEFAULT_PER_PAGE)
        .build();

    let iterator = SearchReader::new(ctx.search.clone(), collection.clone(), query)
        .iterator(options.filter.clone());

    let mut emitted = 0;
    let mut last_key = None;
    iterate(
        collection,
        Box::new(iterator),
        options,
        limit,
        &mut emitted,
        &mut last_key,
        sink,
    )
    .await
    .map_err(ApiError::from)
}

#[allow(clippy::too_many_arguments)]
async fn iterate(
    collection: &DefaultCollection,
    mut iterator: Box<dyn RowIterator>,
    options: &ReaderOptions,
    limit: i64,
    emitted: &mut i64,
    last_key: &mut Option<Vec<u8>>,
    sink: &mut dyn Streaming<ReadResponse>,
) -> Result<(), IterationError> {
    while limit == 0 || *emitted < limit {
        let Some(row) = iterator.next().await? else {
            return Ok(());
        };

        let mut raw = row.data.raw.clone();
        if !collection.compatible_schema_since(row.data.version) {
            raw = collection.update_row_schema_raw(&raw)?;
        }
        if let Some(projection) = &options.projection {
            raw = projection.apply(&raw)?;
        }
        let data: Value = serde_json::from_slice(&raw)
            .map_err(|e| ApiError::internal(format!("stored row is not valid JSON: {e}")))?;

        sink.send(ReadResponse {
            data,
            metadata: ResponseMetadata::row(row.data.created_at, row.data.updated_at),
            resume_token: base64::engine::general_purpose::STANDARD.encode(&row.key),
        })
        .await?;
        *last_key = Some(row.key);
        *emitted += 1;
    }
    Ok(())
}
