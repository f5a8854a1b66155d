//! Search runner.
//!
//! Forwards the query to the search store and streams result pages until
//! the requested page range is exhausted or the store runs out of hits.
//! Facets and pagination metadata are echoed on every page.

use std::collections::BTreeMap;

use lodestone_metadata::Tenant;
use lodestone_query::{FieldProjection, FilterFactory};
use lodestone_schema::DefaultCollection;
use lodestone_search::{SearchQuery, SortField, DEFAULT_PER_PAGE};
use lodestone_types::{ApiError, ApiResult};
use serde_json::Value;

use super::{filter_bytes, get_collection, get_sort_keys, RunnerContext};
use crate::api::{
    FacetCountEntry, FacetCounts, PageMetadata, ResponseMetadata, SearchHitResponse,
    SearchMetadata, SearchRequest, SearchResponse, Streaming,
};
use crate::reader::RowIterator;
use crate::search_reader::SearchReader;

pub async fn search(
    ctx: &RunnerContext,
    tenant: &Tenant,
    req: &SearchRequest,
    sink: &mut dyn Streaming<SearchResponse>,
) -> ApiResult<()> {
    let db = tenant.get_database(&req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    let raw_filter = filter_bytes(&req.filter)?;
    let filter = FilterFactory::new(collection.queryable_fields.clone()).wrapped(&raw_filter)?;

    let search_fields = search_fields(&collection, &req.search_fields)?;
    let facets = facet_fields(&collection, &req.facet)?;
    let projection = field_selection(&collection, req)?;
    let sort = get_sort_keys(&collection, &req.sort)?
        .unwrap_or_default()
        .into_iter()
        .map(|key| SortField {
            name: key.name,
            ascending: key.ascending,
            missing_first: key.missing_first,
        })
        .collect::<Vec<_>>();

    let page_size = if req.page_size > 0 { req.page_size as usize } else { DEFAULT_PER_PAGE };

    let query = SearchQuery::builder()
        .q(if req.q.is_empty() { "*".to_owned() } else { req.q.clone() })
        .search_fields(search_fields)
        .filters(filter.to_search_filter())
        .facets(facets)
        .sort(sort)
        .page_size(page_size)
        .build();

    let reader = SearchReader::new(ctx.search.clone(), collection.clone(), query);
    let mut iterator = if req.page > 0 {
        reader.single_page_iterator(filter, req.page as usize)
    } else {
        reader.iterator(filter)
    };

    let mut page_no = if req.page > 0 { req.page } else { 1 };
    let mut total_pages: Option<i32> = None;
    let mut sent_any = false;
    loop {
        let mut hits = Vec::with_capacity(page_size);
        while hits.len() < page_size {
            let Some(row) = iterator.next().await.map_err(ApiError::from)? else {
                break;
            };
            let mut data: Value = serde_json::from_slice(&row.data.raw)
                .map_err(|e| ApiError::internal(e.to_string()))?;
            if let Some(projection) = &projection {
                if let Value::Object(doc) = &mut data {
                    projection.apply_doc(doc);
                }
            }
            hits.push(SearchHitResponse {
                data,
                metadata: ResponseMetadata::row(row.data.created_at, row.data.updated_at),
            });
        }

        let found = iterator.total_found();
        let total_pages = *total_pages
            .get_or_insert_with(|| (found as f64 / page_size as f64).ceil() as i32);

        let mut facet_counts = BTreeMap::new();
        for (field, counts) in iterator.facets() {
            facet_counts.insert(
                field.clone(),
                FacetCounts {
                    counts: counts
                        .iter()
                        .map(|c| FacetCountEntry { value: c.value.clone(), count: c.count })
                        .collect(),
                },
            );
        }

        let done = hits.is_empty();
        let response = SearchResponse {
            hits,
            facets: facet_counts,
            meta: SearchMetadata {
                found,
                total_pages,
                page: PageMetadata { current: page_no, size: page_size as i32 },
            },
        };

        if done {
            // at least one page is always delivered, even when empty
            if !sent_any {
                sink.send(response).await?;
            }
            return Ok(());
        }
        sink.send(response).await?;
        sent_any = true;
        page_no += 1;

        if req.page > 0 {
            return Ok(());
        }
    }
}

/// Fields the full-text query runs over; defaults to every indexed
/// string field.
fn search_fields(
    collection: &DefaultCollection,
    requested: &[String],
) -> ApiResult<Vec<String>> {
    if requested.is_empty() {
        return Ok(collection
            .queryable_fields
            .iter()
            .filter(|f| f.search_type == "string")
            .map(|f| f.name.clone())
            .collect());
    }
    let mut fields = Vec::with_capacity(requested.len());
    for name in requested {
        let field = collection.queryable_field(name)?;
        if !field.indexed {
            return Err(ApiError::invalid_argument(format!(
                "`{name}` is not a searchable field. Only indexed fields can be queried"
            )));
        }
        fields.push(field.name.clone());
    }
    Ok(fields)
}

/// Facet fields, accepted as a name list or a `{"field": {…}}` object.
fn facet_fields(collection: &DefaultCollection, facet: &Option<Value>) -> ApiResult<Vec<String>> {
    let names: Vec<String> = match facet {
        None => return Ok(Vec::new()),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Some(Value::Object(spec)) => spec.keys().cloned().collect(),
        Some(_) => return Err(ApiError::invalid_argument("unsupported facet specification")),
    };
    for name in &names {
        let field = collection.queryable_field(name)?;
        if !field.faceted {
            return Err(ApiError::invalid_argument(format!(
                "Cannot generate facets for `{name}`. Faceting is only supported for numeric and text fields"
            )));
        }
    }
    Ok(names)
}

/// Include/exclude selection; inclusion wins when both are present.
fn field_selection(
    collection: &DefaultCollection,
    req: &SearchRequest,
) -> ApiResult<Option<FieldProjection>> {
    let (names, include) = if !req.include_fields.is_empty() {
        (&req.include_fields, true)
    } else if !req.exclude_fields.is_empty() {
        (&req.exclude_fields, false)
    } else {
        return Ok(None);
    };
    for name in names {
        collection.queryable_field(name)?;
    }
    Ok(Some(FieldProjection::from_names(names, include)))
}
