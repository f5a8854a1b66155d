//! Structured query sent to the search store.

use serde_json::{Map, Value};

/// Default page size when the request does not set one.
pub const DEFAULT_PER_PAGE: usize = 20;

/// A sort instruction over a sortable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub name: String,
    pub ascending: bool,
    /// Rank documents missing the field before all others instead of
    /// after.
    pub missing_first: bool,
}

/// Query against one search index.
///
/// `filters` is a disjunction of conjunction strings in the store's
/// filter syntax (`field:=v&&other:>10`), as produced by the filter AST.
#[derive(Debug, Clone, bon::Builder)]
pub struct SearchQuery {
    /// Full-text query; `"*"` matches everything.
    #[builder(default = String::from("*"), into)]
    pub q: String,
    /// Fields the full-text query runs over; empty means every indexed
    /// string field.
    #[builder(default)]
    pub search_fields: Vec<String>,
    #[builder(default)]
    pub filters: Vec<String>,
    /// Fields to build facet counts for.
    #[builder(default)]
    pub facets: Vec<String>,
    #[builder(default)]
    pub sort: Vec<SortField>,
    #[builder(default = DEFAULT_PER_PAGE)]
    pub page_size: usize,
}

/// One matching document, in its stored (flattened, packed) form.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc: Map<String, Value>,
}

/// Counted value of one facet field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetCount {
    pub value: String,
    pub count: i64,
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Total matching documents across all pages.
    pub found: i64,
    /// Facet counts per requested facet field.
    pub facets: Vec<(String, Vec<FacetCount>)>,
}
