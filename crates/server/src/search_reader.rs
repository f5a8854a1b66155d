//! Search-backed row reader.
//!
//! Pages through the search store, unpacks stored documents back into
//! user shape, and re-applies the request filter. Accumulates facet
//! counts and total-hits metadata from the store's responses.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use lodestone_query::WrappedFilter;
use lodestone_schema::DefaultCollection;
use lodestone_search::{FacetCount, SearchQuery, SearchStore};

use crate::indexer::unpack_search_fields;
use crate::reader::{IterationError, Row, RowIterator};

/// Builds search-backed iterators for one collection.
pub struct SearchReader {
    store: Arc<dyn SearchStore>,
    collection: DefaultCollection,
    query: SearchQuery,
}

impl SearchReader {
    pub fn new(
        store: Arc<dyn SearchStore>,
        collection: DefaultCollection,
        query: SearchQuery,
    ) -> Self {
        Self { store, collection, query }
    }

    /// Iterates every page until the store runs out of hits.
    pub fn iterator(self, filter: WrappedFilter) -> FilterableSearchIterator {
        FilterableSearchIterator::new(self, filter, None)
    }

    /// Iterates exactly one page.
    pub fn single_page_iterator(
        self,
        filter: WrappedFilter,
        page: usize,
    ) -> FilterableSearchIterator {
        FilterableSearchIterator::new(self, filter, Some(page))
    }
}

/// Row iterator over search results with filter re-checking and facet
/// accumulation.
pub struct FilterableSearchIterator {
    store: Arc<dyn SearchStore>,
    collection: DefaultCollection,
    query: SearchQuery,
    filter: WrappedFilter,
    page: usize,
    single_page: bool,
    buffer: VecDeque<Row>,
    done: bool,
    found: i64,
    facets: Vec<(String, Vec<FacetCount>)>,
}

impl FilterableSearchIterator {
    fn new(reader: SearchReader, filter: WrappedFilter, page: Option<usize>) -> Self {
        Self {
            store: reader.store,
            collection: reader.collection,
            query: reader.query,
            filter,
            page: page.unwrap_or(1),
            single_page: page.is_some(),
            buffer: VecDeque::new(),
            done: false,
            found: 0,
            facets: Vec::new(),
        }
    }

    /// Total hits across all pages, from the last fetched response.
    pub fn total_found(&self) -> i64 {
        self.found
    }

    /// Facet counts from the last fetched response.
    pub fn facets(&self) -> &[(String, Vec<FacetCount>)] {
        &self.facets
    }

    async fn fetch_page(&mut self) -> Result<(), IterationError> {
        let index_name = self.collection.implicit_search_index.store_index_name();
        let response = self
            .store
            .search(index_name, &self.query, self.page)
            .await
            .map_err(lodestone_types::ApiError::from)?;

        self.found = response.found;
        self.facets = response.facets;

        if response.hits.is_empty() {
            self.done = true;
            return Ok(());
        }

        for hit in response.hits {
            let (search_key, data, doc) =
                unpack_search_fields(hit.doc, &self.collection.queryable_fields)?;
            if !self.filter.matches(&doc) {
                continue;
            }
            let data = data.with_version(self.collection.version());
            self.buffer.push_back(Row { key: search_key.into_bytes(), data });
        }

        if self.single_page {
            self.done = true;
        } else {
            self.page += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl RowIterator for FilterableSearchIterator {
    async fn next(&mut self) -> Result<Option<Row>, IterationError> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use lodestone_schema::{Factory, ImplicitSearchIndex};
    use lodestone_search::{IndexAction, MemorySearchStore};
    use lodestone_types::{CollectionId, TableData, Timestamp};
    use serde_json::json;

    use super::*;
    use crate::indexer::pack_search_fields;

    const SCHEMA: &str = r#"{
        "title": "orders",
        "properties": {
            "k": {"type": "string"},
            "price": {"type": "integer"}
        },
        "primary_key": ["k"]
    }"#;

    fn collection() -> DefaultCollection {
        let factory = Factory::build("orders", SCHEMA.as_bytes()).expect("factory");
        let implicit = ImplicitSearchIndex::new("orders", "ns-p1-orders", &factory, &[]);
        DefaultCollection::new(CollectionId::new(1), 1, &factory, None, implicit)
            .expect("collection")
    }

    async fn seeded(coll: &DefaultCollection) -> Arc<MemorySearchStore> {
        let store = Arc::new(MemorySearchStore::new());
        store
            .create_index(&coll.implicit_search_index.store_schema)
            .await
            .expect("create");
        for (k, price) in [("a", 5), ("b", 10), ("c", 15)] {
            let raw = serde_json::to_vec(&json!({"k": k, "price": price})).expect("serialize");
            let data = TableData::new(Timestamp::from_unix_nanos(1), raw).with_version(1);
            let doc = pack_search_fields(&data, &coll.queryable_fields, k).expect("pack");
            store
                .index_document("ns-p1-orders", k, doc, IndexAction::Create)
                .await
                .expect("index");
        }
        store
    }

    fn filter(coll: &DefaultCollection, raw: &[u8]) -> WrappedFilter {
        lodestone_query::FilterFactory::new(coll.queryable_fields.clone())
            .wrapped(raw)
            .expect("filter")
    }

    #[tokio::test]
    async fn test_iterates_and_unpacks() {
        let coll = collection();
        let store = seeded(&coll).await;
        let query = SearchQuery::builder().page_size(2).build();
        let mut iter =
            SearchReader::new(store, coll.clone(), query).iterator(filter(&coll, b"{}"));

        let mut seen = Vec::new();
        while let Some(row) = iter.next().await.expect("next") {
            let doc: serde_json::Value = serde_json::from_slice(&row.data.raw).expect("json");
            seen.push(doc["k"].as_str().expect("k").to_owned());
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(iter.total_found(), 3);
    }

    #[tokio::test]
    async fn test_filter_recheck() {
        let coll = collection();
        let store = seeded(&coll).await;
        let query = SearchQuery::builder().build();
        let wrapped = filter(&coll, br#"{"price": {"$gt": 7}}"#);
        let mut iter = SearchReader::new(store, coll.clone(), query).iterator(wrapped);

        let mut count = 0;
        while let Some(row) = iter.next().await.expect("next") {
            let doc: serde_json::Value = serde_json::from_slice(&row.data.raw).expect("json");
            assert!(doc["price"].as_i64().expect("price") > 7);
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_single_page() {
        let coll = collection();
        let store = seeded(&coll).await;
        let query = SearchQuery::builder().page_size(2).build();
        let mut iter = SearchReader::new(store, coll.clone(), query)
            .single_page_iterator(filter(&coll, b"{}"), 2);

        // page 2 of size 2 holds the last document only
        let mut count = 0;
        while iter.next().await.expect("next").is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
