//! In-memory search engine.
//!
//! Implements enough of the store contract for tests and standalone
//! serving: typed indexes, delta schema updates, the conjunction filter
//! syntax, facet counts, sorting, and 1-based pagination.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use lodestone_schema::{SearchField, StoreSchema};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::query::{FacetCount, SearchHit, SearchQuery, SearchResponse, SortField};
use crate::store::{IndexAction, SearchStore};
use crate::{Result, SearchError};

#[derive(Default)]
struct IndexState {
    schema: StoreSchema,
    docs: BTreeMap<String, Map<String, Value>>,
}

/// In-memory [`SearchStore`] implementation.
#[derive(Default)]
pub struct MemorySearchStore {
    indexes: RwLock<HashMap<String, IndexState>>,
}

impl MemorySearchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchStore for MemorySearchStore {
    async fn all_indexes(&self) -> Result<Vec<StoreSchema>> {
        Ok(self.indexes.read().values().map(|s| s.schema.clone()).collect())
    }

    async fn create_index(&self, schema: &StoreSchema) -> Result<()> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&schema.name) {
            return Err(SearchError::DuplicateEntity { name: schema.name.clone() });
        }
        indexes.insert(
            schema.name.clone(),
            IndexState { schema: schema.clone(), docs: BTreeMap::new() },
        );
        Ok(())
    }

    async fn update_index(&self, name: &str, delta: &[SearchField]) -> Result<()> {
        let mut indexes = self.indexes.write();
        let state = indexes
            .get_mut(name)
            .ok_or_else(|| SearchError::NotFound { name: name.to_owned() })?;
        for field in delta {
            if field.drop {
                state.schema.fields.retain(|f| f.name != field.name);
            } else {
                state.schema.fields.retain(|f| f.name != field.name);
                state.schema.fields.push(field.clone());
            }
        }
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        match self.indexes.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(SearchError::NotFound { name: name.to_owned() }),
        }
    }

    async fn describe_index(&self, name: &str) -> Result<StoreSchema> {
        self.indexes
            .read()
            .get(name)
            .map(|s| s.schema.clone())
            .ok_or_else(|| SearchError::NotFound { name: name.to_owned() })
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        doc: Map<String, Value>,
        action: IndexAction,
    ) -> Result<()> {
        let mut indexes = self.indexes.write();
        let state = indexes
            .get_mut(index)
            .ok_or_else(|| SearchError::NotFound { name: index.to_owned() })?;
        match action {
            IndexAction::Create => {
                if state.docs.contains_key(id) {
                    return Err(SearchError::DuplicateEntity { name: id.to_owned() });
                }
                state.docs.insert(id.to_owned(), doc);
            }
            IndexAction::Replace => {
                state.docs.insert(id.to_owned(), doc);
            }
            IndexAction::Update => {
                let existing = state
                    .docs
                    .get_mut(id)
                    .ok_or_else(|| SearchError::NotFound { name: id.to_owned() })?;
                for (key, value) in doc {
                    existing.insert(key, value);
                }
            }
        }
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<()> {
        let mut indexes = self.indexes.write();
        let state = indexes
            .get_mut(index)
            .ok_or_else(|| SearchError::NotFound { name: index.to_owned() })?;
        match state.docs.remove(id) {
            Some(_) => Ok(()),
            None => Err(SearchError::NotFound { name: id.to_owned() }),
        }
    }

    async fn search(
        &self,
        index: &str,
        query: &SearchQuery,
        page: usize,
    ) -> Result<SearchResponse> {
        let indexes = self.indexes.read();
        let state = indexes
            .get(index)
            .ok_or_else(|| SearchError::NotFound { name: index.to_owned() })?;

        let mut matched: Vec<&Map<String, Value>> = state
            .docs
            .values()
            .filter(|doc| matches_text(doc, query) && matches_filters(doc, &query.filters))
            .collect();

        sort_docs(&mut matched, &query.sort);

        let facets = query
            .facets
            .iter()
            .map(|field| (field.clone(), facet_counts(&matched, field)))
            .collect();

        let found = matched.len() as i64;
        let page = page.max(1);
        let start = (page - 1) * query.page_size;
        let hits = matched
            .into_iter()
            .skip(start)
            .take(query.page_size)
            .map(|doc| SearchHit { doc: doc.clone() })
            .collect();

        Ok(SearchResponse { hits, found, facets })
    }
}

fn matches_text(doc: &Map<String, Value>, query: &SearchQuery) -> bool {
    if query.q.is_empty() || query.q == "*" {
        return true;
    }
    let needle = query.q.to_lowercase();
    let candidates: Vec<&str> = if query.search_fields.is_empty() {
        doc.values().filter_map(Value::as_str).collect()
    } else {
        query
            .search_fields
            .iter()
            .filter_map(|f| doc.get(f).and_then(Value::as_str))
            .collect()
    };
    candidates.iter().any(|v| v.to_lowercase().contains(&needle))
}

/// Evaluates the disjunction-of-conjunctions filter list.
fn matches_filters(doc: &Map<String, Value>, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters
        .iter()
        .any(|conj| conj.split("&&").all(|cond| matches_condition(doc, cond)))
}

fn matches_condition(doc: &Map<String, Value>, cond: &str) -> bool {
    let Some((field, rest)) = cond.split_once(':') else {
        return false;
    };
    let (op, operand) = if let Some(v) = rest.strip_prefix("!=") {
        ("!=", v)
    } else if let Some(v) = rest.strip_prefix(">=") {
        (">=", v)
    } else if let Some(v) = rest.strip_prefix("<=") {
        ("<=", v)
    } else if let Some(v) = rest.strip_prefix('>') {
        (">", v)
    } else if let Some(v) = rest.strip_prefix('<') {
        ("<", v)
    } else if let Some(v) = rest.strip_prefix('=') {
        ("=", v)
    } else {
        return false;
    };

    let Some(value) = doc.get(field) else {
        return false;
    };

    // `field:=[a,b]` is membership
    if op == "=" && operand.starts_with('[') && operand.ends_with(']') {
        return operand[1..operand.len() - 1]
            .split(',')
            .map(str::trim)
            .any(|candidate| compare(value, candidate) == Some(Ordering::Equal));
    }

    match (op, compare(value, operand)) {
        ("=", Some(Ordering::Equal)) => true,
        ("!=", Some(ordering)) => ordering != Ordering::Equal,
        ("!=", None) => true,
        (">", Some(Ordering::Greater)) => true,
        (">=", Some(Ordering::Greater | Ordering::Equal)) => true,
        ("<", Some(Ordering::Less)) => true,
        ("<=", Some(Ordering::Less | Ordering::Equal)) => true,
        _ => false,
    }
}

/// Compares a document value to a filter operand, numerically when both
/// sides parse as numbers.
fn compare(value: &Value, operand: &str) -> Option<Ordering> {
    match value {
        Value::Number(n) => {
            let lhs = n.as_f64()?;
            let rhs: f64 = operand.parse().ok()?;
            lhs.partial_cmp(&rhs)
        }
        Value::Bool(b) => {
            let rhs: bool = operand.parse().ok()?;
            Some(b.cmp(&rhs))
        }
        Value::String(s) => Some(s.as_str().cmp(operand)),
        _ => None,
    }
}

fn sort_docs(docs: &mut [&Map<String, Value>], sort: &[SortField]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in sort {
            let ordering = match (a.get(&key.name), b.get(&key.name)) {
                (Some(lhs), Some(rhs)) => compare_values(lhs, rhs),
                (None, Some(_)) => {
                    return if key.missing_first { Ordering::Less } else { Ordering::Greater }
                }
                (Some(_), None) => {
                    return if key.missing_first { Ordering::Greater } else { Ordering::Less }
                }
                (None, None) => Ordering::Equal,
            };
            let ordering = if key.ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn facet_counts(docs: &[&Map<String, Value>], field: &str) -> Vec<FacetCount> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for doc in docs {
        if let Some(value) = doc.get(field) {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            *counts.entry(rendered).or_default() += 1;
        }
    }
    let mut out: Vec<FacetCount> =
        counts.into_iter().map(|(value, count)| FacetCount { value, count }).collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema(name: &str) -> StoreSchema {
        StoreSchema { name: name.to_owned(), fields: Vec::new() }
    }

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    async fn seeded() -> MemorySearchStore {
        let store = MemorySearchStore::new();
        store.create_index(&schema("idx")).await.expect("create");
        for (id, roast, price) in
            [("1", "dark", 9), ("2", "light", 12), ("3", "dark", 15), ("4", "medium", 7)]
        {
            store
                .index_document(
                    "idx",
                    id,
                    doc(json!({"id": id, "roast": roast, "price": price})),
                    IndexAction::Create,
                )
                .await
                .expect("index");
        }
        store
    }

    #[tokio::test]
    async fn test_create_duplicate_index() {
        let store = MemorySearchStore::new();
        store.create_index(&schema("idx")).await.expect("create");
        let err = store.create_index(&schema("idx")).await.expect_err("duplicate");
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_filter_conjunction() {
        let store = seeded().await;
        let query = SearchQuery::builder()
            .filters(vec!["roast:=dark&&price:>10".to_owned()])
            .build();
        let resp = store.search("idx", &query, 1).await.expect("search");
        assert_eq!(resp.found, 1);
        assert_eq!(resp.hits[0].doc["id"], json!("3"));
    }

    #[tokio::test]
    async fn test_filter_disjunction() {
        let store = seeded().await;
        let query = SearchQuery::builder()
            .filters(vec!["roast:=light".to_owned(), "price:<=7".to_owned()])
            .build();
        let resp = store.search("idx", &query, 1).await.expect("search");
        assert_eq!(resp.found, 2);
    }

    #[tokio::test]
    async fn test_membership_filter() {
        let store = seeded().await;
        let query = SearchQuery::builder()
            .filters(vec!["roast:=[light,medium]".to_owned()])
            .build();
        let resp = store.search("idx", &query, 1).await.expect("search");
        assert_eq!(resp.found, 2);
    }

    #[tokio::test]
    async fn test_sort_and_pagination() {
        let store = seeded().await;
        let query = SearchQuery::builder()
            .sort(vec![SortField {
                name: "price".to_owned(),
                ascending: true,
                missing_first: false,
            }])
            .page_size(2)
            .build();

        let page1 = store.search("idx", &query, 1).await.expect("page 1");
        assert_eq!(page1.found, 4);
        assert_eq!(page1.hits[0].doc["price"], json!(7));
        assert_eq!(page1.hits[1].doc["price"], json!(9));

        let page2 = store.search("idx", &query, 2).await.expect("page 2");
        assert_eq!(page2.hits[0].doc["price"], json!(12));
        assert_eq!(page2.hits[1].doc["price"], json!(15));
    }

    #[tokio::test]
    async fn test_facets() {
        let store = seeded().await;
        let query = SearchQuery::builder().facets(vec!["roast".to_owned()]).build();
        let resp = store.search("idx", &query, 1).await.expect("search");
        let (field, counts) = &resp.facets[0];
        assert_eq!(field, "roast");
        assert_eq!(counts[0], FacetCount { value: "dark".to_owned(), count: 2 });
    }

    #[tokio::test]
    async fn test_text_query() {
        let store = seeded().await;
        let query = SearchQuery::builder().q("LIGHT").build();
        let resp = store.search("idx", &query, 1).await.expect("search");
        assert_eq!(resp.found, 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_document() {
        let store = seeded().await;
        store
            .index_document("idx", "1", doc(json!({"price": 20})), IndexAction::Update)
            .await
            .expect("update");
        let query = SearchQuery::builder().filters(vec!["price:=20".to_owned()]).build();
        let resp = store.search("idx", &query, 1).await.expect("search");
        assert_eq!(resp.found, 1);
        // merged fields survive
        assert_eq!(resp.hits[0].doc["roast"], json!("dark"));

        store.delete_document("idx", "1").await.expect("delete");
        let err = store.delete_document("idx", "1").await.expect_err("gone");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_index_delta() {
        let store = seeded().await;
        let delta = vec![
            SearchField {
                name: "origin".to_owned(),
                field_type: "string".to_owned(),
                facet: false,
                index: true,
                sort: false,
                optional: true,
                drop: false,
            },
        ];
        store.update_index("idx", &delta).await.expect("update");
        let described = store.describe_index("idx").await.expect("describe");
        assert!(described.fields.iter().any(|f| f.name == "origin"));
    }
}
