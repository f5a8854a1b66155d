//! The search store trait.

use async_trait::async_trait;
use lodestone_schema::{SearchField, StoreSchema};
use serde_json::{Map, Value};

use crate::query::{SearchQuery, SearchResponse};
use crate::Result;

/// How a document write maps onto the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    /// Fails if the document id already exists.
    Create,
    /// Upserts the full document.
    Replace,
    /// Merges into the existing document.
    Update,
}

/// Handle to the external search engine.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Lists every index with its current typed fields. Used at reload to
    /// seed delta computation.
    async fn all_indexes(&self) -> Result<Vec<StoreSchema>>;

    /// Creates an index; fails with a duplicate error if it exists.
    async fn create_index(&self, schema: &StoreSchema) -> Result<()>;

    /// Applies a delta schema patch (adds, plus drop+re-add pairs).
    async fn update_index(&self, name: &str, delta: &[SearchField]) -> Result<()>;

    /// Drops an index; missing indexes are a not-found error.
    async fn drop_index(&self, name: &str) -> Result<()>;

    /// Describes one index.
    async fn describe_index(&self, name: &str) -> Result<StoreSchema>;

    /// Writes one document, already flattened and packed, under `id`.
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        doc: Map<String, Value>,
        action: IndexAction,
    ) -> Result<()>;

    /// Deletes one document; missing documents are a not-found error.
    async fn delete_document(&self, index: &str, id: &str) -> Result<()>;

    /// Runs one page of a query. Pages are 1-based.
    async fn search(&self, index: &str, query: &SearchQuery, page: usize)
        -> Result<SearchResponse>;
}
