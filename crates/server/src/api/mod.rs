//! Wire-level request and response types.
//!
//! Every operation has a typed request; [`Request`] is the tagged union
//! dispatched by the session manager. Streaming operations (read,
//! search) deliver their pages through a [`Streaming`] sink instead of a
//! unary response.

use async_trait::async_trait;
use lodestone_types::{ApiResult, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =========================================================================
// Statuses
// =========================================================================

pub const INSERTED_STATUS: &str = "inserted";
pub const REPLACED_STATUS: &str = "replaced";
pub const UPDATED_STATUS: &str = "updated";
pub const DELETED_STATUS: &str = "deleted";
pub const CREATED_STATUS: &str = "created";
pub const DROPPED_STATUS: &str = "dropped";

/// Default branch when the request leaves it empty.
fn default_branch() -> String {
    lodestone_types::MAIN_BRANCH.to_owned()
}

// =========================================================================
// Data-plane requests
// =========================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsertRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    pub documents: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplaceRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    pub documents: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub filter: Option<Value>,
    /// The `$set`/`$unset`/`$increment` operators.
    pub fields: Value,
    #[serde(default)]
    pub options: Option<WriteOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub options: Option<WriteOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriteOptions {
    /// Stop after this many modified rows; 0 means unlimited.
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    pub documents: Vec<Value>,
    /// Create the collection with an inferred schema when it is missing.
    #[serde(default)]
    pub create_collection: bool,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub autogenerated: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub filter: Option<Value>,
    /// Field projection: `{"a": true}` or `{"b": false}`.
    #[serde(default)]
    pub fields: Option<Value>,
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub options: Option<ReadOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadOptions {
    /// Stop after this many rows; 0 means unlimited.
    #[serde(default)]
    pub limit: i64,
    /// Resume token of a previous read: the raw last key, base64.
    #[serde(default)]
    pub offset: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    /// Full-text query; empty means match-all.
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub search_fields: Vec<String>,
    #[serde(default)]
    pub filter: Option<Value>,
    /// Facet fields: `{"field": {}}` or a name list.
    #[serde(default)]
    pub facet: Option<Value>,
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub include_fields: Vec<String>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    #[serde(default)]
    pub page_size: i32,
    /// When non-zero, return exactly this page and stop.
    #[serde(default)]
    pub page: i32,
}

// =========================================================================
// DDL requests
// =========================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOrUpdateCollectionRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
    pub schema: Value,
    /// Fail instead of updating when the collection exists.
    #[serde(default)]
    pub only_create: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DropCollectionRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListCollectionsRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeCollectionRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub collection: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteProjectRequest {
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListProjectsRequest {}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeDatabaseRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBranchRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteBranchRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch: String,
}

// =========================================================================
// Responses
// =========================================================================

/// Row timestamps echoed with responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl ResponseMetadata {
    pub fn created(ts: Timestamp) -> Self {
        Self { created_at: Some(ts.to_rfc3339()), ..Default::default() }
    }

    pub fn updated(ts: Timestamp) -> Self {
        Self { updated_at: Some(ts.to_rfc3339()), ..Default::default() }
    }

    pub fn deleted(ts: Timestamp) -> Self {
        Self { deleted_at: Some(ts.to_rfc3339()), ..Default::default() }
    }

    pub fn row(created_at: Timestamp, updated_at: Option<Timestamp>) -> Self {
        Self {
            created_at: Some(created_at.to_rfc3339()),
            updated_at: updated_at.map(Timestamp::to_rfc3339),
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteResponse {
    pub metadata: ResponseMetadata,
    pub status: String,
    /// Primary-key tuple of every written document, in input order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Value>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub modified_count: i32,
}

fn is_zero(count: &i32) -> bool {
    *count == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub data: Value,
    pub metadata: ResponseMetadata,
    /// Raw last-key bytes, base64; feed back as `options.offset` to
    /// resume.
    pub resume_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHitResponse {
    pub data: Value,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacetCounts {
    pub counts: Vec<FacetCountEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetCountEntry {
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub found: i64,
    pub total_pages: i32,
    pub page: PageMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub current: i32,
    pub size: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHitResponse>,
    pub facets: std::collections::BTreeMap<String, FacetCounts>,
    pub meta: SearchMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub collection: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeCollectionResponse {
    pub collection: String,
    pub schema: Value,
    pub size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListProjectsResponse {
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeDatabaseResponse {
    pub collections: Vec<DescribeCollectionResponse>,
    pub size: i64,
    pub branches: Vec<String>,
}

/// Response union for the unary operations.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Write(WriteResponse),
    Status(StatusResponse),
    ListCollections(ListCollectionsResponse),
    DescribeCollection(DescribeCollectionResponse),
    ListProjects(ListProjectsResponse),
    DescribeDatabase(DescribeDatabaseResponse),
    /// Streaming operations send their pages through the sink; the unary
    /// body is empty.
    Streamed,
}

// =========================================================================
// Request union
// =========================================================================

/// Tagged union of every operation, dispatched by the session manager.
pub enum Request {
    Insert(InsertRequest),
    Replace(ReplaceRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    Import(ImportRequest),
    Read(ReadRequest, Box<dyn Streaming<ReadResponse>>),
    Search(SearchRequest, Box<dyn Streaming<SearchResponse>>),
    CreateOrUpdateCollection(CreateOrUpdateCollectionRequest),
    DropCollection(DropCollectionRequest),
    ListCollections(ListCollectionsRequest),
    DescribeCollection(DescribeCollectionRequest),
    CreateProject(CreateProjectRequest),
    DeleteProject(DeleteProjectRequest),
    ListProjects(ListProjectsRequest),
    DescribeDatabase(DescribeDatabaseRequest),
    CreateBranch(CreateBranchRequest),
    DeleteBranch(DeleteBranchRequest),
}

// =========================================================================
// Streaming sink
// =========================================================================

/// Server-streaming sink; the network send is the backpressure signal.
#[async_trait]
pub trait Streaming<T: Send + 'static>: Send {
    async fn send(&mut self, item: T) -> ApiResult<()>;
}

/// Buffering sink used by tests.
pub struct VecSink<T> {
    pub items: std::sync::Arc<parking_lot::Mutex<Vec<T>>>,
}

impl<T> Default for VecSink<T> {
    fn default() -> Self {
        Self { items: std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())) }
    }
}

#[async_trait]
impl<T: Send + 'static> Streaming<T> for VecSink<T> {
    async fn send(&mut self, item: T) -> ApiResult<()> {
        self.items.lock().push(item);
        Ok(())
    }
}
