//! HTTP/JSON gateway.
//!
//! Exposes every operation under `/v1`. Unary operations return a JSON
//! body; streaming reads and searches are newline-delimited JSON with
//! each line carrying a `result` or `error` envelope.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use lodestone_types::{ApiError, ApiResult, ErrorCode};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::api::{
    CreateBranchRequest, CreateOrUpdateCollectionRequest, CreateProjectRequest,
    DeleteBranchRequest, DeleteProjectRequest, DeleteRequest, DescribeCollectionRequest,
    DescribeDatabaseRequest, DropCollectionRequest, ImportRequest, InsertRequest,
    ListCollectionsRequest, ListProjectsRequest, ReadRequest, ReplaceRequest, Request,
    SearchRequest, Streaming, UpdateRequest,
};
use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/projects/list", post(list_projects))
        .route("/v1/projects/:project/create", post(create_project))
        .route("/v1/projects/:project/delete", post(delete_project))
        .route("/v1/projects/:project/database/describe", post(describe_database))
        .route(
            "/v1/projects/:project/database/branches/:branch/create",
            post(create_branch),
        )
        .route(
            "/v1/projects/:project/database/branches/:branch/delete",
            post(delete_branch),
        )
        .route("/v1/projects/:project/database/collections/list", post(list_collections))
        .route(
            "/v1/projects/:project/database/collections/:collection/createOrUpdate",
            post(create_or_update_collection),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/drop",
            post(drop_collection),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/describe",
            post(describe_collection),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/documents/insert",
            post(insert),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/documents/replace",
            post(replace),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/documents/update",
            post(update),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/documents/delete",
            post(delete),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/documents/import",
            post(import),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/documents/read",
            post(read),
        )
        .route(
            "/v1/projects/:project/database/collections/:collection/documents/search",
            post(search),
        )
        .with_state(state)
}

// =========================================================================
// Error rendering
// =========================================================================

fn status_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::AlreadyExists | ErrorCode::Aborted => StatusCode::CONFLICT,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::Internal | ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: &ApiError) -> serde_json::Value {
    json!({"error": {"code": err.code().as_str(), "message": err.to_string()}})
}

struct ApiErrorResponse(ApiError);

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (status_code(self.0.code()), Json(error_body(&self.0))).into_response()
    }
}

fn unary(result: ApiResult<impl Serialize>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => ApiErrorResponse(err).into_response(),
    }
}

// =========================================================================
// Streaming plumbing
// =========================================================================

struct NdjsonSink<T> {
    tx: mpsc::Sender<String>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> NdjsonSink<T> {
    fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T: Serialize + Send + 'static> Streaming<T> for NdjsonSink<T> {
    async fn send(&mut self, item: T) -> ApiResult<()> {
        let line = serde_json::to_string(&json!({"result": item}))
            .map_err(|e| ApiError::internal(e.to_string()))?;
        self.tx
            .send(line)
            .await
            .map_err(|_| ApiError::unknown("client disconnected"))
    }
}

fn stream_response(
    state: AppState,
    build: impl FnOnce(mpsc::Sender<String>) -> Request + Send + 'static,
) -> Response {
    let (tx, rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let request = build(tx.clone());
        if let Err(err) = state.session.execute(request).await {
            warn!(%err, "streaming request failed");
            let _ = tx.send(error_body(&err).to_string()).await;
        }
    });

    let body = Body::from_stream(
        ReceiverStream::new(rx).map(|line| Ok::<_, std::convert::Infallible>(line + "\n")),
    );
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

// =========================================================================
// Handlers
// =========================================================================

async fn insert(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<InsertRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::Insert(req)).await)
}

async fn replace(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<ReplaceRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::Replace(req)).await)
}

async fn update(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<UpdateRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::Update(req)).await)
}

async fn delete(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<DeleteRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::Delete(req)).await)
}

async fn import(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<ImportRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::Import(req)).await)
}

async fn read(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<ReadRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    stream_response(state, move |tx| Request::Read(req, Box::new(NdjsonSink::new(tx))))
}

async fn search(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<SearchRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    stream_response(state, move |tx| Request::Search(req, Box::new(NdjsonSink::new(tx))))
}

async fn create_or_update_collection(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    Json(mut req): Json<CreateOrUpdateCollectionRequest>,
) -> Response {
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::CreateOrUpdateCollection(req)).await)
}

async fn drop_collection(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    req: Option<Json<DropCollectionRequest>>,
) -> Response {
    let mut req = req.map(|Json(req)| req).unwrap_or_default();
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::DropCollection(req)).await)
}

async fn describe_collection(
    State(state): State<AppState>,
    Path((project, collection)): Path<(String, String)>,
    req: Option<Json<DescribeCollectionRequest>>,
) -> Response {
    let mut req = req.map(|Json(req)| req).unwrap_or_default();
    req.project = project;
    req.collection = collection;
    unary(state.session.execute(Request::DescribeCollection(req)).await)
}

async fn list_collections(
    State(state): State<AppState>,
    Path(project): Path<String>,
    req: Option<Json<ListCollectionsRequest>>,
) -> Response {
    let mut req = req.map(|Json(req)| req).unwrap_or_default();
    req.project = project;
    unary(state.session.execute(Request::ListCollections(req)).await)
}

async fn create_project(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Response {
    let req = CreateProjectRequest { project };
    unary(state.session.execute(Request::CreateProject(req)).await)
}

async fn delete_project(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Response {
    let req = DeleteProjectRequest { project };
    unary(state.session.execute(Request::DeleteProject(req)).await)
}

async fn list_projects(State(state): State<AppState>) -> Response {
    unary(state.session.execute(Request::ListProjects(ListProjectsRequest {})).await)
}

async fn describe_database(
    State(state): State<AppState>,
    Path(project): Path<String>,
    req: Option<Json<DescribeDatabaseRequest>>,
) -> Response {
    let mut req = req.map(|Json(req)| req).unwrap_or_default();
    req.project = project;
    unary(state.session.execute(Request::DescribeDatabase(req)).await)
}

async fn create_branch(
    State(state): State<AppState>,
    Path((project, branch)): Path<(String, String)>,
) -> Response {
    let req = CreateBranchRequest { project, branch };
    unary(state.session.execute(Request::CreateBranch(req)).await)
}

async fn delete_branch(
    State(state): State<AppState>,
    Path((project, branch)): Path<(String, String)>,
) -> Response {
    let req = DeleteBranchRequest { project, branch };
    unary(state.session.execute(Request::DeleteBranch(req)).await)
}
