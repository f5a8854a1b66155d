//! Collection, project, and branch runners.
//!
//! DDL runners work on a cloned database staged into the transaction;
//! the session layer owns the commit, which bumps the global metadata
//! version and makes every worker reload before its next access.

use lodestone_metadata::{ProjectMetadata, Tenant, Tx};
use lodestone_schema::Factory;
use lodestone_types::{ApiError, ApiResult, DatabaseName, ErrorCode, Timestamp};
use serde_json::Value;

use super::{get_collection, get_database};
use crate::api::{
    CollectionInfo, CreateBranchRequest, CreateOrUpdateCollectionRequest, CreateProjectRequest,
    DeleteBranchRequest, DeleteProjectRequest, DescribeCollectionRequest,
    DescribeCollectionResponse, DescribeDatabaseRequest, DescribeDatabaseResponse,
    DropCollectionRequest, ListCollectionsRequest, ListCollectionsResponse,
    ListProjectsResponse, StatusResponse, CREATED_STATUS, DROPPED_STATUS,
};

fn status(value: &str) -> StatusResponse {
    StatusResponse { status: value.to_owned(), message: None }
}

pub async fn create_or_update_collection(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &CreateOrUpdateCollectionRequest,
) -> ApiResult<StatusResponse> {
    let mut db = get_database(tx, tenant, &req.project, &req.branch)?;

    if req.only_create && db.get_collection(&req.collection).is_some() {
        return Err(ApiError::already_exists("collection already exist"));
    }

    let schema = serde_json::to_vec(&req.schema).map_err(|e| ApiError::internal(e.to_string()))?;
    let factory = Factory::build(&req.collection, &schema)?;

    match tenant.create_collection(tx, &mut db, &factory).await {
        Ok(()) => {}
        Err(err) if err.code() == ErrorCode::AlreadyExists => {
            // a concurrent creator raced us on the dictionary entry
            return Err(ApiError::aborted("concurrent create collection request, aborting"));
        }
        Err(err) => return Err(err),
    }

    // later operations in this transaction observe the mutated clone
    tx.stage_database(db);
    Ok(status(CREATED_STATUS))
}

pub async fn drop_collection(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &DropCollectionRequest,
) -> ApiResult<StatusResponse> {
    let mut db = get_database(tx, tenant, &req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    // dropping the collection also drops its implicit search index; the
    // explicit indexes sourced from it go with it
    let search_indexes: Vec<String> = collection.search_indexes.keys().cloned().collect();

    tenant.drop_collection(tx, &mut db, &req.collection).await?;
    for index in search_indexes {
        tenant.delete_search_index(tx, &req.project, &index).await?;
    }

    tx.stage_database(db);
    Ok(status(DROPPED_STATUS))
}

pub async fn list_collections(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &ListCollectionsRequest,
) -> ApiResult<ListCollectionsResponse> {
    let db = get_database(tx, tenant, &req.project, &req.branch)?;
    Ok(ListCollectionsResponse {
        collections: db
            .list_collections()
            .into_iter()
            .map(|coll| CollectionInfo { collection: coll.name.clone() })
            .collect(),
    })
}

pub async fn describe_collection(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &DescribeCollectionRequest,
) -> ApiResult<DescribeCollectionResponse> {
    let db = get_database(tx, tenant, &req.project, &req.branch)?;
    let collection = get_collection(&db, &req.collection)?;

    let size = tenant.collection_size(&db, &collection).await?;
    let schema: Value = serde_json::from_slice(&collection.schema)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(DescribeCollectionResponse { collection: collection.name, schema, size })
}

pub async fn create_project(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &CreateProjectRequest,
) -> ApiResult<StatusResponse> {
    let metadata = ProjectMetadata {
        created_at: Timestamp::now().unix_nanos(),
        ..Default::default()
    };
    match tenant.create_project(tx, &req.project, Some(metadata)).await {
        Ok(false) => Ok(status(CREATED_STATUS)),
        Ok(true) => Err(ApiError::already_exists("project already exist")),
        Err(err) if err.code() == ErrorCode::AlreadyExists => {
            Err(ApiError::already_exists("project already exist"))
        }
        Err(err) => Err(err),
    }
}

pub async fn delete_project(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &DeleteProjectRequest,
) -> ApiResult<StatusResponse> {
    if !tenant.delete_project(tx, &req.project).await? {
        return Err(ApiError::not_found(format!(
            "project doesn't exist '{}'",
            req.project
        )));
    }
    Ok(status(DROPPED_STATUS))
}

pub async fn list_projects(tenant: &Tenant) -> ApiResult<ListProjectsResponse> {
    Ok(ListProjectsResponse { projects: tenant.list_projects() })
}

pub async fn describe_database(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &DescribeDatabaseRequest,
) -> ApiResult<DescribeDatabaseResponse> {
    let db = get_database(tx, tenant, &req.project, &req.branch)?;

    let mut collections = Vec::new();
    for collection in db.list_collections() {
        let size = tenant.collection_size(&db, collection).await?;
        let schema: Value = serde_json::from_slice(&collection.schema)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        collections.push(DescribeCollectionResponse {
            collection: collection.name.clone(),
            schema,
            size,
        });
    }

    Ok(DescribeDatabaseResponse {
        collections,
        size: tenant.database_size(&db).await?,
        branches: tenant.list_branches(&req.project),
    })
}

pub async fn create_branch(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &CreateBranchRequest,
) -> ApiResult<StatusResponse> {
    let name = DatabaseName::with_branch(&req.project, &req.branch);
    tenant.create_branch(tx, &req.project, &name).await?;
    Ok(status(CREATED_STATUS))
}

pub async fn delete_branch(
    tx: &mut Tx,
    tenant: &Tenant,
    req: &DeleteBranchRequest,
) -> ApiResult<StatusResponse> {
    let name = DatabaseName::with_branch(&req.project, &req.branch);
    tenant.delete_branch(tx, &req.project, &name).await?;
    Ok(status(DROPPED_STATUS))
}
