//! Session manager.
//!
//! The single entry point for request execution: resolves the tenant,
//! version-gates its cached state, dispatches the request union onto the
//! runners, and owns the transaction lifecycle. Write requests run
//! inside exactly one transaction; streaming reads manage their own
//! transactions and may span several.

use std::sync::Arc;

use lodestone_kv::KvStore;
use lodestone_metadata::{
    Dictionary, MetadataOptions, NameRegistry, Tenant, TenantManager, TxManager, VersionHandler,
};
use lodestone_search::SearchStore;
use lodestone_types::config::Config;
use lodestone_types::{ApiError, ApiResult};

use crate::api::{Request, ResponseBody};
use crate::indexer::SearchIndexer;
use crate::runners::{self, RunnerContext};

/// Behavior switches derived from the configuration tree.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub metadata: MetadataOptions,
    pub search_read_enabled: bool,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            metadata: MetadataOptions {
                search_write_enabled: config.search.write_enabled,
                kv_hard_drop: config.server.kv_hard_drop,
                allow_incompatible_schema: config.schema.allow_incompatible,
            },
            search_read_enabled: config.search.read_enabled,
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { metadata: MetadataOptions::default(), search_read_enabled: true }
    }
}

/// Executes requests against one deployment.
pub struct SessionManager {
    tenants: Arc<TenantManager>,
    ctx: RunnerContext,
}

impl SessionManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        search: Arc<dyn SearchStore>,
        registry: Arc<NameRegistry>,
        options: ServerOptions,
    ) -> Self {
        let tenants = Arc::new(TenantManager::new(
            Arc::clone(&kv),
            Arc::clone(&search),
            Arc::clone(&registry),
            options.metadata,
        ));
        let ctx = RunnerContext {
            tx_manager: TxManager::new(kv, Arc::clone(&registry)),
            dict: Dictionary::new(&registry),
            encoder: tenants.encoder(),
            versions: VersionHandler::new(&registry),
            search: Arc::clone(&search),
            indexer: SearchIndexer::new(search, Arc::clone(&tenants)),
            search_read_enabled: options.search_read_enabled,
        };
        Self { tenants, ctx }
    }

    pub fn tenant_manager(&self) -> &Arc<TenantManager> {
        &self.tenants
    }

    /// Runs one request to completion. The tenant is the default
    /// namespace; namespace selection by authenticated callers sits at
    /// the out-of-scope gateway boundary.
    pub async fn execute(&self, request: Request) -> ApiResult<ResponseBody> {
        let tenant = self.tenants.ensure_default_namespace().await?;
        self.execute_for(&tenant, request).await
    }

    /// Runs one request against an already resolved tenant.
    pub async fn execute_for(
        &self,
        tenant: &Arc<Tenant>,
        request: Request,
    ) -> ApiResult<ResponseBody> {
        match request {
            // long reads own their transactions and recover from the
            // engine's transaction duration cap
            Request::Read(req, mut sink) => {
                self.sync_tenant(tenant).await?;
                runners::read::read(&self.ctx, tenant, &req, sink.as_mut()).await?;
                Ok(ResponseBody::Streamed)
            }
            Request::Search(req, mut sink) => {
                self.sync_tenant(tenant).await?;
                runners::search::search(&self.ctx, tenant, &req, sink.as_mut()).await?;
                Ok(ResponseBody::Streamed)
            }
            // import owns its transactions: schema evolution commits
            // separately from the batch
            Request::Import(req) => {
                let response = runners::import::import(&self.ctx, tenant, &req).await?;
                Ok(ResponseBody::Write(response))
            }
            other => self.execute_in_tx(tenant, other).await,
        }
    }

    async fn sync_tenant(&self, tenant: &Arc<Tenant>) -> ApiResult<()> {
        let tx = self.ctx.start_synced_tx(tenant).await?;
        tx.rollback().await.map_err(ApiError::from)
    }

    async fn execute_in_tx(
        &self,
        tenant: &Arc<Tenant>,
        request: Request,
    ) -> ApiResult<ResponseBody> {
        let mut tx = self.ctx.start_synced_tx(tenant).await?;

        let result = self.dispatch(&mut tx, tenant, request).await;
        match result {
            Ok(response) => {
                self.ctx.commit_and_mirror(tx).await?;
                Ok(response)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        tx: &mut lodestone_metadata::Tx,
        tenant: &Arc<Tenant>,
        request: Request,
    ) -> ApiResult<ResponseBody> {
        let ctx = &self.ctx;
        Ok(match request {
            Request::Insert(req) => {
                ResponseBody::Write(runners::write::insert(ctx, tx, tenant, &req).await?)
            }
            Request::Replace(req) => {
                ResponseBody::Write(runners::write::replace(ctx, tx, tenant, &req).await?)
            }
            Request::Update(req) => {
                ResponseBody::Write(runners::write::update(ctx, tx, tenant, &req).await?)
            }
            Request::Delete(req) => {
                ResponseBody::Write(runners::write::delete(ctx, tx, tenant, &req).await?)
            }
            Request::CreateOrUpdateCollection(req) => ResponseBody::Status(
                runners::ddl::create_or_update_collection(tx, tenant, &req).await?,
            ),
            Request::DropCollection(req) => {
                ResponseBody::Status(runners::ddl::drop_collection(tx, tenant, &req).await?)
            }
            Request::ListCollections(req) => ResponseBody::ListCollections(
                runners::ddl::list_collections(tx, tenant, &req).await?,
            ),
            Request::DescribeCollection(req) => ResponseBody::DescribeCollection(
                runners::ddl::describe_collection(tx, tenant, &req).await?,
            ),
            Request::CreateProject(req) => {
                ResponseBody::Status(runners::ddl::create_project(tx, tenant, &req).await?)
            }
            Request::DeleteProject(req) => {
                ResponseBody::Status(runners::ddl::delete_project(tx, tenant, &req).await?)
            }
            Request::ListProjects(_) => {
                ResponseBody::ListProjects(runners::ddl::list_projects(tenant).await?)
            }
            Request::DescribeDatabase(req) => ResponseBody::DescribeDatabase(
                runners::ddl::describe_database(tx, tenant, &req).await?,
            ),
            Request::CreateBranch(req) => {
                ResponseBody::Status(runners::ddl::create_branch(tx, tenant, &req).await?)
            }
            Request::DeleteBranch(req) => {
                ResponseBody::Status(runners::ddl::delete_branch(tx, tenant, &req).await?)
            }
            Request::Read(..) | Request::Search(..) | Request::Import(..) => {
                return Err(ApiError::internal("streaming request on the unary path"))
            }
        })
    }
}
