//! Tenant manager.
//!
//! Owns the in-memory view of tenants → projects → databases →
//! collections → indexes, reloaded from the metadata subspaces under
//! version gating. DDL paths operate on a cloned [`Database`] staged
//! inside the transaction; the clone is promoted indirectly: commit
//! bumps the global metadata version, and the next access on any worker
//! reloads.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lodestone_kv::KvStore;
use lodestone_schema::{
    apply_schema_rules, apply_search_index_schema_rules, build_search_factory,
    search_delta_fields, DefaultCollection, Factory, ImplicitSearchIndex, SchemaVersion,
    SearchIndex, SearchIndexFactory, SearchSource, StoreSchema,
};
use lodestone_search::SearchStore;
use lodestone_types::{
    ApiError, ApiResult, CollectionId, DatabaseId, DatabaseName, MetadataError,
    NamespaceId, NamespaceMetadata, Timestamp,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::dictionary::Dictionary;
use crate::encoder::Encoder;
use crate::namespace_store::{CacheMetadata, NamespaceStore, ProjectMetadata, SearchMetadata};
use crate::registry::NameRegistry;
use crate::schema_store::{SchemaRecord, SchemaSubspace, SearchSchemaSubspace};
use crate::session::{Tx, TxManager};
use crate::version::{Version, VersionHandler};

/// First version assigned to every fresh schema.
pub const BASE_SCHEMA_VERSION: i32 = 1;

/// Behavior switches handed down from the configuration tree.
#[derive(Debug, Clone, Copy)]
pub struct MetadataOptions {
    /// Mirror DDL into the search store.
    pub search_write_enabled: bool,
    /// Delete the KV range when a collection is dropped.
    pub kv_hard_drop: bool,
    /// Accept schema updates that break backward compatibility.
    pub allow_incompatible_schema: bool,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            search_write_enabled: true,
            kv_hard_drop: true,
            allow_incompatible_schema: false,
        }
    }
}

/// One collection with its dictionary-encoded index ids.
#[derive(Debug, Clone)]
pub struct CollectionHolder {
    pub id: u32,
    pub name: String,
    pub collection: DefaultCollection,
    pub idx_name_to_id: HashMap<String, u32>,
}

/// A database: the main branch of a project or one of its branches.
#[derive(Debug, Clone)]
pub struct Database {
    id: DatabaseId,
    name: DatabaseName,
    collections: HashMap<String, CollectionHolder>,
    id_to_collection: HashMap<u32, String>,
    needs_fixing: HashSet<String>,
}

impl Database {
    pub fn new(id: DatabaseId, name: DatabaseName) -> Self {
        Self {
            id,
            name,
            collections: HashMap::new(),
            id_to_collection: HashMap::new(),
            needs_fixing: HashSet::new(),
        }
    }

    pub fn id(&self) -> DatabaseId {
        self.id
    }

    pub fn name(&self) -> &DatabaseName {
        &self.name
    }

    pub fn is_branch(&self) -> bool {
        !self.name.is_main()
    }

    pub fn get_collection(&self, name: &str) -> Option<&DefaultCollection> {
        self.collections.get(name).map(|h| &h.collection)
    }

    pub fn get_collection_holder(&self, name: &str) -> Option<&CollectionHolder> {
        self.collections.get(name)
    }

    pub fn list_collections(&self) -> Vec<&DefaultCollection> {
        let mut list: Vec<&DefaultCollection> =
            self.collections.values().map(|h| &h.collection).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn collection_name_by_id(&self, id: u32) -> Option<&str> {
        self.id_to_collection.get(&id).map(String::as_str)
    }

    /// Collections that failed to load during the last reload and need
    /// repair before they are usable.
    pub fn needs_fixing(&self) -> &HashSet<String> {
        &self.needs_fixing
    }

    fn insert_holder(&mut self, holder: CollectionHolder) {
        self.id_to_collection.insert(holder.id, holder.name.clone());
        self.collections.insert(holder.name.clone(), holder);
    }

    fn remove_collection(&mut self, name: &str) {
        if let Some(holder) = self.collections.remove(name) {
            self.id_to_collection.remove(&holder.id);
        }
    }
}

/// Explicit search indexes of one project.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    indexes: HashMap<String, SearchIndex>,
}

impl SearchState {
    pub fn add_index(&mut self, index: SearchIndex) {
        self.indexes.insert(index.name.clone(), index);
    }

    pub fn get_index(&self, name: &str) -> Option<&SearchIndex> {
        self.indexes.get(name)
    }

    pub fn remove_index(&mut self, name: &str) -> Option<SearchIndex> {
        self.indexes.remove(name)
    }

    pub fn list(&self) -> Vec<&SearchIndex> {
        let mut list: Vec<&SearchIndex> = self.indexes.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// A project: one main database, its branches, and its search indexes.
/// The project shares its id with the main database.
#[derive(Debug, Clone)]
pub struct Project {
    id: u32,
    name: String,
    database: Database,
    branches: HashMap<String, Database>,
    pub search: SearchState,
}

impl Project {
    fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            database: Database::new(DatabaseId::new(id), DatabaseName::parse(name)),
            branches: HashMap::new(),
            search: SearchState::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn main_database(&self) -> &Database {
        &self.database
    }

    /// The main database or a branch, by parsed name.
    pub fn get_database(&self, name: &DatabaseName) -> ApiResult<&Database> {
        if name.is_main() {
            return Ok(&self.database);
        }
        self.branches.get(&name.persisted()).ok_or_else(|| {
            MetadataError::BranchNotFound { branch: name.branch().to_owned() }.into()
        })
    }

    /// All databases, main first.
    pub fn databases(&self) -> Vec<&Database> {
        let mut list = vec![&self.database];
        list.extend(self.branches.values());
        list
    }

    /// Branch names, main included.
    pub fn branch_names(&self) -> Vec<String> {
        let mut names = vec![self.database.name.branch().to_owned()];
        names.extend(self.branches.values().map(|db| db.name.branch().to_owned()));
        names.sort();
        names
    }
}

struct TenantState {
    projects: HashMap<String, Project>,
    /// Database id → (project name, persisted database name). Rows carry
    /// database ids that may belong to branches, so the project map alone
    /// is not enough.
    id_to_database: HashMap<u32, (String, String)>,
    version: Version,
}

/// A tenant: one namespace and everything below it. Thread-safe; all
/// mutation happens under the state lock or on staged clones.
pub struct Tenant {
    namespace: NamespaceMetadata,
    state: RwLock<TenantState>,

    kv: Arc<dyn KvStore>,
    search: Arc<dyn SearchStore>,
    dict: Dictionary,
    schemas: SchemaSubspace,
    search_schemas: SearchSchemaSubspace,
    namespace_store: NamespaceStore,
    encoder: Encoder,
    options: MetadataOptions,
}

impl Tenant {
    #[allow(clippy::too_many_arguments)]
    fn new(
        namespace: NamespaceMetadata,
        kv: Arc<dyn KvStore>,
        search: Arc<dyn SearchStore>,
        registry: &NameRegistry,
        options: MetadataOptions,
        version: Version,
    ) -> Self {
        Self {
            namespace,
            state: RwLock::new(TenantState {
                projects: HashMap::new(),
                id_to_database: HashMap::new(),
                version,
            }),
            kv,
            search,
            dict: Dictionary::new(registry),
            schemas: SchemaSubspace::new(registry),
            search_schemas: SearchSchemaSubspace::new(registry),
            namespace_store: NamespaceStore::new(registry),
            encoder: Encoder::new(),
            options,
        }
    }

    pub fn namespace(&self) -> &NamespaceMetadata {
        &self.namespace
    }

    fn ns_id(&self) -> NamespaceId {
        NamespaceId::new(self.namespace.id)
    }

    pub fn version(&self) -> Version {
        self.state.read().version
    }

    /// Name of the search-store index implicitly backing a collection.
    pub fn search_collection_name(&self, db_name: &str, coll_name: &str) -> String {
        format!("{}-{db_name}-{coll_name}", self.namespace.str_id)
    }

    // =========================================================================
    // Reload
    // =========================================================================

    /// Reloads the cached state when `version` is ahead of the cached
    /// one. Only one caller reloads; the others observe the fresh state
    /// after the lock is released.
    pub async fn reload_if_stale(&self, tx: &mut Tx, version: Version) -> ApiResult<()> {
        if self.state.read().version >= version {
            return Ok(());
        }
        let indexes = self.search_store_indexes().await?;
        self.reload(tx, version, &indexes).await
    }

    async fn search_store_indexes(&self) -> ApiResult<HashMap<String, StoreSchema>> {
        let indexes = self.search.all_indexes().await.map_err(ApiError::from)?;
        Ok(indexes.into_iter().map(|schema| (schema.name.clone(), schema)).collect())
    }

    /// Rebuilds the full in-memory view from the metadata subspaces.
    pub async fn reload(
        &self,
        tx: &mut Tx,
        version: Version,
        indexes_in_search: &HashMap<String, StoreSchema>,
    ) -> ApiResult<()> {
        debug!(tenant = %self.namespace.str_id, version, "reloading tenant");

        let db_name_to_id = self.dict.get_databases(tx, self.ns_id()).await?;

        let mut projects: HashMap<String, Project> = HashMap::new();
        for (persisted, id) in &db_name_to_id {
            let name = DatabaseName::parse(persisted);
            if name.is_main() {
                projects.insert(name.project().to_owned(), Project::new(*id, persisted));
            }
        }

        let mut id_to_database = HashMap::new();
        for (persisted, id) in &db_name_to_id {
            let database = self.reload_database(tx, persisted, *id, indexes_in_search).await?;
            let name = database.name.clone();
            let Some(project) = projects.get_mut(name.project()) else {
                warn!(database = %persisted, "branch without a main database, skipping");
                continue;
            };
            id_to_database.insert(*id, (name.project().to_owned(), persisted.clone()));
            if database.is_branch() {
                project.branches.insert(persisted.clone(), database);
            } else {
                project.database = database;
            }
        }

        for project in projects.values_mut() {
            project.search = self
                .reload_search(tx, project.id, &project.name, indexes_in_search)
                .await?;

            // attach back-pointers for collection-sourced indexes
            let indexes: Vec<SearchIndex> =
                project.search.list().into_iter().cloned().collect();
            for index in indexes {
                let SearchSource::Collection { branch, collection } = &index.source else {
                    continue;
                };
                let database = match branch {
                    None => Some(&mut project.database),
                    Some(branch) => {
                        let persisted =
                            DatabaseName::with_branch(&project.name, branch.clone()).persisted();
                        project.branches.get_mut(&persisted)
                    }
                };
                if let Some(database) = database {
                    if let Some(holder) = database.collections.get_mut(collection) {
                        holder.collection.add_search_index(index.clone());
                    }
                }
            }
        }

        let mut state = self.state.write();
        state.projects = projects;
        state.id_to_database = id_to_database;
        state.version = version;
        Ok(())
    }

    async fn reload_database(
        &self,
        tx: &mut Tx,
        persisted_name: &str,
        db_id: u32,
        indexes_in_search: &HashMap<String, StoreSchema>,
    ) -> ApiResult<Database> {
        let mut database =
            Database::new(DatabaseId::new(db_id), DatabaseName::parse(persisted_name));

        let coll_name_to_id = self.dict.get_collections(tx, self.ns_id(), db_id).await?;
        for (coll_name, coll_id) in coll_name_to_id {
            let idx_name_to_id =
                match self.dict.get_indexes(tx, self.ns_id(), db_id, coll_id).await {
                    Ok(map) => map,
                    Err(err) => {
                        debug!(collection = %coll_name, %err, "skipping loading collection");
                        database.needs_fixing.insert(coll_name);
                        continue;
                    }
                };

            let schemas = self.schemas.get(tx, self.ns_id(), db_id, coll_id).await?;
            if schemas.is_empty() {
                debug!(collection = %coll_name, "collection has no schema, skipping");
                database.needs_fixing.insert(coll_name);
                continue;
            }

            let search_name = self.search_collection_name(persisted_name, &coll_name);
            let fields_in_search = indexes_in_search
                .get(&search_name)
                .map(|schema| schema.fields.clone())
                .unwrap_or_default();

            let collection = match build_collection(
                coll_id,
                &coll_name,
                &schemas,
                &idx_name_to_id,
                &search_name,
                &fields_in_search,
            ) {
                Ok(collection) => collection,
                Err(err) => {
                    debug!(collection = %coll_name, %err, "skipping loading collection");
                    database.needs_fixing.insert(coll_name);
                    continue;
                }
            };

            let mut collection = collection;
            collection.encoded_name = self.encoder.encode_table_name(
                self.ns_id(),
                Some(database.id),
                Some(CollectionId::new(coll_id)),
            );

            database.insert_holder(CollectionHolder {
                id: coll_id,
                name: coll_name,
                collection,
                idx_name_to_id,
            });
        }

        Ok(database)
    }

    async fn reload_search(
        &self,
        tx: &mut Tx,
        project_id: u32,
        project_name: &str,
        indexes_in_search: &HashMap<String, StoreSchema>,
    ) -> ApiResult<SearchState> {
        let Some(metadata) = self
            .namespace_store
            .get_project_metadata(tx, self.ns_id(), project_name)
            .await?
        else {
            return Ok(SearchState::default());
        };

        let mut search = SearchState::default();
        for search_md in &metadata.search_metadata {
            let Some(record) = self
                .search_schemas
                .get_latest(tx, self.ns_id(), project_id, &search_md.name)
                .await?
            else {
                warn!(index = %search_md.name, "search index schema missing, skipping");
                continue;
            };
            let factory = build_search_factory(&search_md.name, &record.schema)?;
            let store_name =
                self.encoder
                    .encode_search_table_name(self.ns_id(), project_id, &search_md.name);
            let fields_in_store = indexes_in_search
                .get(&store_name)
                .map(|schema| schema.fields.clone())
                .unwrap_or_default();
            search.add_index(SearchIndex::new(
                record.version,
                &store_name,
                &factory,
                &fields_in_store,
            ));
        }
        Ok(search)
    }

    // =========================================================================
    // Projects
    // =========================================================================

    /// Returns a snapshot of the project.
    pub fn get_project(&self, name: &str) -> ApiResult<Project> {
        self.state
            .read()
            .projects
            .get(name)
            .cloned()
            .ok_or_else(|| MetadataError::ProjectNotFound { project: name.to_owned() }.into())
    }

    /// Returns a snapshot of a database of the project.
    pub fn get_database(&self, project: &str, branch: &str) -> ApiResult<Database> {
        let state = self.state.read();
        let proj = state
            .projects
            .get(project)
            .ok_or(MetadataError::ProjectNotFound { project: project.to_owned() })?;
        Ok(proj.get_database(&DatabaseName::with_branch(project, branch))?.clone())
    }

    pub fn list_projects(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().projects.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_branches(&self, project: &str) -> Vec<String> {
        self.state
            .read()
            .projects
            .get(project)
            .map(Project::branch_names)
            .unwrap_or_default()
    }

    /// Creates a project and its main database. Returns `true` when the
    /// project already existed.
    pub async fn create_project(
        &self,
        tx: &mut Tx,
        name: &str,
        metadata: Option<ProjectMetadata>,
    ) -> ApiResult<bool> {
        if self.state.read().projects.contains_key(name) {
            return Ok(true);
        }

        let db_id = self.dict.create_database(tx, name, self.ns_id()).await?;
        if let Some(mut metadata) = metadata {
            metadata.id = db_id;
            self.namespace_store
                .insert_project_metadata(tx, self.ns_id(), name, &metadata)
                .await
                .map_err(|err| {
                    warn!(%err, "failed to insert project metadata");
                    ApiError::internal("failed to setup project metadata")
                })?;
        }
        Ok(false)
    }

    /// Deletes a project with all branches, collections, search indexes,
    /// and the metadata blob. Returns `false` when the project does not
    /// exist.
    pub async fn delete_project(&self, tx: &mut Tx, name: &str) -> ApiResult<bool> {
        let Ok(project) = self.get_project(name) else {
            return Ok(false);
        };

        for branch in project.branches.values() {
            self.delete_branch_inner(tx, &project, branch.name.clone()).await?;
        }

        self.dict
            .drop_database(tx, name, self.ns_id(), project.id)
            .await?;

        let mut main = project.database.clone();
        let collections: Vec<String> = main.collections.keys().cloned().collect();
        for coll in collections {
            self.drop_collection(tx, &mut main, &coll).await?;
        }

        for index in project.search.list() {
            self.delete_search_index_inner(tx, &project, index).await?;
        }

        self.namespace_store
            .delete_project_metadata(tx, self.ns_id(), name)
            .await
            .map_err(|err| {
                warn!(%err, "failed to delete project metadata");
                ApiError::internal("failed to delete project metadata")
            })?;

        Ok(true)
    }

    // =========================================================================
    // Branches
    // =========================================================================

    /// Creates a schema-only copy of the project's main database under a
    /// new database id. No row data is copied.
    pub async fn create_branch(
        &self,
        tx: &mut Tx,
        project: &str,
        name: &DatabaseName,
    ) -> ApiResult<()> {
        let proj = self.get_project(project)?;
        if proj.branches.contains_key(&name.persisted()) {
            return Err(MetadataError::BranchExists { branch: name.branch().to_owned() }.into());
        }

        let branch_id = self
            .dict
            .create_database(tx, &name.persisted(), self.ns_id())
            .await?;

        let mut branch = Database::new(DatabaseId::new(branch_id), name.clone());
        for coll in proj.database.list_collections() {
            let factory = Factory::build(&coll.name, &coll.schema)?;
            self.create_collection(tx, &mut branch, &factory).await?;
        }
        Ok(())
    }

    /// Deletes a database branch. The main branch can never be deleted.
    pub async fn delete_branch(
        &self,
        tx: &mut Tx,
        project: &str,
        name: &DatabaseName,
    ) -> ApiResult<()> {
        if name.is_main() {
            return Err(MetadataError::CannotDeleteMainBranch.into());
        }
        let proj = self.get_project(project)?;
        self.delete_branch_inner(tx, &proj, name.clone()).await
    }

    async fn delete_branch_inner(
        &self,
        tx: &mut Tx,
        project: &Project,
        name: DatabaseName,
    ) -> ApiResult<()> {
        let Some(branch) = project.branches.get(&name.persisted()) else {
            return Err(
                MetadataError::BranchNotFound { branch: name.branch().to_owned() }.into()
            );
        };

        self.dict
            .drop_database(tx, &name.persisted(), self.ns_id(), branch.id.value())
            .await?;

        let mut branch = branch.clone();
        let collections: Vec<String> = branch.collections.keys().cloned().collect();
        for coll_name in collections {
            let indexes: Vec<SearchIndex> = branch
                .collections
                .get(&coll_name)
                .map(|holder| holder.collection.search_indexes.values().cloned().collect())
                .unwrap_or_default();
            self.drop_collection(tx, &mut branch, &coll_name).await?;
            for index in indexes {
                self.delete_search_index_inner(tx, project, &index).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Creates a collection in the staged database clone, or evolves the
    /// schema when the collection already exists with a different one.
    pub async fn create_collection(
        &self,
        tx: &mut Tx,
        database: &mut Database,
        factory: &Factory,
    ) -> ApiResult<()> {
        if let Some(holder) = database.collections.get(&factory.name) {
            if schemas_equal(&holder.collection.schema, &factory.schema)? {
                return Ok(());
            }
            let holder = holder.clone();
            return self.update_collection(tx, database, holder, factory).await;
        }

        let coll_id = self
            .dict
            .create_collection(tx, &factory.name, self.ns_id(), database.id.value())
            .await?;

        let mut factory = factory.clone();
        let mut idx_name_to_id = HashMap::new();
        let idx_id = self
            .dict
            .create_index(
                tx,
                &factory.primary_key.name,
                self.ns_id(),
                database.id.value(),
                coll_id,
            )
            .await?;
        factory.primary_key.id = lodestone_types::IndexId::new(idx_id);
        idx_name_to_id.insert(factory.primary_key.name.clone(), idx_id);

        self.schemas
            .put(
                tx,
                self.ns_id(),
                database.id.value(),
                coll_id,
                &factory.schema,
                BASE_SCHEMA_VERSION,
            )
            .await?;

        let search_name =
            self.search_collection_name(&database.name.persisted(), &factory.name);
        let implicit = ImplicitSearchIndex::new(&factory.name, &search_name, &factory, &[]);

        let mut collection = DefaultCollection::new(
            CollectionId::new(coll_id),
            BASE_SCHEMA_VERSION,
            &factory,
            None,
            implicit,
        )?;
        collection.encoded_name = self.encoder.encode_table_name(
            self.ns_id(),
            Some(database.id),
            Some(CollectionId::new(coll_id)),
        );
        let store_schema = collection.implicit_search_index.store_schema.clone();

        database.insert_holder(CollectionHolder {
            id: coll_id,
            name: factory.name.clone(),
            collection,
            idx_name_to_id,
        });

        if self.options.search_write_enabled {
            if let Err(err) = self.search.create_index(&store_schema).await {
                if !err.is_duplicate() {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    async fn update_collection(
        &self,
        tx: &mut Tx,
        database: &mut Database,
        mut holder: CollectionHolder,
        factory: &Factory,
    ) -> ApiResult<()> {
        let mut factory = factory.clone();
        match holder.idx_name_to_id.get(&factory.primary_key.name) {
            Some(id) => factory.primary_key.id = lodestone_types::IndexId::new(*id),
            None => {
                let id = self
                    .dict
                    .create_index(
                        tx,
                        &factory.primary_key.name,
                        self.ns_id(),
                        database.id.value(),
                        holder.id,
                    )
                    .await?;
                factory.primary_key.id = lodestone_types::IndexId::new(id);
                holder.idx_name_to_id.insert(factory.primary_key.name.clone(), id);
            }
        }

        let existing = &holder.collection;
        apply_schema_rules(
            &existing.fields,
            &existing.primary_key.fields,
            &factory,
            self.options.allow_incompatible_schema,
        )?;

        let revision = existing.version() + 1;
        self.schemas
            .put(tx, self.ns_id(), database.id.value(), holder.id, &factory.schema, revision)
            .await?;

        let all_schemas = self
            .schemas
            .get(tx, self.ns_id(), database.id.value(), holder.id)
            .await?;
        let versions: Vec<SchemaVersion> = all_schemas
            .into_iter()
            .map(|record| SchemaVersion { version: record.version, schema: record.schema })
            .collect();

        let store_name = existing.implicit_search_index.store_index_name().to_owned();
        let fields_in_store = if self.options.search_write_enabled {
            self.search
                .describe_index(&store_name)
                .await
                .map(|schema| schema.fields)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let implicit =
            ImplicitSearchIndex::new(&factory.name, &store_name, &factory, &fields_in_store);
        let mut collection = DefaultCollection::new(
            CollectionId::new(holder.id),
            revision,
            &factory,
            Some(versions),
            implicit,
        )?;
        collection.encoded_name = self.encoder.encode_table_name(
            self.ns_id(),
            Some(database.id),
            Some(CollectionId::new(holder.id)),
        );
        let target_fields = collection.implicit_search_index.store_schema.fields.clone();

        database.insert_holder(CollectionHolder {
            id: holder.id,
            name: factory.name.clone(),
            collection,
            idx_name_to_id: holder.idx_name_to_id,
        });

        if self.options.search_write_enabled {
            let delta = search_delta_fields(&target_fields, &fields_in_store);
            if !delta.is_empty() {
                self.search
                    .update_index(&store_name, &delta)
                    .await
                    .map_err(ApiError::from)?;
            }
        }
        Ok(())
    }

    /// Drops a collection: dictionary tombstones, index entries, every
    /// schema version, the table counter, the implicit search index, and
    /// (when hard drops are enabled) the row range itself.
    pub async fn drop_collection(
        &self,
        tx: &mut Tx,
        database: &mut Database,
        name: &str,
    ) -> ApiResult<()> {
        let Some(holder) = database.collections.get(name).cloned() else {
            return Err(ApiError::not_found(format!("collection doesn't exist '{name}'")));
        };

        self.dict
            .drop_collection(tx, name, self.ns_id(), database.id.value(), holder.id)
            .await?;
        for (idx_name, idx_id) in &holder.idx_name_to_id {
            self.dict
                .drop_index(tx, idx_name, self.ns_id(), database.id.value(), holder.id, *idx_id)
                .await?;
        }
        self.schemas
            .delete(tx, self.ns_id(), database.id.value(), holder.id)
            .await?;

        let table = holder.collection.encoded_name.clone();
        self.dict.remove_table_counter(tx, &table).await?;

        if self.options.kv_hard_drop {
            self.kv.drop_table(&table).await.map_err(ApiError::from)?;
        }

        if self.options.search_write_enabled {
            let store_name = holder.collection.implicit_search_index.store_index_name();
            if let Err(err) = self.search.drop_index(store_name).await {
                if !err.is_not_found() {
                    return Err(err.into());
                }
            }
        }

        database.remove_collection(name);
        Ok(())
    }

    // =========================================================================
    // Explicit search indexes
    // =========================================================================

    /// Creates an explicit search index, or evolves its schema when it
    /// already exists with a different one.
    pub async fn create_search_index(
        &self,
        tx: &mut Tx,
        project: &str,
        factory: &SearchIndexFactory,
    ) -> ApiResult<()> {
        let proj = self.get_project(project)?;
        if let Some(index) = proj.search.get_index(&factory.name) {
            if schemas_equal(&index.schema, &factory.schema)? {
                return Ok(());
            }
            return self.update_search_index(tx, &proj, factory, index).await;
        }

        let mut metadata = self
            .namespace_store
            .get_project_metadata(tx, self.ns_id(), project)
            .await?;
        let fresh = metadata.is_none();
        let metadata = metadata.get_or_insert_with(|| ProjectMetadata {
            id: proj.id,
            ..Default::default()
        });
        metadata.search_metadata.push(SearchMetadata {
            name: factory.name.clone(),
            creator: None,
            created_at: Timestamp::now().unix_nanos(),
        });
        if fresh {
            self.namespace_store
                .insert_project_metadata(tx, self.ns_id(), project, metadata)
                .await?;
        } else {
            self.namespace_store
                .update_project_metadata(tx, self.ns_id(), project, metadata)
                .await?;
        }

        self.search_schemas
            .put(
                tx,
                self.ns_id(),
                proj.id,
                &factory.name,
                &factory.schema,
                BASE_SCHEMA_VERSION,
            )
            .await?;

        let store_name =
            self.encoder
                .encode_search_table_name(self.ns_id(), proj.id, &factory.name);
        let index = SearchIndex::new(BASE_SCHEMA_VERSION, &store_name, factory, &[]);
        if let Err(err) = self.search.create_index(&index.store_schema).await {
            if !err.is_duplicate() {
                return Err(err.into());
            }
        }

        let mut state = self.state.write();
        if let Some(project) = state.projects.get_mut(project) {
            project.search.add_index(index);
        }
        Ok(())
    }

    async fn update_search_index(
        &self,
        tx: &mut Tx,
        project: &Project,
        factory: &SearchIndexFactory,
        existing: &SearchIndex,
    ) -> ApiResult<()> {
        apply_search_index_schema_rules(
            existing,
            factory,
            self.options.allow_incompatible_schema,
        )?;

        let version = existing.version + 1;
        self.search_schemas
            .put(tx, self.ns_id(), project.id, &factory.name, &factory.schema, version)
            .await?;

        let store_name = existing.store_index_name().to_owned();
        let fields_in_store = self
            .search
            .describe_index(&store_name)
            .await
            .map(|schema| schema.fields)
            .map_err(ApiError::from)?;

        let updated = SearchIndex::new(version, &store_name, factory, &fields_in_store);
        let delta = search_delta_fields(&updated.store_schema.fields, &fields_in_store);
        if !delta.is_empty() {
            self.search
                .update_index(&store_name, &delta)
                .await
                .map_err(ApiError::from)?;
        }

        let mut state = self.state.write();
        if let Some(project) = state.projects.get_mut(&project.name) {
            project.search.add_index(updated);
        }
        Ok(())
    }

    pub fn get_search_index(&self, project: &str, name: &str) -> ApiResult<SearchIndex> {
        let proj = self.get_project(project)?;
        proj.search
            .get_index(name)
            .cloned()
            .ok_or_else(|| MetadataError::SearchIndexNotFound { index: name.to_owned() }.into())
    }

    pub fn list_search_indexes(&self, project: &str) -> ApiResult<Vec<SearchIndex>> {
        let proj = self.get_project(project)?;
        Ok(proj.search.list().into_iter().cloned().collect())
    }

    pub async fn delete_search_index(
        &self,
        tx: &mut Tx,
        project: &str,
        name: &str,
    ) -> ApiResult<()> {
        let proj = self.get_project(project)?;
        let Some(index) = proj.search.get_index(name) else {
            return Err(MetadataError::SearchIndexNotFound { index: name.to_owned() }.into());
        };
        self.delete_search_index_inner(tx, &proj, index).await?;

        let mut state = self.state.write();
        if let Some(project) = state.projects.get_mut(project) {
            project.search.remove_index(name);
        }
        Ok(())
    }

    async fn delete_search_index_inner(
        &self,
        tx: &mut Tx,
        project: &Project,
        index: &SearchIndex,
    ) -> ApiResult<()> {
        let Some(mut metadata) = self
            .namespace_store
            .get_project_metadata(tx, self.ns_id(), &project.name)
            .await?
        else {
            return Err(
                MetadataError::SearchIndexNotFound { index: index.name.clone() }.into()
            );
        };
        let before = metadata.search_metadata.len();
        metadata.search_metadata.retain(|md| md.name != index.name);
        if metadata.search_metadata.len() == before {
            return Err(
                MetadataError::SearchIndexNotFound { index: index.name.clone() }.into()
            );
        }
        self.namespace_store
            .update_project_metadata(tx, self.ns_id(), &project.name, &metadata)
            .await?;

        self.search_schemas
            .delete(tx, self.ns_id(), project.id, &index.name)
            .await?;

        if let Err(err) = self.search.drop_index(index.store_index_name()).await {
            if !err.is_not_found() {
                return Err(err.into());
            }
        }
        Ok(())
    }

    // =========================================================================
    // Caches
    // =========================================================================

    /// Registers a cache name on the project metadata.
    pub async fn create_cache(&self, tx: &mut Tx, project: &str, cache: &str) -> ApiResult<()> {
        let proj = self.get_project(project)?;
        let mut metadata = self
            .namespace_store
            .get_project_metadata(tx, self.ns_id(), project)
            .await?
            .unwrap_or(ProjectMetadata { id: proj.id, ..Default::default() });
        if metadata.caches_metadata.iter().any(|md| md.name == cache) {
            return Err(MetadataError::CacheExists { cache: cache.to_owned() }.into());
        }
        metadata.caches_metadata.push(CacheMetadata {
            name: cache.to_owned(),
            creator: None,
            created_at: Timestamp::now().unix_nanos(),
        });
        self.namespace_store
            .update_project_metadata(tx, self.ns_id(), project, &metadata)
            .await
    }

    pub async fn list_caches(&self, tx: &mut Tx, project: &str) -> ApiResult<Vec<String>> {
        let metadata = self
            .namespace_store
            .get_project_metadata(tx, self.ns_id(), project)
            .await?;
        Ok(metadata
            .map(|md| md.caches_metadata.into_iter().map(|c| c.name).collect())
            .unwrap_or_default())
    }

    pub async fn delete_cache(&self, tx: &mut Tx, project: &str, cache: &str) -> ApiResult<()> {
        let Some(mut metadata) = self
            .namespace_store
            .get_project_metadata(tx, self.ns_id(), project)
            .await?
        else {
            return Err(MetadataError::CacheNotFound { cache: cache.to_owned() }.into());
        };
        let before = metadata.caches_metadata.len();
        metadata.caches_metadata.retain(|md| md.name != cache);
        if metadata.caches_metadata.len() == before {
            return Err(MetadataError::CacheNotFound { cache: cache.to_owned() }.into());
        }
        self.namespace_store
            .update_project_metadata(tx, self.ns_id(), project, &metadata)
            .await
    }

    // =========================================================================
    // Sizes
    // =========================================================================

    /// Approximate on-disk size of all rows of this tenant.
    pub async fn size(&self) -> ApiResult<i64> {
        let prefix = self.encoder.encode_table_name(self.ns_id(), None, None);
        self.kv.table_size(&prefix).await.map_err(ApiError::from)
    }

    pub async fn database_size(&self, database: &Database) -> ApiResult<i64> {
        let prefix = self.encoder.encode_table_name(self.ns_id(), Some(database.id), None);
        self.kv.table_size(&prefix).await.map_err(ApiError::from)
    }

    pub async fn collection_size(
        &self,
        database: &Database,
        collection: &DefaultCollection,
    ) -> ApiResult<i64> {
        let prefix = self.encoder.encode_table_name(
            self.ns_id(),
            Some(database.id),
            Some(collection.id),
        );
        self.kv.table_size(&prefix).await.map_err(ApiError::from)
    }
}

/// Builds a fully formed collection from its stored pieces.
fn build_collection(
    id: u32,
    name: &str,
    schemas: &[SchemaRecord],
    idx_name_to_id: &HashMap<String, u32>,
    search_collection_name: &str,
    fields_in_search: &[lodestone_schema::SearchField],
) -> ApiResult<DefaultCollection> {
    let latest = schemas.last().ok_or_else(|| ApiError::internal("no schema versions"))?;
    let mut factory = Factory::build(name, &latest.schema)?;

    let idx_id = idx_name_to_id.get(&factory.primary_key.name).ok_or_else(|| {
        ApiError::not_found(format!(
            "dictionary encoding is missing for index '{}'",
            factory.primary_key.name
        ))
    })?;
    factory.primary_key.id = lodestone_types::IndexId::new(*idx_id);

    let versions: Vec<SchemaVersion> = schemas
        .iter()
        .map(|record| SchemaVersion { version: record.version, schema: record.schema.clone() })
        .collect();

    let implicit =
        ImplicitSearchIndex::new(name, search_collection_name, &factory, fields_in_search);
    DefaultCollection::new(
        CollectionId::new(id),
        latest.version,
        &factory,
        Some(versions),
        implicit,
    )
}

fn schemas_equal(a: &[u8], b: &[u8]) -> ApiResult<bool> {
    let left: serde_json::Value = serde_json::from_slice(a)
        .map_err(|e| ApiError::invalid_argument(format!("schema is not valid JSON: {e}")))?;
    let right: serde_json::Value = serde_json::from_slice(b)
        .map_err(|e| ApiError::invalid_argument(format!("schema is not valid JSON: {e}")))?;
    Ok(left == right)
}

/// Process-wide registry of tenants.
pub struct TenantManager {
    kv: Arc<dyn KvStore>,
    search: Arc<dyn SearchStore>,
    registry: Arc<NameRegistry>,
    tx_manager: TxManager,
    dict: Dictionary,
    versions: VersionHandler,
    encoder: Encoder,
    options: MetadataOptions,
    tenants: RwLock<HashMap<String, Arc<Tenant>>>,
    id_to_tenant: RwLock<HashMap<u32, String>>,
}

impl TenantManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        search: Arc<dyn SearchStore>,
        registry: Arc<NameRegistry>,
        options: MetadataOptions,
    ) -> Self {
        Self {
            tx_manager: TxManager::new(Arc::clone(&kv), Arc::clone(&registry)),
            dict: Dictionary::new(&registry),
            versions: VersionHandler::new(&registry),
            encoder: Encoder::new(),
            kv,
            search,
            registry,
            options,
            tenants: RwLock::new(HashMap::new()),
            id_to_tenant: RwLock::new(HashMap::new()),
        }
    }

    pub fn encoder(&self) -> Encoder {
        self.encoder
    }

    pub fn tx_manager(&self) -> &TxManager {
        &self.tx_manager
    }

    /// Makes sure the default namespace exists; called at boot.
    pub async fn ensure_default_namespace(&self) -> ApiResult<Arc<Tenant>> {
        self.create_or_get_tenant(NamespaceMetadata::new(
            lodestone_types::DEFAULT_NAMESPACE_ID,
            lodestone_types::DEFAULT_NAMESPACE_NAME,
            lodestone_types::DEFAULT_NAMESPACE_NAME,
        ))
        .await
    }

    /// Returns the cached tenant, creating and persisting the namespace
    /// on first call. Concurrent creators on other workers resolve by
    /// duplicate-key retries.
    pub async fn create_or_get_tenant(
        &self,
        namespace: NamespaceMetadata,
    ) -> ApiResult<Arc<Tenant>> {
        if let Some(tenant) = self.tenants.read().get(&namespace.str_id) {
            if tenant.namespace.id == namespace.id {
                return Ok(Arc::clone(tenant));
            }
            return Err(ApiError::invalid_argument(format!(
                "id is already assigned to str_id='{}'",
                tenant.namespace.str_id
            )));
        }

        let mut tx = self.tx_manager.start_tx().await.map_err(ApiError::from)?;
        let namespaces = self.dict.get_namespaces(&mut tx).await?;

        let tenant = if namespaces.contains_key(&namespace.str_id) {
            let version = self.versions.read(tx.kv()).await.map_err(ApiError::from)?;
            let indexes = self.search.all_indexes().await.map_err(ApiError::from)?;
            let indexes: HashMap<String, StoreSchema> =
                indexes.into_iter().map(|s| (s.name.clone(), s)).collect();
            let tenant = Arc::new(Tenant::new(
                namespace,
                Arc::clone(&self.kv),
                Arc::clone(&self.search),
                &self.registry,
                self.options,
                version,
            ));
            tenant.reload(&mut tx, version, &indexes).await?;
            tenant
        } else {
            debug!(tenant = %namespace.str_id, "tenant not found, creating");
            let str_id = namespace.str_id.clone();
            self.dict
                .reserve_namespace(&mut tx, &str_id, namespace.clone())
                .await?;
            Arc::new(Tenant::new(
                namespace,
                Arc::clone(&self.kv),
                Arc::clone(&self.search),
                &self.registry,
                self.options,
                0,
            ))
        };

        tx.commit().await.map_err(ApiError::from)?;

        let mut tenants = self.tenants.write();
        let entry = tenants
            .entry(tenant.namespace.str_id.clone())
            .or_insert_with(|| Arc::clone(&tenant));
        self.id_to_tenant
            .write()
            .insert(entry.namespace.id, entry.namespace.str_id.clone());
        Ok(Arc::clone(entry))
    }

    /// Returns the cached tenant by namespace name.
    pub fn get_tenant(&self, name: &str) -> Option<Arc<Tenant>> {
        self.tenants.read().get(name).cloned()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.tenants.read().keys().cloned().collect()
    }

    /// Reads the current global metadata version inside the transaction.
    pub async fn metadata_version(&self, tx: &mut Tx) -> ApiResult<Version> {
        self.versions.read(tx.kv()).await.map_err(ApiError::from)
    }

    /// Resolves an encoded table name back to the owning tenant and the
    /// collection. Stale events after a drop resolve to `None`.
    pub fn lookup_collection(
        &self,
        table: &[u8],
    ) -> Option<(Arc<Tenant>, DefaultCollection)> {
        let (ns, db, coll) = self.encoder.decode_table_name(table)?;
        let tenant_name = self.id_to_tenant.read().get(&ns.value())?.clone();
        let tenant = self.get_tenant(&tenant_name)?;

        let state = tenant.state.read();
        let (project, persisted) = state.id_to_database.get(&db.value())?.clone();
        let project = state.projects.get(&project)?;
        let database = if persisted == project.name {
            &project.database
        } else {
            project.branches.get(&persisted)?
        };
        let coll_name = database.collection_name_by_id(coll.value())?;
        let collection = database.get_collection(coll_name)?.clone();
        drop(state);
        Some((tenant, collection))
    }
}
