//! Per-project metadata blobs.
//!
//! Each project carries one metadata record listing its explicit search
//! indexes and caches. The record is written inside the same transaction
//! as the DDL touching it.

use lodestone_types::{ApiError, ApiResult, KeyPart, NamespaceId};
use serde::{Deserialize, Serialize};

use crate::registry::NameRegistry;
use crate::session::Tx;
use crate::subspace::{decode_value, encode_value, subspace_key};

const PROJECT_KIND: &str = "project";

/// Metadata of one explicit search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub name: String,
    pub creator: Option<String>,
    pub created_at: i64,
}

/// Metadata of one cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub name: String,
    pub creator: Option<String>,
    pub created_at: i64,
}

/// The persisted project metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Same id as the project's main database.
    pub id: u32,
    pub creator: Option<String>,
    pub created_at: i64,
    pub search_metadata: Vec<SearchMetadata>,
    pub caches_metadata: Vec<CacheMetadata>,
}

/// Store of project metadata records.
#[derive(Debug, Clone)]
pub struct NamespaceStore {
    table: Vec<u8>,
}

impl NamespaceStore {
    pub fn new(registry: &NameRegistry) -> Self {
        Self { table: registry.namespace_subspace() }
    }

    fn key(&self, ns: NamespaceId, project: &str) -> lodestone_kv::Key {
        subspace_key(
            &self.table,
            &[
                KeyPart::Integer(i64::from(ns.value())),
                KeyPart::from(PROJECT_KIND),
                KeyPart::from(project),
            ],
        )
    }

    pub async fn insert_project_metadata(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        project: &str,
        metadata: &ProjectMetadata,
    ) -> ApiResult<()> {
        let value = encode_value(metadata).map_err(ApiError::from)?;
        tx.insert(&self.key(ns, project), value).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(())
    }

    pub async fn update_project_metadata(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        project: &str,
        metadata: &ProjectMetadata,
    ) -> ApiResult<()> {
        let value = encode_value(metadata).map_err(ApiError::from)?;
        tx.replace(&self.key(ns, project), value, true).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(())
    }

    pub async fn get_project_metadata(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        project: &str,
    ) -> ApiResult<Option<ProjectMetadata>> {
        match tx.get(&self.key(ns, project)).await.map_err(ApiError::from)? {
            Some(data) => Ok(Some(decode_value(&data).map_err(ApiError::from)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_project_metadata(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        project: &str,
    ) -> ApiResult<()> {
        tx.delete(&self.key(ns, project)).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(())
    }
}
