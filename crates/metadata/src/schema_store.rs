//! Versioned schema storage.
//!
//! Collection schemas are keyed by `(ns, db, collection, version)`;
//! explicit search-index schemas by `(ns, project, index_name, version)`.
//! Versions are written exactly once and read back in ascending order,
//! which the on-read row upgrade relies on.

use lodestone_types::{ApiError, ApiResult, KeyPart, NamespaceId};

use crate::registry::NameRegistry;
use crate::session::Tx;
use crate::subspace::{scan_prefix, subspace_key};

/// One stored schema revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRecord {
    pub version: i32,
    pub schema: Vec<u8>,
}

/// Collection schema subspace.
#[derive(Debug, Clone)]
pub struct SchemaSubspace {
    table: Vec<u8>,
}

impl SchemaSubspace {
    pub fn new(registry: &NameRegistry) -> Self {
        Self { table: registry.schema_subspace() }
    }

    /// Persists one schema revision. The `(collection, version)` pair
    /// must be fresh.
    pub async fn put(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        db: u32,
        coll: u32,
        schema: &[u8],
        version: i32,
    ) -> ApiResult<()> {
        if version <= 0 {
            return Err(ApiError::invalid_argument(format!(
                "invalid schema version {version}"
            )));
        }
        if schema.is_empty() {
            return Err(ApiError::invalid_argument("empty schema"));
        }
        let key = subspace_key(&self.table, &parts(ns, db, coll, Some(version)));
        let value = crate::subspace::encode_value(&schema.to_vec()).map_err(ApiError::from)?;
        tx.insert(&key, value).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(())
    }

    /// The highest stored revision, if any.
    pub async fn get_latest(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        db: u32,
        coll: u32,
    ) -> ApiResult<Option<SchemaRecord>> {
        Ok(self.get(tx, ns, db, coll).await?.pop())
    }

    /// All revisions in ascending version order.
    pub async fn get(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        db: u32,
        coll: u32,
    ) -> ApiResult<Vec<SchemaRecord>> {
        let rows = scan_prefix(tx, &self.table, &parts(ns, db, coll, None))
            .await
            .map_err(ApiError::from)?;
        let mut records = Vec::with_capacity(rows.len());
        for (raw, data) in rows {
            let suffix = &raw[self.table.len()..];
            let key_parts = crate::encoder::decode_parts(suffix)?;
            let Some(KeyPart::Integer(version)) = key_parts.last() else {
                return Err(ApiError::internal("malformed schema key"));
            };
            let schema: Vec<u8> =
                crate::subspace::decode_value(&data).map_err(ApiError::from)?;
            records.push(SchemaRecord { version: *version as i32, schema });
        }
        Ok(records)
    }

    /// Removes every revision of a collection.
    pub async fn delete(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        db: u32,
        coll: u32,
    ) -> ApiResult<()> {
        let rows = scan_prefix(tx, &self.table, &parts(ns, db, coll, None))
            .await
            .map_err(ApiError::from)?;
        for (raw, _) in rows {
            let key = lodestone_kv::Key::from_raw(&self.table, raw);
            tx.delete(&key).await.map_err(ApiError::from)?;
        }
        tx.mark_metadata_changed();
        Ok(())
    }
}

/// Explicit search-index schema subspace.
#[derive(Debug, Clone)]
pub struct SearchSchemaSubspace {
    table: Vec<u8>,
}

impl SearchSchemaSubspace {
    pub fn new(registry: &NameRegistry) -> Self {
        Self { table: registry.search_schema_subspace() }
    }

    pub async fn put(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        project: u32,
        index_name: &str,
        schema: &[u8],
        version: i32,
    ) -> ApiResult<()> {
        if version <= 0 {
            return Err(ApiError::invalid_argument(format!(
                "invalid schema version {version}"
            )));
        }
        if schema.is_empty() {
            return Err(ApiError::invalid_argument("empty schema"));
        }
        let key = subspace_key(&self.table, &search_parts(ns, project, index_name, Some(version)));
        let value = crate::subspace::encode_value(&schema.to_vec()).map_err(ApiError::from)?;
        tx.insert(&key, value).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(())
    }

    pub async fn get_latest(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        project: u32,
        index_name: &str,
    ) -> ApiResult<Option<SchemaRecord>> {
        let rows = scan_prefix(tx, &self.table, &search_parts(ns, project, index_name, None))
            .await
            .map_err(ApiError::from)?;
        let Some((raw, data)) = rows.into_iter().last() else {
            return Ok(None);
        };
        let suffix = &raw[self.table.len()..];
        let key_parts = crate::encoder::decode_parts(suffix)?;
        let Some(KeyPart::Integer(version)) = key_parts.last() else {
            return Err(ApiError::internal("malformed search schema key"));
        };
        let schema: Vec<u8> = crate::subspace::decode_value(&data).map_err(ApiError::from)?;
        Ok(Some(SchemaRecord { version: *version as i32, schema }))
    }

    pub async fn delete(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        project: u32,
        index_name: &str,
    ) -> ApiResult<()> {
        let rows = scan_prefix(tx, &self.table, &search_parts(ns, project, index_name, None))
            .await
            .map_err(ApiError::from)?;
        for (raw, _) in rows {
            let key = lodestone_kv::Key::from_raw(&self.table, raw);
            tx.delete(&key).await.map_err(ApiError::from)?;
        }
        tx.mark_metadata_changed();
        Ok(())
    }
}

fn parts(ns: NamespaceId, db: u32, coll: u32, version: Option<i32>) -> Vec<KeyPart> {
    let mut parts = vec![
        KeyPart::Integer(i64::from(ns.value())),
        KeyPart::Integer(i64::from(db)),
        KeyPart::Integer(i64::from(coll)),
    ];
    if let Some(version) = version {
        parts.push(KeyPart::Integer(i64::from(version)));
    }
    parts
}

fn search_parts(
    ns: NamespaceId,
    project: u32,
    index_name: &str,
    version: Option<i32>,
) -> Vec<KeyPart> {
    let mut parts = vec![
        KeyPart::Integer(i64::from(ns.value())),
        KeyPart::Integer(i64::from(project)),
        KeyPart::from(index_name),
    ];
    if let Some(version) = version {
        parts.push(KeyPart::Integer(i64::from(version)));
    }
    parts
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lodestone_kv::MemoryKvStore;
    use lodestone_types::ErrorCode;

    use super::*;
    use crate::session::TxManager;

    fn fixtures() -> (TxManager, SchemaSubspace) {
        let registry = Arc::new(NameRegistry::default());
        let manager = TxManager::new(Arc::new(MemoryKvStore::new()), Arc::clone(&registry));
        (manager, SchemaSubspace::new(&registry))
    }

    const NS: NamespaceId = NamespaceId::new(1);

    #[tokio::test]
    async fn test_put_rejects_bad_input() {
        let (manager, store) = fixtures();
        let mut tx = manager.start_tx().await.expect("start");

        let err = store.put(&mut tx, NS, 2, 3, b"{}", 0).await.expect_err("version 0");
        assert_eq!(err.to_string(), "invalid schema version 0");

        let err = store.put(&mut tx, NS, 2, 3, b"", 1).await.expect_err("empty");
        assert_eq!(err.to_string(), "empty schema");
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_put_duplicate_version() {
        let (manager, store) = fixtures();
        let mut tx = manager.start_tx().await.expect("start");

        store.put(&mut tx, NS, 2, 3, br#"{"title": "s1"}"#, 1).await.expect("put");
        let err = store
            .put(&mut tx, NS, 2, 3, br#"{"title": "s1"}"#, 1)
            .await
            .expect_err("duplicate");
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_put_get_multiple_versions() {
        let (manager, store) = fixtures();
        let mut tx = manager.start_tx().await.expect("start");

        store.put(&mut tx, NS, 2, 3, b"schema-v1", 1).await.expect("put");
        store.put(&mut tx, NS, 2, 3, b"schema-v2", 2).await.expect("put");

        let latest = store.get_latest(&mut tx, NS, 2, 3).await.expect("latest").expect("some");
        assert_eq!(latest.version, 2);
        assert_eq!(latest.schema, b"schema-v2");

        let all = store.get(&mut tx, NS, 2, 3).await.expect("all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].version, 1);
        assert_eq!(all[1].version, 2);
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_delete_removes_all_versions() {
        let (manager, store) = fixtures();

        let mut tx = manager.start_tx().await.expect("start");
        store.put(&mut tx, NS, 2, 3, b"schema-v1", 1).await.expect("put");
        store.put(&mut tx, NS, 2, 3, b"schema-v2", 2).await.expect("put");
        tx.commit().await.expect("commit");

        let mut tx = manager.start_tx().await.expect("start");
        store.delete(&mut tx, NS, 2, 3).await.expect("delete");
        tx.commit().await.expect("commit");

        let mut tx = manager.start_tx().await.expect("start");
        assert!(store.get(&mut tx, NS, 2, 3).await.expect("get").is_empty());
        assert!(store.get_latest(&mut tx, NS, 2, 3).await.expect("latest").is_none());
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let (manager, store) = fixtures();
        let mut tx = manager.start_tx().await.expect("start");

        store.put(&mut tx, NS, 2, 3, b"one", 1).await.expect("put");
        store.put(&mut tx, NS, 2, 4, b"two", 1).await.expect("put");

        let first = store.get(&mut tx, NS, 2, 3).await.expect("get");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].schema, b"one");
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_search_schema_subspace() {
        let registry = Arc::new(NameRegistry::default());
        let manager = TxManager::new(Arc::new(MemoryKvStore::new()), Arc::clone(&registry));
        let store = SearchSchemaSubspace::new(&registry);

        let mut tx = manager.start_tx().await.expect("start");
        store.put(&mut tx, NS, 7, "idx", b"v1", 1).await.expect("put");
        store.put(&mut tx, NS, 7, "idx", b"v2", 2).await.expect("put");

        let latest =
            store.get_latest(&mut tx, NS, 7, "idx").await.expect("latest").expect("some");
        assert_eq!(latest.version, 2);

        store.delete(&mut tx, NS, 7, "idx").await.expect("delete");
        assert!(store.get_latest(&mut tx, NS, 7, "idx").await.expect("latest").is_none());
        tx.rollback().await.expect("rollback");
    }
}
