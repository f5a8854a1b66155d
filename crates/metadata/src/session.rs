//! Transaction sessions.
//!
//! A [`Tx`] wraps one key-value transaction and carries the DDL staging
//! slot: runners that mutate metadata clone the target database, work on
//! the clone, and stage it here. Commit bumps the global metadata
//! version when any metadata changed, which forces other workers to
//! reload their cached tenant state before the next access.

use std::sync::Arc;

use lodestone_kv::{Key, KvIterator, KvStore, KvTx, Result, TxEvent};
use lodestone_types::TableData;

use crate::registry::NameRegistry;
use crate::tenant::Database;
use crate::version::VersionHandler;

/// Creates sessions over the key-value store.
#[derive(Clone)]
pub struct TxManager {
    kv: Arc<dyn KvStore>,
    registry: Arc<NameRegistry>,
}

impl TxManager {
    pub fn new(kv: Arc<dyn KvStore>, registry: Arc<NameRegistry>) -> Self {
        Self { kv, registry }
    }

    /// Starts a new transaction session.
    pub async fn start_tx(&self) -> Result<Tx> {
        let inner = self.kv.begin().await?;
        Ok(Tx {
            inner,
            versions: VersionHandler::new(&self.registry),
            staged: None,
            metadata_changed: false,
        })
    }
}

/// One transaction, with the staged-DDL slot and the event log.
pub struct Tx {
    inner: Box<dyn KvTx>,
    versions: VersionHandler,
    staged: Option<Database>,
    metadata_changed: bool,
}

impl Tx {
    pub async fn insert(&mut self, key: &Key, data: TableData) -> Result<()> {
        self.inner.insert(key, data).await
    }

    pub async fn replace(&mut self, key: &Key, data: TableData, is_update: bool) -> Result<()> {
        self.inner.replace(key, data, is_update).await
    }

    pub async fn delete(&mut self, key: &Key) -> Result<()> {
        self.inner.delete(key).await
    }

    pub async fn get(&mut self, key: &Key) -> Result<Option<TableData>> {
        self.inner.get(key).await
    }

    pub async fn scan(&mut self, from: &Key) -> Result<Box<dyn KvIterator>> {
        self.inner.scan(from).await
    }

    /// Raw access for components that take `&mut dyn KvTx`.
    pub fn kv(&mut self) -> &mut dyn KvTx {
        self.inner.as_mut()
    }

    /// Publishes a cloned database for the rest of this transaction.
    /// Later operations in the same request observe the staged clone
    /// instead of the cached one.
    pub fn stage_database(&mut self, db: Database) {
        self.staged = Some(db);
    }

    pub fn staged_database(&self) -> Option<&Database> {
        self.staged.as_ref()
    }

    pub fn staged_database_mut(&mut self) -> Option<&mut Database> {
        self.staged.as_mut()
    }

    /// Records that metadata changed; commit will bump the global
    /// version.
    pub fn mark_metadata_changed(&mut self) {
        self.metadata_changed = true;
    }

    pub fn metadata_changed(&self) -> bool {
        self.metadata_changed
    }

    /// Commits the staged writes. When metadata changed, the global
    /// version is bumped inside the same transaction, making the bump
    /// and the DDL atomically visible. Returns the event log for
    /// post-commit listeners.
    pub async fn commit(mut self) -> Result<Vec<TxEvent>> {
        if self.metadata_changed {
            self.versions.increment(self.inner.as_mut()).await?;
        }
        self.inner.commit().await
    }

    /// Discards staged writes, events, and the staged database.
    pub async fn rollback(self) -> Result<()> {
        self.inner.rollback().await
    }
}
