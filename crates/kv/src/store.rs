//! Store and transaction traits.
//!
//! The contract assumed from the production engine:
//! - snapshot isolation per transaction
//! - a hard cap on transaction duration (5 seconds), surfaced as
//!   [`KvError::TransactionMaxDurationReached`](crate::KvError::TransactionMaxDurationReached)
//! - lexicographically ordered key-range scans

use async_trait::async_trait;
use lodestone_types::TableData;

use crate::{Result, TxEvent};

/// A fully encoded row key, carrying the table prefix it belongs to so
/// that events and scans can be attributed back to a collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    table: Vec<u8>,
    raw: Vec<u8>,
}

impl Key {
    /// Builds a key from its table prefix and full encoded bytes. The raw
    /// bytes must start with the table prefix.
    pub fn new(table: Vec<u8>, raw: Vec<u8>) -> Self {
        debug_assert!(raw.starts_with(&table));
        Self { table, raw }
    }

    /// A key addressing the whole table (prefix scans).
    pub fn table_root(table: Vec<u8>) -> Self {
        Self { raw: table.clone(), table }
    }

    /// Rebuilds a key from the raw bytes of a previously emitted key, e.g.
    /// a resume token.
    pub fn from_raw(table: &[u8], raw: Vec<u8>) -> Self {
        Self { table: table.to_vec(), raw }
    }

    pub fn table(&self) -> &[u8] {
        &self.table
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// A row produced by a scan or read.
#[derive(Debug, Clone)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub data: TableData,
}

/// Pull-based iterator over ordered rows.
///
/// `next` returns `Ok(None)` at the end of the range and an error if the
/// transaction was interrupted (duration limit, conflict).
#[async_trait]
pub trait KvIterator: Send {
    async fn next(&mut self) -> Result<Option<KvPair>>;
}

/// Handle to the transactional engine.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Starts a new snapshot-isolated transaction.
    async fn begin(&self) -> Result<Box<dyn KvTx>>;

    /// Deletes every key under the given prefix, outside any transaction.
    async fn drop_table(&self, table: &[u8]) -> Result<()>;

    /// Approximate on-disk size of all rows under the given prefix.
    async fn table_size(&self, prefix: &[u8]) -> Result<i64>;
}

/// A single transaction. Writes are buffered until `commit`; the event
/// log is returned to the caller on success.
#[async_trait]
pub trait KvTx: Send {
    /// Stages an insert; fails with `DuplicateKey` if the key exists.
    async fn insert(&mut self, key: &Key, data: TableData) -> Result<()>;

    /// Stages a blind write. `is_update` only affects how the event is
    /// classified for post-commit listeners.
    async fn replace(&mut self, key: &Key, data: TableData, is_update: bool) -> Result<()>;

    /// Stages a delete. Deleting a missing key is not an error.
    async fn delete(&mut self, key: &Key) -> Result<()>;

    /// Point read, observing the transaction's own staged writes.
    async fn get(&mut self, key: &Key) -> Result<Option<TableData>>;

    /// Ordered scan of all keys with the key's raw bytes as inclusive
    /// lower bound, limited to the key's table prefix.
    async fn scan(&mut self, from: &Key) -> Result<Box<dyn KvIterator>>;

    /// Commits the staged writes and returns the event log in staging
    /// order.
    async fn commit(self: Box<Self>) -> Result<Vec<TxEvent>>;

    /// Discards all staged writes and events.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
