//! Row iterators over the transactional store.
//!
//! Four shapes, matching the reader options the streaming runner
//! resolves: exact-key multi-get, open-ended scan from a key, full-table
//! scan, and a filtering wrapper dropping non-matching rows at read
//! time.

use async_trait::async_trait;
use lodestone_kv::{Key, KvError, KvIterator};
use lodestone_metadata::Tx;
use lodestone_query::WrappedFilter;
use lodestone_types::{ApiError, TableData};
use serde_json::{Map, Value};

/// One row produced by an iterator.
#[derive(Debug, Clone)]
pub struct Row {
    /// Full encoded key; doubles as the resume token.
    pub key: Vec<u8>,
    pub data: TableData,
}

/// Why an iteration stopped early.
#[derive(Debug)]
pub enum IterationError {
    /// The transaction hit the engine's duration cap. Streaming readers
    /// recover by restarting from the last emitted key.
    TransactionLimit,
    Other(ApiError),
}

impl From<KvError> for IterationError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::TransactionMaxDurationReached => IterationError::TransactionLimit,
            other => IterationError::Other(other.into()),
        }
    }
}

impl From<ApiError> for IterationError {
    fn from(err: ApiError) -> Self {
        IterationError::Other(err)
    }
}

impl From<IterationError> for ApiError {
    fn from(err: IterationError) -> Self {
        match err {
            IterationError::TransactionLimit => KvError::TransactionMaxDurationReached.into(),
            IterationError::Other(err) => err,
        }
    }
}

/// Pull-based row iterator.
#[async_trait]
pub trait RowIterator: Send {
    async fn next(&mut self) -> Result<Option<Row>, IterationError>;
}

/// Builds iterators over one transaction.
pub struct DatabaseReader<'a> {
    tx: &'a mut Tx,
}

impl<'a> DatabaseReader<'a> {
    pub fn new(tx: &'a mut Tx) -> Self {
        Self { tx }
    }

    /// Multi-get by exact primary keys, in the given order.
    pub async fn key_iterator(
        &mut self,
        keys: Vec<Key>,
    ) -> Result<Box<dyn RowIterator>, IterationError> {
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(data) = self.tx.get(&key).await? {
                rows.push(Row { key: key.raw().to_vec(), data });
            }
        }
        Ok(Box::new(KeyIterator { rows, pos: 0 }))
    }

    /// Forward scan from `from` (inclusive) to the end of its table.
    pub async fn scan_iterator(
        &mut self,
        from: &Key,
    ) -> Result<Box<dyn RowIterator>, IterationError> {
        let inner = self.tx.scan(from).await?;
        Ok(Box::new(ScanIterator { inner }))
    }

    /// Full-table forward scan.
    pub async fn scan_table(
        &mut self,
        table: &[u8],
    ) -> Result<Box<dyn RowIterator>, IterationError> {
        self.scan_iterator(&Key::table_root(table.to_vec())).await
    }

    /// Wraps an iterator, dropping rows the filter rejects.
    pub fn filtered_read(
        inner: Box<dyn RowIterator>,
        filter: WrappedFilter,
    ) -> Box<dyn RowIterator> {
        Box::new(FilteredReadIterator { inner, filter })
    }
}

struct KeyIterator {
    rows: Vec<Row>,
    pos: usize,
}

#[async_trait]
impl RowIterator for KeyIterator {
    async fn next(&mut self) -> Result<Option<Row>, IterationError> {
        let row = self.rows.get(self.pos).cloned();
        self.pos += 1;
        Ok(row)
    }
}

struct ScanIterator {
    inner: Box<dyn KvIterator>,
}

#[async_trait]
impl RowIterator for ScanIterator {
    async fn next(&mut self) -> Result<Option<Row>, IterationError> {
        match self.inner.next().await? {
            Some(pair) => Ok(Some(Row { key: pair.key, data: pair.data })),
            None => Ok(None),
        }
    }
}

struct FilteredReadIterator {
    inner: Box<dyn RowIterator>,
    filter: WrappedFilter,
}

#[async_trait]
impl RowIterator for FilteredReadIterator {
    async fn next(&mut self) -> Result<Option<Row>, IterationError> {
        while let Some(row) = self.inner.next().await? {
            let doc: Map<String, Value> = serde_json::from_slice(&row.data.raw)
                .map_err(|e| KvError::Corruption { message: e.to_string() })?;
            if self.filter.matches(&doc) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lodestone_kv::{KvStore, MemoryKvStore};
    use lodestone_metadata::{NameRegistry, TxManager};
    use lodestone_query::FilterFactory;
    use lodestone_schema::Factory;
    use lodestone_types::Timestamp;

    use super::*;

    fn key(table: &[u8], suffix: &[u8]) -> Key {
        let mut raw = table.to_vec();
        raw.extend_from_slice(suffix);
        Key::new(table.to_vec(), raw)
    }

    fn row(doc: &str) -> TableData {
        TableData::new(Timestamp::now(), doc.as_bytes().to_vec())
    }

    async fn seeded() -> (TxManager, Vec<Key>) {
        let kv = Arc::new(MemoryKvStore::new());
        let manager = TxManager::new(kv, Arc::new(NameRegistry::default()));
        let keys: Vec<Key> = [b"a" as &[u8], b"b", b"c"]
            .iter()
            .map(|suffix| key(b"tbl1", suffix))
            .collect();

        let mut tx = manager.start_tx().await.expect("start");
        for (i, k) in keys.iter().enumerate() {
            tx.insert(k, row(&format!(r#"{{"n": {i}}}"#))).await.expect("insert");
        }
        tx.commit().await.expect("commit");
        (manager, keys)
    }

    #[tokio::test]
    async fn test_key_iterator_skips_missing() {
        let (manager, keys) = seeded().await;
        let mut tx = manager.start_tx().await.expect("start");
        let mut reader = DatabaseReader::new(&mut tx);

        let wanted = vec![keys[2].clone(), key(b"tbl1", b"missing"), keys[0].clone()];
        let mut iter = reader.key_iterator(wanted).await.expect("iterator");

        let first = iter.next().await.expect("next").expect("row");
        assert_eq!(first.data.raw, br#"{"n": 2}"#);
        let second = iter.next().await.expect("next").expect("row");
        assert_eq!(second.data.raw, br#"{"n": 0}"#);
        assert!(iter.next().await.expect("next").is_none());
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_scan_table_is_key_ordered() {
        let (manager, _) = seeded().await;
        let mut tx = manager.start_tx().await.expect("start");
        let mut reader = DatabaseReader::new(&mut tx);

        let mut iter = reader.scan_table(b"tbl1").await.expect("iterator");
        let mut keys = Vec::new();
        while let Some(row) = iter.next().await.expect("next") {
            keys.push(row.key);
        }
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 3);
        tx.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn test_filtered_read() {
        let (manager, _) = seeded().await;
        let schema = Factory::build(
            "t",
            br#"{"title": "t", "properties": {"n": {"type": "integer"}}, "primary_key": ["n"]}"#,
        )
        .expect("schema");
        let filter = FilterFactory::new(schema.queryable_fields())
            .wrapped(br#"{"n": {"$gte": 1}}"#)
            .expect("filter");

        let mut tx = manager.start_tx().await.expect("start");
        let mut reader = DatabaseReader::new(&mut tx);
        let inner = reader.scan_table(b"tbl1").await.expect("iterator");
        let mut iter = DatabaseReader::filtered_read(inner, filter);

        let mut count = 0;
        while let Some(row) = iter.next().await.expect("next") {
            assert_ne!(row.data.raw, br#"{"n": 0}"#);
            count += 1;
        }
        assert_eq!(count, 2);
        tx.rollback().await.expect("rollback");
    }
}
