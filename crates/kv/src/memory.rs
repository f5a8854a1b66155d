//! In-memory transactional engine.
//!
//! Backs tests and standalone serving. Transactions take a snapshot of
//! the committed state at begin time, buffer writes in an overlay, and
//! apply the overlay atomically on commit. Inserts staged against the
//! snapshot are re-checked against the committed state at commit time so
//! concurrent creators race the same way they do on the production
//! engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lodestone_types::TableData;
use parking_lot::RwLock;

use crate::store::{Key, KvIterator, KvPair, KvStore, KvTx};
use crate::{EventOp, KvError, Result, TxEvent};

/// The production engine's transaction duration cap.
const MAX_TX_DURATION: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Shared {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

/// In-memory [`KvStore`] implementation.
#[derive(Clone)]
pub struct MemoryKvStore {
    shared: Arc<Shared>,
    tx_duration_limit: Duration,
    /// When set, a transaction fails scans with
    /// `TransactionMaxDurationReached` after this many rows. Lets tests
    /// exercise transaction-lifetime stitching deterministically.
    txn_scan_budget: Option<usize>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            tx_duration_limit: MAX_TX_DURATION,
            txn_scan_budget: None,
        }
    }

    /// Overrides the transaction duration cap.
    pub fn with_tx_duration_limit(mut self, limit: Duration) -> Self {
        self.tx_duration_limit = limit;
        self
    }

    /// Fails scans after `rows` rows per transaction, standing in for the
    /// wall-clock duration cap in tests.
    pub fn with_txn_scan_budget(mut self, rows: usize) -> Self {
        self.txn_scan_budget = Some(rows);
        self
    }

    fn encode(data: &TableData) -> Result<Vec<u8>> {
        postcard::to_allocvec(data).map_err(|e| KvError::Serialization { message: e.to_string() })
    }

    fn decode(bytes: &[u8]) -> Result<TableData> {
        postcard::from_bytes(bytes).map_err(|e| KvError::Corruption { message: e.to_string() })
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn begin(&self) -> Result<Box<dyn KvTx>> {
        let snapshot = self.shared.data.read().clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            snapshot,
            overlay: BTreeMap::new(),
            events: Vec::new(),
            inserted: Vec::new(),
            started: Instant::now(),
            duration_limit: self.tx_duration_limit,
            scan_budget: self.txn_scan_budget,
            rows_scanned: Arc::new(AtomicUsize::new(0)),
        }))
    }

    async fn drop_table(&self, table: &[u8]) -> Result<()> {
        let mut data = self.shared.data.write();
        let doomed: Vec<Vec<u8>> = data
            .range(table.to_vec()..)
            .take_while(|(k, _)| k.starts_with(table))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            data.remove(&key);
        }
        Ok(())
    }

    async fn table_size(&self, prefix: &[u8]) -> Result<i64> {
        let data = self.shared.data.read();
        let size: usize = data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| k.len() + v.len())
            .sum();
        Ok(size as i64)
    }
}

struct MemoryTx {
    shared: Arc<Shared>,
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Staged writes: `Some` is an upsert, `None` a delete.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    events: Vec<TxEvent>,
    /// Keys staged via `insert`, re-checked for duplicates at commit.
    inserted: Vec<Vec<u8>>,
    started: Instant,
    duration_limit: Duration,
    scan_budget: Option<usize>,
    rows_scanned: Arc<AtomicUsize>,
}

impl MemoryTx {
    fn check_duration(&self) -> Result<()> {
        if self.started.elapsed() > self.duration_limit {
            return Err(KvError::TransactionMaxDurationReached);
        }
        Ok(())
    }

    fn visible(&self, key: &[u8]) -> Option<&Vec<u8>> {
        match self.overlay.get(key) {
            Some(Some(value)) => Some(value),
            Some(None) => None,
            None => self.snapshot.get(key),
        }
    }
}

#[async_trait]
impl KvTx for MemoryTx {
    async fn insert(&mut self, key: &Key, data: TableData) -> Result<()> {
        self.check_duration()?;
        if self.visible(key.raw()).is_some() {
            return Err(KvError::DuplicateKey);
        }
        let encoded = MemoryKvStore::encode(&data)?;
        self.overlay.insert(key.raw().to_vec(), Some(encoded));
        self.inserted.push(key.raw().to_vec());
        self.events.push(TxEvent::new(EventOp::Insert, key.table(), key.raw(), Some(data)));
        Ok(())
    }

    async fn replace(&mut self, key: &Key, data: TableData, is_update: bool) -> Result<()> {
        self.check_duration()?;
        let encoded = MemoryKvStore::encode(&data)?;
        self.overlay.insert(key.raw().to_vec(), Some(encoded));
        let op = if is_update { EventOp::Update } else { EventOp::Replace };
        self.events.push(TxEvent::new(op, key.table(), key.raw(), Some(data)));
        Ok(())
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.check_duration()?;
        self.overlay.insert(key.raw().to_vec(), None);
        self.events.push(TxEvent::new(EventOp::Delete, key.table(), key.raw(), None));
        Ok(())
    }

    async fn get(&mut self, key: &Key) -> Result<Option<TableData>> {
        self.check_duration()?;
        match self.visible(key.raw()) {
            Some(bytes) => Ok(Some(MemoryKvStore::decode(bytes)?)),
            None => Ok(None),
        }
    }

    async fn scan(&mut self, from: &Key) -> Result<Box<dyn KvIterator>> {
        self.check_duration()?;
        let table = from.table().to_vec();
        let lower = from.raw().to_vec();

        // Merge the snapshot with staged writes for read-your-writes scans.
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .snapshot
            .range(lower.clone()..)
            .take_while(|(k, _)| k.starts_with(&table))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in self.overlay.range(lower..) {
            if !k.starts_with(&table) {
                break;
            }
            match v {
                Some(value) => {
                    merged.insert(k.clone(), value.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }

        Ok(Box::new(MemoryIterator {
            rows: merged.into_iter().collect(),
            pos: 0,
            deadline: self.started + self.duration_limit,
            scan_budget: self.scan_budget,
            rows_scanned: Arc::clone(&self.rows_scanned),
        }))
    }

    async fn commit(mut self: Box<Self>) -> Result<Vec<TxEvent>> {
        self.check_duration()?;

        let mut data = self.shared.data.write();
        // Inserts staged against the snapshot lose to a concurrent commit.
        for key in &self.inserted {
            if data.contains_key(key) && !self.snapshot.contains_key(key) {
                return Err(KvError::DuplicateKey);
            }
        }
        for (key, value) in std::mem::take(&mut self.overlay) {
            match value {
                Some(bytes) => {
                    data.insert(key, bytes);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        Ok(std::mem::take(&mut self.events))
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.overlay.clear();
        self.events.clear();
        Ok(())
    }
}

struct MemoryIterator {
    rows: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    deadline: Instant,
    scan_budget: Option<usize>,
    rows_scanned: Arc<AtomicUsize>,
}

#[async_trait]
impl KvIterator for MemoryIterator {
    async fn next(&mut self) -> Result<Option<KvPair>> {
        if Instant::now() > self.deadline {
            return Err(KvError::TransactionMaxDurationReached);
        }
        if let Some(budget) = self.scan_budget {
            if self.rows_scanned.load(Ordering::Relaxed) >= budget {
                return Err(KvError::TransactionMaxDurationReached);
            }
        }
        match self.rows.get(self.pos) {
            Some((key, value)) => {
                self.pos += 1;
                self.rows_scanned.fetch_add(1, Ordering::Relaxed);
                Ok(Some(KvPair { key: key.clone(), data: MemoryKvStore::decode(value)? }))
            }
            None => Ok(None),
        }
    }
}
