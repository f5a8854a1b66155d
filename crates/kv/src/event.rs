//! Per-transaction event log.
//!
//! Every write staged in a transaction appends an event. On successful
//! commit the session hands the ordered event list to post-commit
//! listeners (the search indexer); on rollback the list is discarded.

use lodestone_types::TableData;

/// The kind of write that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    Insert,
    Replace,
    Update,
    Delete,
}

/// A single staged write, in commit order.
#[derive(Debug, Clone)]
pub struct TxEvent {
    pub op: EventOp,
    /// Encoded table prefix the key belongs to.
    pub table: Vec<u8>,
    /// Full encoded key, including the table prefix.
    pub key: Vec<u8>,
    /// Row payload for inserts/replaces/updates; absent for deletes.
    pub data: Option<TableData>,
}

impl TxEvent {
    pub fn new(op: EventOp, table: &[u8], key: &[u8], data: Option<TableData>) -> Self {
        Self { op, table: table.to_vec(), key: key.to_vec(), data }
    }
}
