//! Shared helpers for metadata subspaces.
//!
//! Metadata records live under reserved table prefixes with
//! tuple-encoded keys and postcard-encoded payloads wrapped in the
//! standard row envelope.

use lodestone_kv::{Key, KvError, Result};
use lodestone_types::{KeyPart, TableData, Timestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::encoder::encode_parts;
use crate::session::Tx;

/// Builds a key under a reserved subspace.
pub(crate) fn subspace_key(table: &[u8], parts: &[KeyPart]) -> Key {
    let mut raw = table.to_vec();
    raw.extend_from_slice(&encode_parts(parts));
    Key::from_raw(table, raw)
}

/// Wraps a metadata payload in the row envelope.
pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<TableData> {
    let raw = postcard::to_allocvec(value)
        .map_err(|e| KvError::Serialization { message: e.to_string() })?;
    Ok(TableData::new(Timestamp::now(), raw))
}

/// Unwraps a metadata payload.
pub(crate) fn decode_value<T: DeserializeOwned>(data: &TableData) -> Result<T> {
    postcard::from_bytes(&data.raw).map_err(|e| KvError::Corruption { message: e.to_string() })
}

/// Collects every row whose key starts with the tuple-encoded prefix,
/// in key order.
pub(crate) async fn scan_prefix(
    tx: &mut Tx,
    table: &[u8],
    parts: &[KeyPart],
) -> Result<Vec<(Vec<u8>, TableData)>> {
    let from = subspace_key(table, parts);
    let prefix = from.raw().to_vec();
    let mut iter = tx.scan(&from).await?;
    let mut rows = Vec::new();
    while let Some(pair) = iter.next().await? {
        if !pair.key.starts_with(&prefix) {
            break;
        }
        rows.push((pair.key, pair.data));
    }
    Ok(rows)
}
