//! Dictionary encoding of names to ids.
//!
//! Assigns dense, monotonically increasing 32-bit ids to databases,
//! collections, and indexes within a namespace, and reserves namespaces
//! cluster-wide. Dropping an entity rewrites its record as a tombstone
//! preserving the id; ids are never reused, a re-create allocates a
//! fresh one.
//!
//! Id allocation is transactional: the per-namespace counter is read and
//! rewritten inside the caller's transaction, so racing creators
//! conflict at commit and the loser retries.

use std::collections::HashMap;

use lodestone_types::{
    ApiError, ApiResult, KeyPart, NamespaceId, NamespaceMetadata, INVALID_ID,
};
use serde::{Deserialize, Serialize};

use crate::registry::NameRegistry;
use crate::session::Tx;
use crate::subspace::{decode_value, encode_value, scan_prefix, subspace_key};

const DB_KIND: &str = "db";
const COLL_KIND: &str = "coll";
const INDEX_KIND: &str = "idx";
const COUNTER_KEY: &str = "counter";
const NAMESPACE_KIND: &str = "namespace";

/// Lifecycle state of a dictionary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DictState {
    Active,
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DictEntry {
    id: u32,
    state: DictState,
}

/// The dictionary over the encoding and reserved subspaces.
#[derive(Debug, Clone)]
pub struct Dictionary {
    encoding: Vec<u8>,
    reserved: Vec<u8>,
    counters: Vec<u8>,
}

impl Dictionary {
    pub fn new(registry: &NameRegistry) -> Self {
        Self {
            encoding: registry.encoding_subspace(),
            reserved: registry.reserved_subspace(),
            counters: registry.counter_subspace(),
        }
    }

    // =========================================================================
    // Namespace reservation
    // =========================================================================

    /// Reserves a namespace name and id cluster-wide. Both must be
    /// unused.
    pub async fn reserve_namespace(
        &self,
        tx: &mut Tx,
        str_id: &str,
        metadata: NamespaceMetadata,
    ) -> ApiResult<()> {
        let namespaces = self.get_namespaces(tx).await?;
        if let Some(existing) = namespaces.get(str_id) {
            return Err(ApiError::already_exists(format!(
                "namespace with same name already exists with id '{}'",
                existing.id
            )));
        }
        for (name, existing) in &namespaces {
            if existing.id == metadata.id {
                return Err(ApiError::already_exists(format!(
                    "id is already assigned to the namespace '{name}'"
                )));
            }
        }

        let key = subspace_key(
            &self.reserved,
            &[KeyPart::from(NAMESPACE_KIND), KeyPart::from(str_id)],
        );
        let value = encode_value(&metadata).map_err(ApiError::from)?;
        tx.insert(&key, value).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(())
    }

    /// All reserved namespaces by name.
    pub async fn get_namespaces(
        &self,
        tx: &mut Tx,
    ) -> ApiResult<HashMap<String, NamespaceMetadata>> {
        let rows = scan_prefix(tx, &self.reserved, &[KeyPart::from(NAMESPACE_KIND)])
            .await
            .map_err(ApiError::from)?;
        let mut namespaces = HashMap::with_capacity(rows.len());
        for (_, data) in rows {
            let metadata: NamespaceMetadata = decode_value(&data).map_err(ApiError::from)?;
            namespaces.insert(metadata.str_id.clone(), metadata);
        }
        Ok(namespaces)
    }

    // =========================================================================
    // Id allocation
    // =========================================================================

    async fn allocate(&self, tx: &mut Tx, ns: NamespaceId) -> ApiResult<u32> {
        let key = subspace_key(
            &self.encoding,
            &[
                KeyPart::Integer(i64::from(ns.value())),
                KeyPart::from(COUNTER_KEY),
            ],
        );
        let current: u32 = match tx.get(&key).await.map_err(ApiError::from)? {
            Some(data) => decode_value(&data).map_err(ApiError::from)?,
            None => 0,
        };
        let next = current + 1;
        let value = encode_value(&next).map_err(ApiError::from)?;
        tx.replace(&key, value, false).await.map_err(ApiError::from)?;
        Ok(next)
    }

    async fn create_entry(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        parts: Vec<KeyPart>,
    ) -> ApiResult<u32> {
        let key = subspace_key(&self.encoding, &parts);
        if let Some(data) = tx.get(&key).await.map_err(ApiError::from)? {
            let entry: DictEntry = decode_value(&data).map_err(ApiError::from)?;
            if entry.state == DictState::Active {
                return Err(lodestone_kv::KvError::DuplicateKey.into());
            }
        }
        let id = self.allocate(tx, ns).await?;
        let value = encode_value(&DictEntry { id, state: DictState::Active })
            .map_err(ApiError::from)?;
        tx.replace(&key, value, false).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(id)
    }

    async fn drop_entry(&self, tx: &mut Tx, parts: Vec<KeyPart>, id: u32) -> ApiResult<()> {
        let key = subspace_key(&self.encoding, &parts);
        let Some(data) = tx.get(&key).await.map_err(ApiError::from)? else {
            return Err(ApiError::not_found("dictionary entry is missing"));
        };
        let entry: DictEntry = decode_value(&data).map_err(ApiError::from)?;
        if entry.state == DictState::Dropped {
            return Err(ApiError::not_found("dictionary entry is already dropped"));
        }
        if entry.id != id {
            return Err(ApiError::internal(format!(
                "dictionary id mismatch, stored {} passed {id}",
                entry.id
            )));
        }
        let value = encode_value(&DictEntry { id, state: DictState::Dropped })
            .map_err(ApiError::from)?;
        tx.replace(&key, value, true).await.map_err(ApiError::from)?;
        tx.mark_metadata_changed();
        Ok(())
    }

    async fn get_entry_id(&self, tx: &mut Tx, parts: Vec<KeyPart>) -> ApiResult<u32> {
        let key = subspace_key(&self.encoding, &parts);
        match tx.get(&key).await.map_err(ApiError::from)? {
            Some(data) => {
                let entry: DictEntry = decode_value(&data).map_err(ApiError::from)?;
                match entry.state {
                    DictState::Active => Ok(entry.id),
                    DictState::Dropped => Ok(INVALID_ID),
                }
            }
            None => Ok(INVALID_ID),
        }
    }

    async fn get_entries(
        &self,
        tx: &mut Tx,
        prefix: Vec<KeyPart>,
    ) -> ApiResult<HashMap<String, u32>> {
        let rows = scan_prefix(tx, &self.encoding, &prefix).await.map_err(ApiError::from)?;
        let mut out = HashMap::new();
        for (raw, data) in rows {
            let suffix = &raw[self.encoding.len()..];
            let parts = crate::encoder::decode_parts(suffix)?;
            let Some(KeyPart::String(name)) = parts.last() else {
                continue;
            };
            let entry: DictEntry = decode_value(&data).map_err(ApiError::from)?;
            if entry.state == DictState::Active {
                out.insert(name.clone(), entry.id);
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Databases
    // =========================================================================

    pub async fn create_database(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
    ) -> ApiResult<u32> {
        if ns.is_invalid() {
            return Err(ApiError::invalid_argument("invalid namespace id"));
        }
        self.create_entry(tx, ns, db_parts(ns, name)).await
    }

    pub async fn drop_database(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
        id: u32,
    ) -> ApiResult<()> {
        self.drop_entry(tx, db_parts(ns, name), id).await
    }

    pub async fn get_database_id(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
    ) -> ApiResult<u32> {
        self.get_entry_id(tx, db_parts(ns, name)).await
    }

    pub async fn get_databases(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
    ) -> ApiResult<HashMap<String, u32>> {
        self.get_entries(tx, vec![ns_part(ns), KeyPart::from(DB_KIND)]).await
    }

    // =========================================================================
    // Collections
    // =========================================================================

    pub async fn create_collection(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
        db: u32,
    ) -> ApiResult<u32> {
        if ns.is_invalid() {
            return Err(ApiError::invalid_argument("invalid namespace id"));
        }
        if db == INVALID_ID {
            return Err(ApiError::invalid_argument("invalid database id"));
        }
        self.create_entry(tx, ns, coll_parts(ns, db, name)).await
    }

    pub async fn drop_collection(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
        db: u32,
        id: u32,
    ) -> ApiResult<()> {
        self.drop_entry(tx, coll_parts(ns, db, name), id).await
    }

    pub async fn get_collection_id(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
        db: u32,
    ) -> ApiResult<u32> {
        self.get_entry_id(tx, coll_parts(ns, db, name)).await
    }

    pub async fn get_collections(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        db: u32,
    ) -> ApiResult<HashMap<String, u32>> {
        self.get_entries(
            tx,
            vec![ns_part(ns), KeyPart::Integer(i64::from(db)), KeyPart::from(COLL_KIND)],
        )
        .await
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    pub async fn create_index(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
        db: u32,
        coll: u32,
    ) -> ApiResult<u32> {
        if ns.is_invalid() {
            return Err(ApiError::invalid_argument("invalid namespace id"));
        }
        if db == INVALID_ID {
            return Err(ApiError::invalid_argument("invalid database id"));
        }
        if coll == INVALID_ID {
            return Err(ApiError::invalid_argument("invalid collection id"));
        }
        self.create_entry(tx, ns, index_parts(ns, db, coll, name)).await
    }

    pub async fn drop_index(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
        db: u32,
        coll: u32,
        id: u32,
    ) -> ApiResult<()> {
        self.drop_entry(tx, index_parts(ns, db, coll, name), id).await
    }

    pub async fn get_index_id(
        &self,
        tx: &mut Tx,
        name: &str,
        ns: NamespaceId,
        db: u32,
        coll: u32,
    ) -> ApiResult<u32> {
        self.get_entry_id(tx, index_parts(ns, db, coll, name)).await
    }

    pub async fn get_indexes(
        &self,
        tx: &mut Tx,
        ns: NamespaceId,
        db: u32,
        coll: u32,
    ) -> ApiResult<HashMap<String, u32>> {
        self.get_entries(
            tx,
            vec![
                ns_part(ns),
                KeyPart::Integer(i64::from(db)),
                KeyPart::Integer(i64::from(coll)),
                KeyPart::from(INDEX_KIND),
            ],
        )
        .await
    }

    // =========================================================================
    // Table key counters
    // =========================================================================

    /// Next value of the per-table integer counter, for counter-based
    /// auto-generated keys.
    pub async fn next_table_counter(&self, tx: &mut Tx, table: &[u8]) -> ApiResult<i64> {
        let key = subspace_key(&self.counters, &[KeyPart::Bytes(table.to_vec())]);
        let current: i64 = match tx.get(&key).await.map_err(ApiError::from)? {
            Some(data) => decode_value(&data).map_err(ApiError::from)?,
            None => 0,
        };
        let next = current + 1;
        let value = encode_value(&next).map_err(ApiError::from)?;
        tx.replace(&key, value, false).await.map_err(ApiError::from)?;
        Ok(next)
    }

    /// Removes a table's counter; called on drop-collection.
    pub async fn remove_table_counter(&self, tx: &mut Tx, table: &[u8]) -> ApiResult<()> {
        let key = subspace_key(&self.counters, &[KeyPart::Bytes(table.to_vec())]);
        tx.delete(&key).await.map_err(ApiError::from)
    }
}

fn ns_part(ns: NamespaceId) -> KeyPart {
    KeyPart::Integer(i64::from(ns.value()))
}

fn db_parts(ns: NamespaceId, name: &str) -> Vec<KeyPart> {
    vec![ns_part(ns), KeyPart::from(DB_KIND), KeyPart::from(name)]
}

fn coll_parts(ns: NamespaceId, db: u32, name: &str) -> Vec<KeyPart> {
    vec![
        ns_part(ns),
        KeyPart::Integer(i64::from(db)),
        KeyPart::from(COLL_KIND),
        KeyPart::from(name),
    ]
}

fn index_parts(ns: NamespaceId, db: u32, coll: u32, name: &str) -> Vec<KeyPart> {
    vec![
        ns_part(ns),
        KeyPart::Integer(i64::from(db)),
        KeyPart::Integer(i64::from(coll)),
        KeyPart::from(INDEX_KIND),
        KeyPart::from(name),
    ]
}
