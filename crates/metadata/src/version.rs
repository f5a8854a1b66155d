//! Global metadata version.
//!
//! A monotonic counter persisted in its own subspace. Every DDL commit
//! increments it; readers compare their cached tenant version against it
//! and reload when stale. A reader that has seen version `v` is
//! guaranteed to see all DDL whose commit bumped the version to `<= v`.

use lodestone_kv::{Key, KvError, KvTx, Result};
use lodestone_types::{TableData, Timestamp};

use crate::encoder::encode_parts;
use crate::registry::NameRegistry;

/// The metadata version value.
pub type Version = u64;

/// Reads and bumps the persisted metadata version.
#[derive(Debug, Clone)]
pub struct VersionHandler {
    key_table: Vec<u8>,
    key_raw: Vec<u8>,
}

impl VersionHandler {
    pub fn new(registry: &NameRegistry) -> Self {
        let key_table = registry.version_subspace();
        let mut key_raw = key_table.clone();
        key_raw.extend_from_slice(&encode_parts(&[lodestone_types::KeyPart::from("metadata")]));
        Self { key_table, key_raw }
    }

    fn key(&self) -> Key {
        Key::from_raw(&self.key_table, self.key_raw.clone())
    }

    /// Reads the current version; 0 before the first DDL.
    pub async fn read(&self, tx: &mut dyn KvTx) -> Result<Version> {
        match tx.get(&self.key()).await? {
            Some(data) => {
                let bytes: [u8; 8] = data.raw.as_slice().try_into().map_err(|_| {
                    KvError::Corruption { message: "metadata version is not 8 bytes".to_owned() }
                })?;
                Ok(Version::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Bumps the version inside the transaction and returns the new
    /// value. Visible to others only after commit.
    pub async fn increment(&self, tx: &mut dyn KvTx) -> Result<Version> {
        let next = self.read(tx).await? + 1;
        let data = TableData::new(Timestamp::now(), next.to_be_bytes().to_vec());
        tx.replace(&self.key(), data, false).await?;
        Ok(next)
    }
}
