//! Key encoder.
//!
//! Every user row lives under
//! `user_prefix(4) || ns_id(4) || db_id(4) || coll_id(4)` followed by an
//! order-preserving tuple of the index id and the primary-key parts.
//! Range scans over the raw key space therefore visit rows in
//! primary-key order, which is a hard contract for iterators and resume
//! tokens.
//!
//! Tuple parts are type-tagged: byte and string payloads are
//! 0x00-terminated with `0x00 → 0x00 0xFF` escaping; integers flip the
//! sign bit and serialize big-endian so negative values order before
//! positive ones.

use lodestone_kv::Key;
use lodestone_types::{ApiError, ApiResult, CollectionId, DatabaseId, IndexId, KeyPart, NamespaceId};

/// Prefix of every user-data key.
pub const USER_TABLE_PREFIX: &[u8; 4] = b"data";

const BYTES_TAG: u8 = 0x01;
const STRING_TAG: u8 = 0x02;
const INT_TAG: u8 = 0x14;

/// Stateless key encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Returns the longest stable prefix for the non-null id arguments:
    /// the namespace table, a database table, or a collection table.
    pub fn encode_table_name(
        &self,
        ns: NamespaceId,
        db: Option<DatabaseId>,
        coll: Option<CollectionId>,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(USER_TABLE_PREFIX);
        out.extend_from_slice(&ns.value().to_be_bytes());
        if let Some(db) = db {
            out.extend_from_slice(&db.value().to_be_bytes());
            if let Some(coll) = coll {
                out.extend_from_slice(&coll.value().to_be_bytes());
            }
        }
        out
    }

    /// Parses the fixed prefix of an encoded collection table. Returns
    /// `None` for keys outside the user prefix; this is not an error.
    pub fn decode_table_name(
        &self,
        table: &[u8],
    ) -> Option<(NamespaceId, DatabaseId, CollectionId)> {
        if table.len() < 16 || &table[0..4] != USER_TABLE_PREFIX {
            return None;
        }
        let ns = u32::from_be_bytes(table[4..8].try_into().ok()?);
        let db = u32::from_be_bytes(table[8..12].try_into().ok()?);
        let coll = u32::from_be_bytes(table[12..16].try_into().ok()?);
        Some((NamespaceId::new(ns), DatabaseId::new(db), CollectionId::new(coll)))
    }

    /// Encodes a full row key: the collection table, the index id, and
    /// the primary-key tuple.
    pub fn encode_key(
        &self,
        coll_encoded_name: &[u8],
        index: IndexId,
        parts: &[KeyPart],
    ) -> Key {
        let mut raw = coll_encoded_name.to_vec();
        encode_part(&mut raw, &KeyPart::Integer(i64::from(index.value())));
        for part in parts {
            encode_part(&mut raw, part);
        }
        Key::new(coll_encoded_name.to_vec(), raw)
    }

    /// Decodes the tuple of a row key back into its parts; the first part
    /// is the index id. Malformed keys are a corruption error.
    pub fn decode_key(&self, table: &[u8], raw: &[u8]) -> ApiResult<Vec<KeyPart>> {
        let suffix = raw.strip_prefix(table).ok_or_else(|| {
            ApiError::internal("row key does not match its table prefix")
        })?;
        decode_parts(suffix)
    }

    /// Index ids are embedded as 4-byte big-endian values in index
    /// metadata.
    pub fn encode_index_name(&self, index: IndexId) -> [u8; 4] {
        index.value().to_be_bytes()
    }

    /// Name of the search-store index backing an explicit search index.
    pub fn encode_search_table_name(
        &self,
        ns: NamespaceId,
        project_id: u32,
        index_name: &str,
    ) -> String {
        format!("{}-{}-{index_name}", ns.value(), project_id)
    }

    /// Internal name of a cache table.
    pub fn encode_cache_table_name(
        &self,
        ns: NamespaceId,
        project_id: u32,
        cache_name: &str,
    ) -> String {
        format!("cache:{}:{}:{cache_name}", ns.value(), project_id)
    }

    /// Strips the internal cache prefix off a stored cache key, returning
    /// the user-visible key.
    pub fn decode_cache_key_to_external(&self, internal: &str) -> String {
        internal.splitn(5, ':').nth(4).unwrap_or(internal).to_owned()
    }
}

/// Appends one tuple part in order-preserving form.
pub fn encode_part(out: &mut Vec<u8>, part: &KeyPart) {
    match part {
        KeyPart::Integer(v) => {
            out.push(INT_TAG);
            // flip the sign bit so negatives order first
            out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
        }
        KeyPart::String(v) => {
            out.push(STRING_TAG);
            escape_into(out, v.as_bytes());
            out.push(0x00);
        }
        KeyPart::Bytes(v) => {
            out.push(BYTES_TAG);
            escape_into(out, v);
            out.push(0x00);
        }
    }
}

/// Encodes a tuple from scratch.
pub fn encode_parts(parts: &[KeyPart]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        encode_part(&mut out, part);
    }
    out
}

/// Decodes a tuple; the exact inverse of [`encode_parts`].
pub fn decode_parts(mut bytes: &[u8]) -> ApiResult<Vec<KeyPart>> {
    let mut parts = Vec::new();
    while !bytes.is_empty() {
        let (part, rest) = decode_one(bytes)?;
        parts.push(part);
        bytes = rest;
    }
    Ok(parts)
}

fn decode_one(bytes: &[u8]) -> ApiResult<(KeyPart, &[u8])> {
    let corrupt = || ApiError::internal("malformed key tuple");
    let (&tag, rest) = bytes.split_first().ok_or_else(corrupt)?;
    match tag {
        INT_TAG => {
            if rest.len() < 8 {
                return Err(corrupt());
            }
            let raw = u64::from_be_bytes(rest[..8].try_into().map_err(|_| corrupt())?);
            Ok((KeyPart::Integer((raw ^ (1 << 63)) as i64), &rest[8..]))
        }
        STRING_TAG | BYTES_TAG => {
            let (payload, rest) = unescape(rest).ok_or_else(corrupt)?;
            let part = if tag == STRING_TAG {
                KeyPart::String(String::from_utf8(payload).map_err(|_| corrupt())?)
            } else {
                KeyPart::Bytes(payload)
            };
            Ok((part, rest))
        }
        _ => Err(corrupt()),
    }
}

fn escape_into(out: &mut Vec<u8>, payload: &[u8]) {
    for &byte in payload {
        out.push(byte);
        if byte == 0x00 {
            out.push(0xFF);
        }
    }
}

fn unescape(bytes: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let mut payload = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x00 {
            if bytes.get(i + 1) == Some(&0xFF) {
                payload.push(0x00);
                i += 2;
                continue;
            }
            return Some((payload, &bytes[i + 1..]));
        }
        payload.push(bytes[i]);
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_layout() {
        let enc = Encoder::new();
        let table = enc.encode_table_name(
            NamespaceId::new(1),
            Some(DatabaseId::new(3)),
            Some(CollectionId::new(5)),
        );
        assert_eq!(&table[0..4], USER_TABLE_PREFIX);
        assert_eq!(u32::from_be_bytes(table[4..8].try_into().unwrap()), 1);
        assert_eq!(u32::from_be_bytes(table[8..12].try_into().unwrap()), 3);
        assert_eq!(u32::from_be_bytes(table[12..16].try_into().unwrap()), 5);

        let (ns, db, coll) = enc.decode_table_name(&table).expect("decode");
        assert_eq!(ns.value(), 1);
        assert_eq!(db.value(), 3);
        assert_eq!(coll.value(), 5);
    }

    #[test]
    fn test_table_name_prefix_lengths() {
        let enc = Encoder::new();
        assert_eq!(enc.encode_table_name(NamespaceId::new(1), None, None).len(), 8);
        assert_eq!(
            enc.encode_table_name(NamespaceId::new(1), Some(DatabaseId::new(2)), None).len(),
            12
        );
    }

    #[test]
    fn test_unknown_prefix_is_not_ok() {
        let enc = Encoder::new();
        assert!(enc.decode_table_name(b"meta________0000").is_none());
        assert!(enc.decode_table_name(b"data").is_none());
    }

    #[test]
    fn test_key_roundtrip() {
        let enc = Encoder::new();
        let table = enc.encode_table_name(
            NamespaceId::new(1),
            Some(DatabaseId::new(2)),
            Some(CollectionId::new(3)),
        );
        let parts = vec![KeyPart::from("a"), KeyPart::from(42)];
        let key = enc.encode_key(&table, IndexId::new(1), &parts);

        let decoded = enc.decode_key(&table, key.raw()).expect("decode");
        assert_eq!(decoded[0], KeyPart::Integer(1));
        assert_eq!(&decoded[1..], parts.as_slice());
    }

    #[test]
    fn test_integer_ordering() {
        let order: Vec<i64> = vec![i64::MIN, -7, -1, 0, 1, 42, i64::MAX];
        let encoded: Vec<Vec<u8>> =
            order.iter().map(|v| encode_parts(&[KeyPart::Integer(*v)])).collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_string_ordering_and_escaping() {
        let a = encode_parts(&[KeyPart::from("a")]);
        let ab = encode_parts(&[KeyPart::from("ab")]);
        let b = encode_parts(&[KeyPart::from("b")]);
        assert!(a < ab);
        assert!(ab < b);

        // embedded zero bytes survive the roundtrip
        let parts = vec![KeyPart::Bytes(vec![0x00, 0x01, 0x00])];
        let encoded = encode_parts(&parts);
        assert_eq!(decode_parts(&encoded).expect("decode"), parts);
    }

    #[test]
    fn test_composite_tuple_ordering() {
        // ("a", 2) must sort before ("ab", 1): the first part decides
        let first = encode_parts(&[KeyPart::from("a"), KeyPart::from(2)]);
        let second = encode_parts(&[KeyPart::from("ab"), KeyPart::from(1)]);
        assert!(first < second);
    }

    #[test]
    fn test_malformed_tuple_is_corruption() {
        assert!(decode_parts(&[0x99, 0x01]).is_err());
        assert!(decode_parts(&[INT_TAG, 0x01]).is_err());
        assert!(decode_parts(&[STRING_TAG, b'a']).is_err());
    }

    #[test]
    fn test_search_and_cache_names() {
        let enc = Encoder::new();
        assert_eq!(enc.encode_search_table_name(NamespaceId::new(1), 7, "idx"), "1-7-idx");
        assert_eq!(enc.encode_cache_table_name(NamespaceId::new(1), 1, "c1"), "cache:1:1:c1");
        assert_eq!(enc.decode_cache_key_to_external("cache:1:1:c1:k1"), "k1");
        assert_eq!(enc.decode_cache_key_to_external("cache:1:1:c1:k1:x1"), "k1:x1");
    }
}
