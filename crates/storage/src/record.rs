//! Record key/value encoding
//!
//! Every record is addressed by `(chunk_id, db_id, record_type, primary_key,
//! secondary_key)`. The binary key layout keeps all records of one key type
//! for one user key contiguous, so element records can be walked with a
//! prefix cursor:
//!
//! ```text
//! [chunk_id u32 BE][db_id u32 BE][keyspace u8][pk_len u32 BE][pk][sk]
//! ```
//!
//! All primary records (string values and aggregate metas) share the
//! `DataMeta` keyspace byte: a user key has exactly one primary record and
//! its concrete type is carried in the record value. Lookups by
//! `RecordType::DataMeta` therefore match whatever the key currently holds.

use crate::{StoreError, StoreResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// First element index of a fresh list; lists grow down from head and up
/// from tail so pushes on either end stay cheap.
pub const INIT_SEQ: u64 = u64::MAX / 2;

/// Logical record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Wildcard for primary-record lookups; also the decoded type of any
    /// primary record key.
    DataMeta,
    Kv,
    ListMeta,
    ListEle,
    HashMeta,
    HashEle,
    SetMeta,
    SetEle,
    ZsetMeta,
    /// Skiplist node, addressed by node id.
    ZsetSEle,
    /// Member-to-score record, addressed by member.
    ZsetHEle,
}

impl RecordType {
    /// Keyspace byte used in the encoded record key. All primary records
    /// share one keyspace.
    fn keyspace(self) -> u8 {
        match self {
            RecordType::DataMeta
            | RecordType::Kv
            | RecordType::ListMeta
            | RecordType::HashMeta
            | RecordType::SetMeta
            | RecordType::ZsetMeta => b'M',
            RecordType::ListEle => b'l',
            RecordType::HashEle => b'h',
            RecordType::SetEle => b's',
            RecordType::ZsetSEle => b'z',
            RecordType::ZsetHEle => b'Z',
        }
    }

    fn from_keyspace(byte: u8) -> StoreResult<RecordType> {
        match byte {
            b'M' => Ok(RecordType::DataMeta),
            b'l' => Ok(RecordType::ListEle),
            b'h' => Ok(RecordType::HashEle),
            b's' => Ok(RecordType::SetEle),
            b'z' => Ok(RecordType::ZsetSEle),
            b'Z' => Ok(RecordType::ZsetHEle),
            other => Err(StoreError::Corrupt(format!(
                "unknown keyspace byte {:#04x}",
                other
            ))),
        }
    }

    /// Concrete type byte stored inside record values.
    fn to_value_byte(self) -> u8 {
        match self {
            RecordType::DataMeta => 0,
            RecordType::Kv => 1,
            RecordType::ListMeta => 2,
            RecordType::ListEle => 3,
            RecordType::HashMeta => 4,
            RecordType::HashEle => 5,
            RecordType::SetMeta => 6,
            RecordType::SetEle => 7,
            RecordType::ZsetMeta => 8,
            RecordType::ZsetSEle => 9,
            RecordType::ZsetHEle => 10,
        }
    }

    fn from_value_byte(byte: u8) -> StoreResult<RecordType> {
        Ok(match byte {
            0 => RecordType::DataMeta,
            1 => RecordType::Kv,
            2 => RecordType::ListMeta,
            3 => RecordType::ListEle,
            4 => RecordType::HashMeta,
            5 => RecordType::HashEle,
            6 => RecordType::SetMeta,
            7 => RecordType::SetEle,
            8 => RecordType::ZsetMeta,
            9 => RecordType::ZsetSEle,
            10 => RecordType::ZsetHEle,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "unknown record type byte {}",
                    other
                )))
            }
        })
    }
}

/// Record address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    chunk_id: u32,
    db_id: u32,
    record_type: RecordType,
    primary_key: Vec<u8>,
    secondary_key: Vec<u8>,
}

impl RecordKey {
    pub fn new(
        chunk_id: u32,
        db_id: u32,
        record_type: RecordType,
        primary_key: impl Into<Vec<u8>>,
        secondary_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            chunk_id,
            db_id,
            record_type,
            primary_key: primary_key.into(),
            secondary_key: secondary_key.into(),
        }
    }

    pub fn chunk_id(&self) -> u32 {
        self.chunk_id
    }

    pub fn db_id(&self) -> u32 {
        self.db_id
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn primary_key(&self) -> &[u8] {
        &self.primary_key
    }

    pub fn secondary_key(&self) -> &[u8] {
        &self.secondary_key
    }

    /// Full encoded key.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.prefix_pk();
        buf.extend_from_slice(&self.secondary_key);
        buf
    }

    /// Encoded key up to and including the primary key. All records of this
    /// (type, primary key) pair share this prefix.
    pub fn prefix_pk(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13 + self.primary_key.len() + self.secondary_key.len());
        buf.extend_from_slice(&self.chunk_id.to_be_bytes());
        buf.extend_from_slice(&self.db_id.to_be_bytes());
        buf.push(self.record_type.keyspace());
        buf.extend_from_slice(&(self.primary_key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.primary_key);
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<RecordKey> {
        if bytes.len() < 13 {
            return Err(StoreError::Corrupt("record key too short".to_string()));
        }
        let chunk_id = BigEndian::read_u32(&bytes[0..4]);
        let db_id = BigEndian::read_u32(&bytes[4..8]);
        let record_type = RecordType::from_keyspace(bytes[8])?;
        let pk_len = BigEndian::read_u32(&bytes[9..13]) as usize;
        if bytes.len() < 13 + pk_len {
            return Err(StoreError::Corrupt("record key truncated".to_string()));
        }
        let primary_key = bytes[13..13 + pk_len].to_vec();
        let secondary_key = bytes[13 + pk_len..].to_vec();
        Ok(RecordKey {
            chunk_id,
            db_id,
            record_type,
            primary_key,
            secondary_key,
        })
    }
}

/// Record payload plus its type, version epoch and absolute expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    record_type: RecordType,
    version_ep: u64,
    /// Absolute expiry in ms since epoch; 0 means no expiry.
    ttl_ms: u64,
    value: Vec<u8>,
}

impl RecordValue {
    pub fn new(
        record_type: RecordType,
        version_ep: u64,
        ttl_ms: u64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            record_type,
            version_ep,
            ttl_ms,
            value: value.into(),
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn version_ep(&self) -> u64 {
        self.version_ep
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17 + self.value.len());
        buf.push(self.record_type.to_value_byte());
        buf.extend_from_slice(&self.version_ep.to_le_bytes());
        buf.extend_from_slice(&self.ttl_ms.to_le_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<RecordValue> {
        if bytes.len() < 17 {
            return Err(StoreError::Corrupt("record value too short".to_string()));
        }
        let record_type = RecordType::from_value_byte(bytes[0])?;
        let version_ep = LittleEndian::read_u64(&bytes[1..9]);
        let ttl_ms = LittleEndian::read_u64(&bytes[9..17]);
        Ok(RecordValue {
            record_type,
            version_ep,
            ttl_ms,
            value: bytes[17..].to_vec(),
        })
    }
}

/// List metadata: elements occupy indices `[head, tail)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListMetaValue {
    pub head: u64,
    pub tail: u64,
}

impl ListMetaValue {
    pub fn new(head: u64, tail: u64) -> Self {
        Self { head, tail }
    }

    pub fn len(&self) -> u64 {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.head
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&self.head.to_le_bytes());
        buf.extend_from_slice(&self.tail.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<ListMetaValue> {
        if bytes.len() != 16 {
            return Err(StoreError::Corrupt("bad list meta".to_string()));
        }
        Ok(ListMetaValue {
            head: LittleEndian::read_u64(&bytes[0..8]),
            tail: LittleEndian::read_u64(&bytes[8..16]),
        })
    }
}

/// Hash metadata: field count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashMetaValue {
    pub count: u64,
}

impl HashMetaValue {
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.count.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<HashMetaValue> {
        if bytes.len() != 8 {
            return Err(StoreError::Corrupt("bad hash meta".to_string()));
        }
        Ok(HashMetaValue {
            count: LittleEndian::read_u64(bytes),
        })
    }
}

/// Set metadata: member count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetMetaValue {
    pub count: u64,
}

impl SetMetaValue {
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.count.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<SetMetaValue> {
        if bytes.len() != 8 {
            return Err(StoreError::Corrupt("bad set meta".to_string()));
        }
        Ok(SetMetaValue {
            count: LittleEndian::read_u64(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_round_trip() {
        let rk = RecordKey::new(7, 2, RecordType::HashEle, &b"user:1"[..], &b"name"[..]);
        let decoded = RecordKey::decode(&rk.encode()).unwrap();
        assert_eq!(decoded, rk);
        assert_eq!(decoded.secondary_key(), b"name");
    }

    #[test]
    fn test_meta_keyspace_is_shared() {
        let kv = RecordKey::new(1, 0, RecordType::Kv, &b"k"[..], &b""[..]);
        let meta = RecordKey::new(1, 0, RecordType::HashMeta, &b"k"[..], &b""[..]);
        let probe = RecordKey::new(1, 0, RecordType::DataMeta, &b"k"[..], &b""[..]);
        assert_eq!(kv.encode(), probe.encode());
        assert_eq!(meta.encode(), probe.encode());
    }

    #[test]
    fn test_prefix_pk_covers_elements() {
        let probe = RecordKey::new(3, 1, RecordType::SetEle, &b"s"[..], &b""[..]);
        let ele = RecordKey::new(3, 1, RecordType::SetEle, &b"s"[..], &b"member"[..]);
        assert!(ele.encode().starts_with(&probe.prefix_pk()));
        let other = RecordKey::new(3, 1, RecordType::SetEle, &b"s2"[..], &b"member"[..]);
        assert!(!other.encode().starts_with(&probe.prefix_pk()));
    }

    #[test]
    fn test_record_value_round_trip() {
        let rv = RecordValue::new(RecordType::Kv, 3, 99_000, &b"hello"[..]);
        let decoded = RecordValue::decode(&rv.encode()).unwrap();
        assert_eq!(decoded, rv);
        assert_eq!(decoded.value(), b"hello");
        assert_eq!(decoded.ttl_ms(), 99_000);
    }

    #[test]
    fn test_list_meta_round_trip() {
        let meta = ListMetaValue::new(INIT_SEQ, INIT_SEQ + 5);
        let decoded = ListMetaValue::decode(&meta.encode()).unwrap();
        assert_eq!(decoded, meta);
        assert_eq!(decoded.len(), 5);
    }
}
