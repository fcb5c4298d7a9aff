//! Ordered key-value engine and record model
//!
//! The server encodes every logical Redis value as one or more records in a
//! single ordered keyspace:
//!
//! - the primary record (string value or aggregate metadata) lives in the
//!   meta keyspace, one record per user key
//! - aggregate elements live in per-type element keyspaces, one record per
//!   element, addressed by secondary key
//! - sorted sets additionally keep a record-backed skiplist for ordered scans
//!
//! The engine itself is an in-memory ordered map with snapshot transactions
//! and optimistic conflict detection; commits that lose a race fail with
//! `StoreError::CommitRetry` and are expected to be retried by the caller.

pub mod engine;
pub mod record;
pub mod skiplist;

pub use engine::{Cursor, KvEngine, Record, Transaction};
pub use record::{
    HashMetaValue, ListMetaValue, RecordKey, RecordType, RecordValue, SetMetaValue, INIT_SEQ,
};
pub use skiplist::{decode_score, generic_zadd, SkipList, ZaddFlag, ZslEleValue, ZslMetaValue, HEAD_ID};

/// Storage layer error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("key expired")]
    Expired,
    #[error("cursor exhausted")]
    Exhaust,
    #[error("transaction conflict")]
    CommitRetry,
    #[error("corrupted record: {0}")]
    Corrupt(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
