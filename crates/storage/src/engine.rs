//! In-memory ordered KV engine with snapshot transactions
//!
//! A transaction sees the state as of its creation plus its own writes.
//! Commits are optimistic: if any key written by the transaction was
//! committed by someone else after the snapshot was taken, the commit fails
//! with `StoreError::CommitRetry` and the caller restarts with a fresh
//! transaction. An uncommitted transaction that is dropped simply discards
//! its buffered writes.

use crate::record::{RecordKey, RecordValue};
use crate::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct EngineInner {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Commit sequence that last touched each key.
    versions: HashMap<Vec<u8>, u64>,
    seq: u64,
}

/// Shared handle to one engine instance. Clones are cheap and refer to the
/// same keyspace.
#[derive(Clone, Default)]
pub struct KvEngine {
    inner: Arc<Mutex<EngineInner>>,
}

impl KvEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction over a snapshot of the current state.
    pub fn create_transaction(&self) -> Transaction {
        let inner = self.inner.lock();
        Transaction {
            engine: self.inner.clone(),
            start_seq: inner.seq,
            snapshot: inner.data.clone(),
            writes: BTreeMap::new(),
        }
    }
}

/// A snapshot transaction. Writes are buffered until `commit`.
pub struct Transaction {
    engine: Arc<Mutex<EngineInner>>,
    start_seq: u64,
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Transaction {
    pub fn get_kv(&self, rk: &RecordKey) -> StoreResult<RecordValue> {
        let key = rk.encode();
        let raw = match self.writes.get(&key) {
            Some(Some(value)) => Some(value),
            Some(None) => None,
            None => self.snapshot.get(&key),
        };
        match raw {
            Some(bytes) => RecordValue::decode(bytes),
            None => Err(StoreError::NotFound),
        }
    }

    pub fn set_kv(&mut self, rk: &RecordKey, rv: &RecordValue) -> StoreResult<()> {
        self.writes.insert(rk.encode(), Some(rv.encode()));
        Ok(())
    }

    pub fn del_kv(&mut self, rk: &RecordKey) -> StoreResult<()> {
        self.writes.insert(rk.encode(), None);
        Ok(())
    }

    /// Cursor over the transaction's view (snapshot merged with its own
    /// buffered writes), in encoded-key order.
    pub fn create_cursor(&self) -> Cursor {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(self.snapshot.len());
        for (key, value) in &self.snapshot {
            match self.writes.get(key) {
                Some(Some(new_value)) => entries.push((key.clone(), new_value.clone())),
                Some(None) => {}
                None => entries.push((key.clone(), value.clone())),
            }
        }
        for (key, write) in &self.writes {
            if let (Some(value), false) = (write, self.snapshot.contains_key(key)) {
                entries.push((key.clone(), value.clone()));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Cursor { entries, idx: 0 }
    }

    /// Apply all buffered writes atomically.
    ///
    /// Returns the commit sequence, or `CommitRetry` when another commit
    /// touched one of the written keys after this transaction began.
    pub fn commit(self) -> StoreResult<u64> {
        let mut inner = self.engine.lock();
        for key in self.writes.keys() {
            if inner.versions.get(key).copied().unwrap_or(0) > self.start_seq {
                debug!(start_seq = self.start_seq, "commit lost a write race");
                return Err(StoreError::CommitRetry);
            }
        }
        inner.seq += 1;
        let seq = inner.seq;
        for (key, write) in self.writes {
            match write {
                Some(value) => {
                    inner.data.insert(key.clone(), value);
                }
                None => {
                    inner.data.remove(&key);
                }
            }
            inner.versions.insert(key, seq);
        }
        Ok(seq)
    }
}

/// Decoded record as returned by a cursor.
#[derive(Debug, Clone)]
pub struct Record {
    record_key: RecordKey,
    record_value: RecordValue,
}

impl Record {
    pub fn record_key(&self) -> &RecordKey {
        &self.record_key
    }

    pub fn record_value(&self) -> &RecordValue {
        &self.record_value
    }

    pub fn into_parts(self) -> (RecordKey, RecordValue) {
        (self.record_key, self.record_value)
    }
}

/// Forward cursor over a transaction view.
pub struct Cursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    idx: usize,
}

impl Cursor {
    /// Position at the first key >= `prefix`.
    pub fn seek(&mut self, prefix: &[u8]) {
        self.idx = self.entries.partition_point(|(key, _)| key.as_slice() < prefix);
    }

    /// Return the record under the cursor and advance; `Exhaust` at the end.
    pub fn next(&mut self) -> StoreResult<Record> {
        let (key, value) = self.entries.get(self.idx).ok_or(StoreError::Exhaust)?;
        self.idx += 1;
        Ok(Record {
            record_key: RecordKey::decode(key)?,
            record_value: RecordValue::decode(value)?,
        })
    }
}
