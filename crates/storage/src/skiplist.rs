//! Record-backed skiplist for sorted sets
//!
//! Every node is one `ZsetSEle` record addressed by a decimal node id; the
//! head sentinel always has id `HEAD_ID`. Node order is (score, member)
//! ascending. Alongside the skiplist, one `ZsetHEle` record per member maps
//! the member to its raw score for O(1) score lookups.
//!
//! The meta value tracks the current list level, the node count (including
//! the head sentinel), the id of the last node and the id allocator. A fresh
//! sorted set is exactly the meta `(level=1, count=1, tail=0)` plus the head
//! sentinel record.

use crate::engine::Transaction;
use crate::record::{RecordKey, RecordType, RecordValue};
use crate::{KvEngine, StoreError, StoreResult};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Node id of the head sentinel.
pub const HEAD_ID: u64 = 1;

/// Maximum skiplist level.
pub const ZSKIPLIST_MAXLEVEL: usize = 32;

/// Probability of promoting a node one more level.
const ZSKIPLIST_P: f64 = 0.25;

/// Sorted-set metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZslMetaValue {
    pub level: u8,
    /// Node count including the head sentinel.
    pub count: u32,
    /// Id of the last node at level 0, or 0 when the list is empty.
    pub tail: u64,
    /// Last allocated node id.
    pub alloc: u64,
}

impl ZslMetaValue {
    /// Meta of an empty sorted set (head sentinel only).
    pub fn new() -> Self {
        Self {
            level: 1,
            count: 1,
            tail: 0,
            alloc: HEAD_ID,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(21);
        buf.push(self.level);
        buf.extend_from_slice(&self.count.to_le_bytes());
        buf.extend_from_slice(&self.tail.to_le_bytes());
        buf.extend_from_slice(&self.alloc.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<ZslMetaValue> {
        if bytes.len() != 21 {
            return Err(StoreError::Corrupt("bad zset meta".to_string()));
        }
        Ok(ZslMetaValue {
            level: bytes[0],
            count: LittleEndian::read_u32(&bytes[1..5]),
            tail: LittleEndian::read_u64(&bytes[5..13]),
            alloc: LittleEndian::read_u64(&bytes[13..21]),
        })
    }
}

impl Default for ZslMetaValue {
    fn default() -> Self {
        Self::new()
    }
}

/// Skiplist node.
#[derive(Debug, Clone, PartialEq)]
pub struct ZslEleValue {
    pub score: f64,
    pub subkey: Vec<u8>,
    /// Successor node id per level, 0 for none.
    pub forward: Vec<u64>,
    /// Predecessor at level 0, 0 for none (first node or head).
    pub backward: u64,
}

impl ZslEleValue {
    pub fn new() -> Self {
        Self {
            score: 0.0,
            subkey: Vec::new(),
            forward: vec![0; ZSKIPLIST_MAXLEVEL],
            backward: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 8 * ZSKIPLIST_MAXLEVEL + self.subkey.len());
        buf.extend_from_slice(&self.score.to_le_bytes());
        buf.extend_from_slice(&self.backward.to_le_bytes());
        for level in 0..ZSKIPLIST_MAXLEVEL {
            buf.extend_from_slice(&self.forward[level].to_le_bytes());
        }
        buf.extend_from_slice(&self.subkey);
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<ZslEleValue> {
        let fixed = 16 + 8 * ZSKIPLIST_MAXLEVEL;
        if bytes.len() < fixed {
            return Err(StoreError::Corrupt("bad zset element".to_string()));
        }
        let score = f64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let backward = LittleEndian::read_u64(&bytes[8..16]);
        let mut forward = Vec::with_capacity(ZSKIPLIST_MAXLEVEL);
        for level in 0..ZSKIPLIST_MAXLEVEL {
            let at = 16 + 8 * level;
            forward.push(LittleEndian::read_u64(&bytes[at..at + 8]));
        }
        Ok(ZslEleValue {
            score,
            subkey: bytes[fixed..].to_vec(),
            forward,
            backward,
        })
    }
}

impl Default for ZslEleValue {
    fn default() -> Self {
        Self::new()
    }
}

/// One sorted set's skiplist, bound to its key coordinates.
pub struct SkipList {
    chunk_id: u32,
    db_id: u32,
    key: Vec<u8>,
    meta: ZslMetaValue,
}

/// Loaded nodes plus the ids whose records must be rewritten.
struct NodeCache {
    nodes: HashMap<u64, ZslEleValue>,
    dirty: BTreeSet<u64>,
}

impl NodeCache {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    fn get<'c>(
        &'c mut self,
        list: &SkipList,
        id: u64,
        txn: &Transaction,
    ) -> StoreResult<&'c ZslEleValue> {
        use std::collections::hash_map::Entry;
        match self.nodes.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => {
                let rv = txn.get_kv(&list.node_key(id))?;
                Ok(slot.insert(ZslEleValue::decode(rv.value())?))
            }
        }
    }

    fn get_mut<'c>(
        &'c mut self,
        list: &SkipList,
        id: u64,
        txn: &Transaction,
    ) -> StoreResult<&'c mut ZslEleValue> {
        self.get(list, id, txn)?;
        self.dirty.insert(id);
        Ok(self.nodes.get_mut(&id).unwrap())
    }

    fn put(&mut self, id: u64, node: ZslEleValue) {
        self.nodes.insert(id, node);
        self.dirty.insert(id);
    }

    fn flush(&self, list: &SkipList, txn: &mut Transaction) -> StoreResult<()> {
        for id in &self.dirty {
            let node = &self.nodes[id];
            let rv = RecordValue::new(RecordType::ZsetSEle, 0, 0, node.encode());
            txn.set_kv(&list.node_key(*id), &rv)?;
        }
        Ok(())
    }
}

impl SkipList {
    pub fn new(chunk_id: u32, db_id: u32, key: impl Into<Vec<u8>>, meta: ZslMetaValue) -> Self {
        Self {
            chunk_id,
            db_id,
            key: key.into(),
            meta,
        }
    }

    /// Node count including the head sentinel.
    pub fn count(&self) -> u32 {
        self.meta.count
    }

    pub fn meta(&self) -> &ZslMetaValue {
        &self.meta
    }

    fn node_key(&self, id: u64) -> RecordKey {
        RecordKey::new(
            self.chunk_id,
            self.db_id,
            RecordType::ZsetSEle,
            self.key.clone(),
            id.to_string(),
        )
    }

    /// Write the head sentinel of a fresh skiplist.
    pub fn write_head(&self, txn: &mut Transaction) -> StoreResult<()> {
        let head = ZslEleValue::new();
        let rv = RecordValue::new(RecordType::ZsetSEle, 0, 0, head.encode());
        txn.set_kv(&self.node_key(HEAD_ID), &rv)
    }

    fn random_level() -> usize {
        let mut level = 1;
        while level < ZSKIPLIST_MAXLEVEL && rand::random::<f64>() < ZSKIPLIST_P {
            level += 1;
        }
        level
    }

    /// Search path: per level, the id of the last node ordered before
    /// (score, subkey).
    fn find_update(
        &self,
        cache: &mut NodeCache,
        score: f64,
        subkey: &[u8],
        txn: &Transaction,
    ) -> StoreResult<[u64; ZSKIPLIST_MAXLEVEL]> {
        let mut update = [HEAD_ID; ZSKIPLIST_MAXLEVEL];
        let mut x_id = HEAD_ID;
        for level in (0..self.meta.level as usize).rev() {
            loop {
                let next_id = cache.get(self, x_id, txn)?.forward[level];
                if next_id == 0 {
                    break;
                }
                let next = cache.get(self, next_id, txn)?;
                if next.score < score || (next.score == score && next.subkey.as_slice() < subkey) {
                    x_id = next_id;
                } else {
                    break;
                }
            }
            update[level] = x_id;
        }
        Ok(update)
    }

    /// Insert a (score, member) pair. The member must not already be in the
    /// skiplist; duplicates are the caller's responsibility, checked through
    /// the member-to-score records.
    pub fn insert(&mut self, score: f64, subkey: &[u8], txn: &mut Transaction) -> StoreResult<()> {
        let mut cache = NodeCache::new();
        let update = self.find_update(&mut cache, score, subkey, txn)?;

        let new_level = Self::random_level();
        if new_level > self.meta.level as usize {
            self.meta.level = new_level as u8;
        }

        self.meta.alloc += 1;
        let id = self.meta.alloc;
        let mut node = ZslEleValue {
            score,
            subkey: subkey.to_vec(),
            ..ZslEleValue::new()
        };

        for level in 0..new_level {
            let prev = cache.get_mut(self, update[level], txn)?;
            node.forward[level] = prev.forward[level];
            prev.forward[level] = id;
        }
        node.backward = if update[0] == HEAD_ID { 0 } else { update[0] };

        let successor = node.forward[0];
        if successor != 0 {
            cache.get_mut(self, successor, txn)?.backward = id;
        } else {
            self.meta.tail = id;
        }

        cache.put(id, node);
        self.meta.count += 1;
        cache.flush(self, txn)
    }

    /// Remove an existing (score, member) pair.
    pub fn remove(&mut self, score: f64, subkey: &[u8], txn: &mut Transaction) -> StoreResult<()> {
        let mut cache = NodeCache::new();
        let update = self.find_update(&mut cache, score, subkey, txn)?;

        let target_id = cache.get(self, update[0], txn)?.forward[0];
        if target_id == 0 {
            return Err(StoreError::Internal("zset element missing".to_string()));
        }
        let target = cache.get(self, target_id, txn)?.clone();
        if target.score != score || target.subkey.as_slice() != subkey {
            return Err(StoreError::Internal("zset element missing".to_string()));
        }

        for level in 0..self.meta.level as usize {
            let prev = cache.get_mut(self, update[level], txn)?;
            if prev.forward[level] == target_id {
                prev.forward[level] = target.forward[level];
            }
        }
        if target.forward[0] != 0 {
            cache.get_mut(self, target.forward[0], txn)?.backward = target.backward;
        } else {
            self.meta.tail = if update[0] == HEAD_ID { 0 } else { update[0] };
        }
        while self.meta.level > 1 {
            let head = cache.get(self, HEAD_ID, txn)?;
            if head.forward[self.meta.level as usize - 1] != 0 {
                break;
            }
            self.meta.level -= 1;
        }

        self.meta.count -= 1;
        cache.dirty.remove(&target_id);
        cache.flush(self, txn)?;
        txn.del_kv(&self.node_key(target_id))
    }

    /// Elements in rank order; `rev` counts ranks from the highest score
    /// down. `start` is the first rank to return, `num` the element count.
    pub fn scan_by_rank(
        &self,
        start: u64,
        num: u64,
        rev: bool,
        txn: &Transaction,
    ) -> StoreResult<Vec<(f64, Vec<u8>)>> {
        let mut elements = Vec::with_capacity(self.meta.count.saturating_sub(1) as usize);
        let head = ZslEleValue::decode(txn.get_kv(&self.node_key(HEAD_ID))?.value())?;
        let mut id = head.forward[0];
        while id != 0 {
            let node = ZslEleValue::decode(txn.get_kv(&self.node_key(id))?.value())?;
            id = node.forward[0];
            elements.push((node.score, node.subkey));
        }
        if rev {
            elements.reverse();
        }
        Ok(elements
            .into_iter()
            .skip(start as usize)
            .take(num as usize)
            .collect())
    }
}

/// ZADD behavior flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZaddFlag {
    /// Insert or update.
    None,
    /// Insert only; existing members keep their score.
    Nx,
}

fn score_record(score: f64) -> RecordValue {
    RecordValue::new(RecordType::ZsetHEle, 0, 0, score.to_le_bytes().to_vec())
}

pub fn decode_score(bytes: &[u8]) -> StoreResult<f64> {
    if bytes.len() != 8 {
        return Err(StoreError::Corrupt("bad zset score".to_string()));
    }
    Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
}

/// Add all (member, score) pairs to the sorted set under `meta_rk`.
///
/// The meta record must already exist (fresh sets are created by writing
/// `ZslMetaValue::new()` plus the head sentinel first). Runs in its own
/// transaction; a lost commit race surfaces as `CommitRetry` for the caller
/// to retry. Returns the number of members actually inserted.
pub fn generic_zadd(
    store: &KvEngine,
    meta_rk: &RecordKey,
    score_map: &BTreeMap<Vec<u8>, f64>,
    flag: ZaddFlag,
) -> StoreResult<u64> {
    let mut txn = store.create_transaction();
    let meta_rv = txn.get_kv(meta_rk)?;
    let meta = ZslMetaValue::decode(meta_rv.value())?;
    let mut list = SkipList::new(
        meta_rk.chunk_id(),
        meta_rk.db_id(),
        meta_rk.primary_key(),
        meta,
    );

    let mut added = 0u64;
    for (member, &score) in score_map {
        let hash_rk = RecordKey::new(
            meta_rk.chunk_id(),
            meta_rk.db_id(),
            RecordType::ZsetHEle,
            meta_rk.primary_key(),
            member.clone(),
        );
        match txn.get_kv(&hash_rk) {
            Ok(old) => {
                if flag == ZaddFlag::Nx {
                    continue;
                }
                let old_score = decode_score(old.value())?;
                if old_score == score {
                    continue;
                }
                list.remove(old_score, member, &mut txn)?;
                list.insert(score, member, &mut txn)?;
                txn.set_kv(&hash_rk, &score_record(score))?;
            }
            Err(StoreError::NotFound) => {
                list.insert(score, member, &mut txn)?;
                txn.set_kv(&hash_rk, &score_record(score))?;
                added += 1;
            }
            Err(e) => return Err(e),
        }
    }

    let new_meta = RecordValue::new(
        RecordType::ZsetMeta,
        meta_rv.version_ep(),
        meta_rv.ttl_ms(),
        list.meta().encode(),
    );
    txn.set_kv(meta_rk, &new_meta)?;
    txn.commit()?;
    Ok(added)
}
