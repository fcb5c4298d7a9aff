//! Sorted-set commands
//!
//! The write path goes through `storage::generic_zadd`, which also serves
//! the RESTORE deserializer; both participate in the engine's optimistic
//! retry protocol.

use super::{expire_key_if_needed, format_score, CommandError, CommandResult, RETRY_CNT};
use crate::segment::{DbSlice, LockMode};
use crate::server::ServerEntry;
use crate::session::Session;
use resp::RespValue;
use std::collections::BTreeMap;
use storage::{
    decode_score, generic_zadd, RecordKey, RecordType, RecordValue, SkipList, StoreError,
    ZaddFlag, ZslMetaValue,
};

pub fn zset_meta_key(db: &DbSlice, db_id: u32, key: &[u8]) -> RecordKey {
    RecordKey::new(db.chunk_id, db_id, RecordType::ZsetMeta, key, "")
}

/// Write the meta record and head sentinel of a fresh sorted set.
pub fn create_empty_zset(
    db: &DbSlice,
    db_id: u32,
    key: &[u8],
    version_ep: u64,
    ttl_ms: u64,
) -> Result<(), CommandError> {
    for attempt in 0..RETRY_CNT {
        let mut txn = db.store.create_transaction();
        let meta = ZslMetaValue::new();
        let meta_rv = RecordValue::new(RecordType::ZsetMeta, version_ep, ttl_ms, meta.encode());
        txn.set_kv(&zset_meta_key(db, db_id, key), &meta_rv)?;
        let list = SkipList::new(db.chunk_id, db_id, key, meta);
        list.write_head(&mut txn)?;
        match txn.commit() {
            Ok(_) => return Ok(()),
            Err(StoreError::CommitRetry) if attempt + 1 < RETRY_CNT => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::Internal("not reachable".to_string()))
}

fn load_zset_meta(
    db: &DbSlice,
    sess: &Session,
    key: &[u8],
) -> Result<Option<(ZslMetaValue, RecordValue)>, CommandError> {
    match expire_key_if_needed(db, sess, key) {
        Ok(rv) if rv.record_type() == RecordType::ZsetMeta => {
            Ok(Some((ZslMetaValue::decode(rv.value())?, rv)))
        }
        Ok(_) => Err(CommandError::WrongType),
        Err(CommandError::NotFound) | Err(CommandError::Expired) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn zadd_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    if (sess.args().len() - 2) % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    let key = sess.args()[1].clone();
    let mut score_map: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
    for (offset, pair) in sess.args()[2..].chunks(2).enumerate() {
        let score = super::arg_f64(sess.args(), 2 + offset * 2)?;
        score_map.insert(pair[1].clone(), score);
    }

    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Write);
    let db_id = sess.ctx().db_id();
    if load_zset_meta(&db, sess, &key)?.is_none() {
        create_empty_zset(&db, db_id, &key, sess.ctx().version_ep(), 0)?;
    }

    let meta_rk = zset_meta_key(&db, db_id, &key);
    for attempt in 0..RETRY_CNT {
        match generic_zadd(&db.store, &meta_rk, &score_map, ZaddFlag::None) {
            Ok(added) => return Ok(RespValue::Integer(added as i64)),
            Err(StoreError::CommitRetry) if attempt + 1 < RETRY_CNT => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::Internal("not reachable".to_string()))
}

pub fn zcard_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    match load_zset_meta(&db, sess, &key)? {
        Some((meta, _)) => Ok(RespValue::Integer(meta.count as i64 - 1)),
        None => Ok(RespValue::Integer(0)),
    }
}

pub fn zscore_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let member = sess.args()[2].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    if load_zset_meta(&db, sess, &key)?.is_none() {
        return Ok(RespValue::Null);
    }

    let txn = db.store.create_transaction();
    let rk = RecordKey::new(
        db.chunk_id,
        sess.ctx().db_id(),
        RecordType::ZsetHEle,
        key,
        member,
    );
    match txn.get_kv(&rk) {
        Ok(rv) => {
            let score = decode_score(rv.value())?;
            Ok(RespValue::bulk(format_score(score).into_bytes()))
        }
        Err(StoreError::NotFound) => Ok(RespValue::Null),
        Err(e) => Err(e.into()),
    }
}
