//! Hash commands

use super::{expire_key_if_needed, CommandError, CommandResult, RETRY_CNT};
use crate::segment::{DbSlice, LockMode};
use crate::server::ServerEntry;
use crate::session::Session;
use resp::RespValue;
use storage::{HashMetaValue, RecordKey, RecordType, RecordValue, StoreError};

fn load_hash_meta(
    db: &DbSlice,
    sess: &Session,
    key: &[u8],
) -> Result<Option<(HashMetaValue, RecordValue)>, CommandError> {
    match expire_key_if_needed(db, sess, key) {
        Ok(rv) if rv.record_type() == RecordType::HashMeta => {
            Ok(Some((HashMetaValue::decode(rv.value())?, rv)))
        }
        Ok(_) => Err(CommandError::WrongType),
        Err(CommandError::NotFound) | Err(CommandError::Expired) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn hset_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    if (sess.args().len() - 2) % 2 != 0 {
        return Err(CommandError::WrongArity("hset"));
    }
    let key = sess.args()[1].clone();
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = sess.args()[2..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Write);
    let db_id = sess.ctx().db_id();

    for attempt in 0..RETRY_CNT {
        let (mut meta, ttl_ms) = match load_hash_meta(&db, sess, &key)? {
            Some((meta, rv)) => (meta, rv.ttl_ms()),
            None => (HashMetaValue::default(), 0),
        };

        let mut txn = db.store.create_transaction();
        let mut added = 0u64;
        for (field, value) in &pairs {
            let rk = RecordKey::new(db.chunk_id, db_id, RecordType::HashEle, key.clone(), field.clone());
            if matches!(txn.get_kv(&rk), Err(StoreError::NotFound)) {
                added += 1;
            }
            txn.set_kv(&rk, &RecordValue::new(RecordType::HashEle, 0, 0, value.clone()))?;
        }
        meta.count += added;
        let meta_rk = RecordKey::new(db.chunk_id, db_id, RecordType::HashMeta, key.clone(), "");
        let meta_rv = RecordValue::new(
            RecordType::HashMeta,
            sess.ctx().version_ep(),
            ttl_ms,
            meta.encode(),
        );
        txn.set_kv(&meta_rk, &meta_rv)?;
        match txn.commit() {
            Ok(_) => return Ok(RespValue::Integer(added as i64)),
            Err(StoreError::CommitRetry) if attempt + 1 < RETRY_CNT => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::Internal("not reachable".to_string()))
}

pub fn hgetall_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    if load_hash_meta(&db, sess, &key)?.is_none() {
        return Ok(RespValue::Array(Vec::new()));
    }

    let txn = db.store.create_transaction();
    let probe = RecordKey::new(db.chunk_id, sess.ctx().db_id(), RecordType::HashEle, key, "");
    let prefix = probe.prefix_pk();
    let mut cursor = txn.create_cursor();
    cursor.seek(&prefix);
    let mut items = Vec::new();
    loop {
        let record = match cursor.next() {
            Ok(record) => record,
            Err(StoreError::Exhaust) => break,
            Err(e) => return Err(e.into()),
        };
        if !record.record_key().encode().starts_with(&prefix) {
            break;
        }
        items.push(RespValue::bulk(record.record_key().secondary_key().to_vec()));
        items.push(RespValue::bulk(record.record_value().value().to_vec()));
    }
    Ok(RespValue::Array(items))
}
