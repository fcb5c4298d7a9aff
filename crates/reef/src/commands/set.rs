//! Set commands

use super::{expire_key_if_needed, CommandError, CommandResult, RETRY_CNT};
use crate::segment::{DbSlice, LockMode};
use crate::server::ServerEntry;
use crate::session::Session;
use resp::RespValue;
use storage::{RecordKey, RecordType, RecordValue, SetMetaValue, StoreError};

fn load_set_meta(
    db: &DbSlice,
    sess: &Session,
    key: &[u8],
) -> Result<Option<(SetMetaValue, RecordValue)>, CommandError> {
    match expire_key_if_needed(db, sess, key) {
        Ok(rv) if rv.record_type() == RecordType::SetMeta => {
            Ok(Some((SetMetaValue::decode(rv.value())?, rv)))
        }
        Ok(_) => Err(CommandError::WrongType),
        Err(CommandError::NotFound) | Err(CommandError::Expired) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn sadd_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let members: Vec<Vec<u8>> = sess.args()[2..].to_vec();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Write);
    let db_id = sess.ctx().db_id();

    for attempt in 0..RETRY_CNT {
        let (mut meta, ttl_ms) = match load_set_meta(&db, sess, &key)? {
            Some((meta, rv)) => (meta, rv.ttl_ms()),
            None => (SetMetaValue::default(), 0),
        };

        let mut txn = db.store.create_transaction();
        let mut added = 0u64;
        for member in &members {
            let rk = RecordKey::new(db.chunk_id, db_id, RecordType::SetEle, key.clone(), member.clone());
            match txn.get_kv(&rk) {
                Ok(_) => {}
                Err(StoreError::NotFound) => {
                    txn.set_kv(&rk, &RecordValue::new(RecordType::SetEle, 0, 0, ""))?;
                    added += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        meta.count += added;
        let meta_rk = RecordKey::new(db.chunk_id, db_id, RecordType::SetMeta, key.clone(), "");
        let meta_rv = RecordValue::new(
            RecordType::SetMeta,
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

pub fn scard_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    match load_set_meta(&db, sess, &key)? {
        Some((meta, _)) => Ok(RespValue::Integer(meta.count as i64)),
        None => Ok(RespValue::Integer(0)),
    }
}

pub fn smembers_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    if load_set_meta(&db, sess, &key)?.is_none() {
        return Ok(RespValue::Array(Vec::new()));
    }

    let txn = db.store.create_transaction();
    let probe = RecordKey::new(db.chunk_id, sess.ctx().db_id(), RecordType::SetEle, key, "");
    let prefix = probe.prefix_pk();
    let mut cursor = txn.create_cursor();
    cursor.seek(&prefix);
    let mut members = Vec::new();
    loop {
        let record = match cursor.next() {
            Ok(record) => record,
            Err(StoreError::Exhaust) => break,
            Err(e) => return Err(e.into()),
        };
        if !record.record_key().encode().starts_with(&prefix) {
            break;
        }
        members.push(RespValue::bulk(record.record_key().secondary_key().to_vec()));
    }
    Ok(RespValue::Array(members))
}
