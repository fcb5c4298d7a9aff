//! List commands
//!
//! A list is a meta record holding `[head, tail)` plus one element record
//! per index; pushes extend the range on either side.

use super::{expire_key_if_needed, CommandError, CommandResult, RETRY_CNT};
use crate::segment::{DbSlice, LockMode};
use crate::server::ServerEntry;
use crate::session::Session;
use resp::RespValue;
use storage::{ListMetaValue, RecordKey, RecordType, RecordValue, StoreError, INIT_SEQ};

/// Element record address for one list index.
pub fn list_ele_key(db: &DbSlice, db_id: u32, key: &[u8], index: u64) -> RecordKey {
    RecordKey::new(
        db.chunk_id,
        db_id,
        RecordType::ListEle,
        key,
        index.to_string(),
    )
}

fn load_list_meta(
    db: &DbSlice,
    sess: &Session,
    key: &[u8],
) -> Result<Option<(ListMetaValue, RecordValue)>, CommandError> {
    match expire_key_if_needed(db, sess, key) {
        Ok(rv) if rv.record_type() == RecordType::ListMeta => {
            Ok(Some((ListMetaValue::decode(rv.value())?, rv)))
        }
        Ok(_) => Err(CommandError::WrongType),
        Err(CommandError::NotFound) | Err(CommandError::Expired) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn rpush_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let values: Vec<Vec<u8>> = sess.args()[2..].to_vec();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Write);
    let db_id = sess.ctx().db_id();

    for attempt in 0..RETRY_CNT {
        let (mut meta, ttl_ms) = match load_list_meta(&db, sess, &key)? {
            Some((meta, rv)) => (meta, rv.ttl_ms()),
            None => (ListMetaValue::new(INIT_SEQ, INIT_SEQ), 0),
        };

        let mut txn = db.store.create_transaction();
        for value in &values {
            let rk = list_ele_key(&db, db_id, &key, meta.tail);
            let rv = RecordValue::new(RecordType::ListEle, 0, 0, value.clone());
            txn.set_kv(&rk, &rv)?;
            meta.tail += 1;
        }
        let meta_rk = RecordKey::new(db.chunk_id, db_id, RecordType::ListMeta, key.clone(), "");
        let meta_rv = RecordValue::new(
            RecordType::ListMeta,
            sess.ctx().version_ep(),
            ttl_ms,
            meta.encode(),
        );
        txn.set_kv(&meta_rk, &meta_rv)?;
        match txn.commit() {
            Ok(_) => return Ok(RespValue::Integer(meta.len() as i64)),
            Err(StoreError::CommitRetry) if attempt + 1 < RETRY_CNT => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::Internal("not reachable".to_string()))
}

pub fn llen_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    match load_list_meta(&db, sess, &key)? {
        Some((meta, _)) => Ok(RespValue::Integer(meta.len() as i64)),
        None => Ok(RespValue::Integer(0)),
    }
}

pub fn lrange_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let start = super::arg_i64(sess.args(), 2)?;
    let stop = super::arg_i64(sess.args(), 3)?;
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);

    let (meta, _) = match load_list_meta(&db, sess, &key)? {
        Some(found) => found,
        None => return Ok(RespValue::Array(Vec::new())),
    };
    let len = meta.len() as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    start = start.max(0);
    stop = stop.min(len - 1);
    if start > stop || len == 0 {
        return Ok(RespValue::Array(Vec::new()));
    }

    let txn = db.store.create_transaction();
    let mut items = Vec::with_capacity((stop - start + 1) as usize);
    for offset in start..=stop {
        let rk = list_ele_key(&db, sess.ctx().db_id(), &key, meta.head + offset as u64);
        let rv = txn.get_kv(&rk)?;
        items.push(RespValue::bulk(rv.into_value()));
    }
    Ok(RespValue::Array(items))
}
