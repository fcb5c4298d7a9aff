//! String commands plus the generic key commands

use super::{del_key, expire_key_if_needed, CommandError, CommandResult};
use crate::segment::LockMode;
use crate::server::ServerEntry;
use crate::session::Session;
use bytes::Bytes;
use resp::RespValue;
use storage::{RecordKey, RecordType, RecordValue, StoreError};

pub fn set_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let value = sess.args()[2].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Write);

    // SET replaces whatever the key held, aggregate element records included.
    match expire_key_if_needed(&db, sess, &key) {
        Ok(rv) if rv.record_type() != RecordType::Kv => del_key(&db, sess.ctx().db_id(), &key)?,
        Ok(_) => {}
        Err(CommandError::NotFound) | Err(CommandError::Expired) => {}
        Err(e) => return Err(e),
    }

    let rk = RecordKey::new(db.chunk_id, sess.ctx().db_id(), RecordType::Kv, key, "");
    let rv = RecordValue::new(RecordType::Kv, sess.ctx().version_ep(), 0, value);
    for attempt in 0..super::RETRY_CNT {
        let mut txn = db.store.create_transaction();
        txn.set_kv(&rk, &rv)?;
        match txn.commit() {
            Ok(_) => return Ok(RespValue::ok()),
            Err(StoreError::CommitRetry) if attempt + 1 < super::RETRY_CNT => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::Internal("not reachable".to_string()))
}

pub fn get_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    let rv = match expire_key_if_needed(&db, sess, &key) {
        Ok(rv) => rv,
        Err(CommandError::NotFound) | Err(CommandError::Expired) => return Ok(RespValue::Null),
        Err(e) => return Err(e),
    };
    if rv.record_type() != RecordType::Kv {
        return Err(CommandError::WrongType);
    }
    Ok(RespValue::bulk(rv.into_value()))
}

pub fn del_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let keys: Vec<Vec<u8>> = sess.args()[1..].to_vec();
    let mut deleted = 0i64;
    for key in keys {
        let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Write);
        match expire_key_if_needed(&db, sess, &key) {
            Ok(_) => {
                del_key(&db, sess.ctx().db_id(), &key)?;
                deleted += 1;
            }
            Err(CommandError::NotFound) | Err(CommandError::Expired) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(RespValue::Integer(deleted))
}

pub fn type_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);
    let name = match expire_key_if_needed(&db, sess, &key) {
        Ok(rv) => match rv.record_type() {
            RecordType::Kv => "string",
            RecordType::ListMeta => "list",
            RecordType::HashMeta => "hash",
            RecordType::SetMeta => "set",
            RecordType::ZsetMeta => "zset",
            _ => "none",
        },
        Err(CommandError::NotFound) | Err(CommandError::Expired) => "none",
        Err(e) => return Err(e),
    };
    Ok(RespValue::SimpleString(Bytes::from_static(name.as_bytes())))
}
