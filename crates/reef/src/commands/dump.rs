//! DUMP / DUMPX / RESTORE / RESTOREX
//!
//! DUMP serializes one key's value into a Redis-compatible RDB payload;
//! RESTORE parses such a payload back into the key's record set. DUMPX
//! batches payloads for several (dbid, key) pairs into one reply shaped
//! like a RESTOREX command, with a version-epoch hint ahead of each
//! payload so the receiving side learns the source epoch.
//!
//! Serializers read child records through exactly one transaction so each
//! payload reflects a consistent snapshot. Deserializers write everything
//! inside one transaction committed last; the string and sorted-set paths
//! retry lost commit races, the rest commit once. The sorted-set restore
//! commits its meta and head sentinel first and then feeds the member map
//! through the shared ZADD helper, so a failure in the second step leaves
//! an empty sorted set behind; callers see that partial outcome.

use super::{
    del_key, expire_key_if_needed, ms_since_epoch, CommandError, CommandResult, RETRY_CNT,
};
use crate::commands::list::list_ele_key;
use crate::commands::zset::{create_empty_zset, zset_meta_key};
use crate::segment::{DbSlice, LockMode};
use crate::server::ServerEntry;
use crate::session::Session;
use bytes::Bytes;
use rdb::encoding::{load_len, load_string, save_len, save_string};
use rdb::{envelope, ziplist, DumpType, ReadBuf, WriteBuf};
use resp::RespValue;
use std::collections::BTreeMap;
use storage::{
    generic_zadd, HashMetaValue, ListMetaValue, RecordKey, RecordType, RecordValue, SetMetaValue,
    SkipList, StoreError, ZaddFlag, ZslMetaValue, INIT_SEQ,
};
use tracing::{debug, error};

/// Upper bound on a ziplist's pre-compression element bytes.
pub const ZLBYTE_LIMIT: usize = 8 * 1024;

/// Serializes one key's value into an RDB payload.
///
/// After `dump` returns, the payload proper is the `[begin, end)` slice of
/// the buffer: the quicklist body reserves nine bytes for its ziplist
/// count and absorbs the unused part of the reservation by sliding the
/// logical start forward.
struct Serializer<'a> {
    server: &'a ServerEntry,
    sess: &'a Session,
    key: &'a [u8],
    dump_type: DumpType,
    rv: RecordValue,
    begin: usize,
    end: usize,
}

impl<'a> Serializer<'a> {
    fn new(
        server: &'a ServerEntry,
        sess: &'a Session,
        key: &'a [u8],
        dump_type: DumpType,
        rv: RecordValue,
    ) -> Self {
        Self {
            server,
            sess,
            key,
            dump_type,
            rv,
            begin: 0,
            end: 0,
        }
    }

    /// Build the full payload. `prefix_ver` prepends the value's version
    /// epoch as a length-encoded hint (DUMPX only).
    fn dump(&mut self, prefix_ver: bool) -> Result<Vec<u8>, CommandError> {
        let mut buf = WriteBuf::new();
        if prefix_ver {
            save_len(&mut buf, self.rv.version_ep());
        }
        buf.put_u8(self.dump_type as u8);

        self.dump_object(&mut buf)?;

        // Footer: two bytes RDB version, eight bytes CRC64, little endian,
        // the CRC covering everything from the logical start.
        envelope::append_trailer(&mut buf, self.begin);
        self.end = buf.pos();
        Ok(buf.into_vec())
    }

    fn dump_object(&mut self, buf: &mut WriteBuf) -> Result<(), CommandError> {
        match self.dump_type {
            DumpType::String => self.dump_kv(buf),
            DumpType::Set => self.dump_set(buf),
            DumpType::Zset => self.dump_zset(buf),
            DumpType::Hash => self.dump_hash(buf),
            DumpType::Quicklist => self.dump_list(buf),
        }
    }

    fn dump_kv(&mut self, buf: &mut WriteBuf) -> Result<(), CommandError> {
        save_string(buf, self.rv.value());
        Ok(())
    }

    fn dump_set(&mut self, buf: &mut WriteBuf) -> Result<(), CommandError> {
        let meta = SetMetaValue::decode(self.rv.value())?;
        if meta.count == 0 {
            return Err(CommandError::Internal("empty set cannot be dumped".to_string()));
        }
        save_len(buf, meta.count);

        let db = self.server.segment_mgr().get_db_has_locked(self.key);
        let txn = db.store.create_transaction();
        let probe = RecordKey::new(
            db.chunk_id,
            self.sess.ctx().db_id(),
            RecordType::SetEle,
            self.key,
            "",
        );
        let prefix = probe.prefix_pk();
        let mut cursor = txn.create_cursor();
        cursor.seek(&prefix);
        loop {
            let record = match cursor.next() {
                Ok(record) => record,
                Err(StoreError::Exhaust) => break,
                Err(e) => return Err(e.into()),
            };
            if !record.record_key().encode().starts_with(&prefix) {
                break;
            }
            save_string(buf, record.record_key().secondary_key());
        }
        Ok(())
    }

    fn dump_hash(&mut self, buf: &mut WriteBuf) -> Result<(), CommandError> {
        let meta = HashMetaValue::decode(self.rv.value())?;
        save_len(buf, meta.count);

        let db = self.server.segment_mgr().get_db_has_locked(self.key);
        let txn = db.store.create_transaction();
        let probe = RecordKey::new(
            db.chunk_id,
            self.sess.ctx().db_id(),
            RecordType::HashEle,
            self.key,
            "",
        );
        let prefix = probe.prefix_pk();
        let mut cursor = txn.create_cursor();
        cursor.seek(&prefix);
        loop {
            let record = match cursor.next() {
                Ok(record) => record,
                Err(StoreError::Exhaust) => break,
                Err(e) => return Err(e.into()),
            };
            if !record.record_key().encode().starts_with(&prefix) {
                break;
            }
            save_string(buf, record.record_key().secondary_key());
            save_string(buf, record.record_value().value());
        }
        Ok(())
    }

    fn dump_zset(&mut self, buf: &mut WriteBuf) -> Result<(), CommandError> {
        let db = self.server.segment_mgr().get_db_has_locked(self.key);
        let txn = db.store.create_transaction();
        let meta = ZslMetaValue::decode(self.rv.value())?;
        let list = SkipList::new(db.chunk_id, self.sess.ctx().db_id(), self.key, meta);

        let count = list.count() as u64 - 1;
        save_len(buf, count);

        // Highest rank first; score as the raw binary64 image.
        let elements = list.scan_by_rank(0, count, true, &txn)?;
        for (score, member) in elements {
            save_string(buf, &member);
            buf.put_f64_le(score);
        }
        Ok(())
    }

    fn dump_list(&mut self, buf: &mut WriteBuf) -> Result<(), CommandError> {
        // The ziplist count's encoded width is unknown until the body is
        // built: reserve the widest length form and slide the prefix
        // afterwards if a narrower one sufficed.
        let not_aligned = buf.pos();
        buf.advance(9);

        let meta = ListMetaValue::decode(self.rv.value())?;
        if meta.is_empty() {
            return Err(CommandError::Internal("empty list cannot be dumped".to_string()));
        }
        let len = meta.len();
        if len > u16::MAX as u64 {
            return Err(CommandError::Internal(
                "list too long to dump".to_string(),
            ));
        }

        let db = self.server.segment_mgr().get_db_has_locked(self.key);
        let txn = db.store.create_transaction();

        let mut zl_cnt = 0u64;
        let mut byte_sz = 0usize;
        let mut entries: Vec<Vec<u8>> = Vec::new();
        for index in meta.head..meta.tail {
            let rk = list_ele_key(&db, self.sess.ctx().db_id(), self.key, index);
            let value = txn.get_kv(&rk)?.into_value();
            if byte_sz + value.len() > ZLBYTE_LIMIT && !entries.is_empty() {
                zl_cnt += 1;
                save_string(buf, &ziplist::encode(&entries));
                entries.clear();
                byte_sz = 0;
            }
            byte_sz += value.len();
            entries.push(value);
        }
        if !entries.is_empty() {
            zl_cnt += 1;
            save_string(buf, &ziplist::encode(&entries));
        }

        // Patch the actual count into the reservation.
        let body_end = buf.pos();
        buf.set_pos(not_aligned);
        let used = save_len(buf, zl_cnt);
        buf.set_pos(body_end);
        if used < 9 {
            buf.copy_within(0..not_aligned + used, 9 - used);
            self.begin = 9 - used;
        }
        Ok(())
    }
}

/// Pick the serializer for whatever the key holds.
fn get_serializer<'a>(
    server: &'a ServerEntry,
    sess: &'a Session,
    key: &'a [u8],
) -> Result<Serializer<'a>, CommandError> {
    let db = server.segment_mgr().get_db_has_locked(key);
    let rv = expire_key_if_needed(&db, sess, key)?;
    let dump_type = match rv.record_type() {
        RecordType::Kv => DumpType::String,
        RecordType::ListMeta => DumpType::Quicklist,
        RecordType::HashMeta => DumpType::Hash,
        RecordType::SetMeta => DumpType::Set,
        RecordType::ZsetMeta => DumpType::Zset,
        _ => return Err(CommandError::WrongType),
    };
    Ok(Serializer::new(server, sess, key, dump_type, rv))
}

pub fn dump_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let key = sess.args()[1].clone();
    let (_db, _lock) = server.segment_mgr().get_db_with_key_lock(&key, LockMode::Read);

    let mut serializer = match get_serializer(server, sess, &key) {
        Ok(serializer) => serializer,
        Err(CommandError::NotFound) | Err(CommandError::Expired) => return Ok(RespValue::Null),
        Err(e) => return Err(e),
    };
    let payload = serializer.dump(false)?;
    Ok(RespValue::bulk(
        payload[serializer.begin..serializer.end].to_vec(),
    ))
}

pub fn dumpx_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let args = sess.args().to_vec();
    if (args.len() - 1) % 2 != 0 {
        return Err(CommandError::WrongArity("dumpx"));
    }
    let key_indices: Vec<usize> = (2..args.len()).step_by(2).collect();
    let _locks = server
        .segment_mgr()
        .get_all_keys_locked(&args, &key_indices, LockMode::Read);

    let mut triples: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)> = Vec::with_capacity(key_indices.len());
    for &i in &key_indices {
        let dbid: u32 = super::arg_str(&args, i - 1)?
            .parse()
            .map_err(|_| CommandError::Parse("invalid db id".to_string()))?;
        if sess.ctx().db_id() != dbid {
            sess.ctx_mut().set_db_id(dbid);
        }

        let mut serializer = match get_serializer(server, sess, &args[i]) {
            Ok(serializer) => serializer,
            // Missing or expired keys contribute no triple.
            Err(CommandError::NotFound) | Err(CommandError::Expired) => {
                debug!(key = ?args[i], "dumpx skipping absent key");
                continue;
            }
            Err(e) => return Err(e),
        };
        let payload = serializer.dump(true)?;
        triples.push((
            args[i - 1].clone(),
            args[i].clone(),
            payload[serializer.begin..serializer.end].to_vec(),
        ));
    }

    let mut reply = Vec::with_capacity(1 + 3 * triples.len());
    reply.push(RespValue::bulk(Bytes::from_static(b"RESTOREX")));
    for (dbid, key, payload) in triples {
        reply.push(RespValue::bulk(dbid));
        reply.push(RespValue::bulk(key));
        reply.push(RespValue::bulk(payload));
    }
    Ok(RespValue::Array(reply))
}

/// Reconstructs one key from an RDB payload.
struct Deserializer<'a> {
    server: &'a ServerEntry,
    sess: &'a Session,
    payload: &'a [u8],
    key: &'a [u8],
    /// Absolute expiry in ms, 0 for none.
    ttl_ms: u64,
}

impl<'a> Deserializer<'a> {
    fn new(
        server: &'a ServerEntry,
        sess: &'a Session,
        payload: &'a [u8],
        key: &'a [u8],
        ttl_ms: u64,
    ) -> Self {
        Self {
            server,
            sess,
            payload,
            key,
            ttl_ms,
        }
    }

    fn restore(&self) -> Result<(), CommandError> {
        let mut r = ReadBuf::new(self.payload);
        let dump_type = DumpType::from_u8(r.get_u8()?)?;
        match dump_type {
            DumpType::String => self.restore_kv(&mut r),
            DumpType::Set => self.restore_set(&mut r),
            DumpType::Zset => self.restore_zset(&mut r),
            DumpType::Hash => self.restore_hash(&mut r),
            DumpType::Quicklist => self.restore_list(&mut r),
        }
    }

    fn db(&self) -> DbSlice {
        self.server.segment_mgr().get_db_has_locked(self.key)
    }

    fn restore_kv(&self, r: &mut ReadBuf) -> Result<(), CommandError> {
        let value = load_string(r)?;
        let db = self.db();
        let rk = RecordKey::new(
            db.chunk_id,
            self.sess.ctx().db_id(),
            RecordType::Kv,
            self.key,
            "",
        );
        let rv = RecordValue::new(
            RecordType::Kv,
            self.sess.ctx().version_ep(),
            self.ttl_ms,
            value,
        );
        for attempt in 0..RETRY_CNT {
            let mut txn = db.store.create_transaction();
            txn.set_kv(&rk, &rv)?;
            match txn.commit() {
                Ok(_) => return Ok(()),
                Err(StoreError::CommitRetry) if attempt + 1 < RETRY_CNT => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CommandError::Internal("not reachable".to_string()))
    }

    fn restore_set(&self, r: &mut ReadBuf) -> Result<(), CommandError> {
        let (count, _) = load_len(r)?;
        let db = self.db();
        let db_id = self.sess.ctx().db_id();
        let mut txn = db.store.create_transaction();

        for _ in 0..count {
            let member = load_string(r)?;
            let rk = RecordKey::new(db.chunk_id, db_id, RecordType::SetEle, self.key, member);
            txn.set_kv(&rk, &RecordValue::new(RecordType::SetEle, 0, 0, ""))?;
        }

        let meta_rk = RecordKey::new(db.chunk_id, db_id, RecordType::SetMeta, self.key, "");
        let meta_rv = RecordValue::new(
            RecordType::SetMeta,
            self.sess.ctx().version_ep(),
            self.ttl_ms,
            SetMetaValue::new(count).encode(),
        );
        txn.set_kv(&meta_rk, &meta_rv)?;
        txn.commit()?;
        Ok(())
    }

    fn restore_hash(&self, r: &mut ReadBuf) -> Result<(), CommandError> {
        let (count, _) = load_len(r)?;
        let db = self.db();
        let db_id = self.sess.ctx().db_id();
        let mut txn = db.store.create_transaction();

        for _ in 0..count {
            let field = load_string(r)?;
            let value = load_string(r)?;
            let rk = RecordKey::new(db.chunk_id, db_id, RecordType::HashEle, self.key, field);
            txn.set_kv(&rk, &RecordValue::new(RecordType::HashEle, 0, 0, value))?;
        }

        let meta_rk = RecordKey::new(db.chunk_id, db_id, RecordType::HashMeta, self.key, "");
        let meta_rv = RecordValue::new(
            RecordType::HashMeta,
            self.sess.ctx().version_ep(),
            self.ttl_ms,
            HashMetaValue::new(count).encode(),
        );
        txn.set_kv(&meta_rk, &meta_rv)?;
        txn.commit()?;
        Ok(())
    }

    fn restore_zset(&self, r: &mut ReadBuf) -> Result<(), CommandError> {
        let (count, _) = load_len(r)?;
        // Duplicate members in the payload resolve last-write-wins.
        let mut score_map: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
        for _ in 0..count {
            let member = load_string(r)?;
            let score = r.get_f64_le()?;
            score_map.insert(member, score);
        }

        let db = self.db();
        let db_id = self.sess.ctx().db_id();
        // The key was cleared before restore started; a surviving meta
        // means the precondition broke.
        let txn = db.store.create_transaction();
        match txn.get_kv(&zset_meta_key(&db, db_id, self.key)) {
            Err(StoreError::NotFound) => {}
            Ok(_) => {
                return Err(CommandError::Internal(
                    "zset meta already exists".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }
        drop(txn);
        create_empty_zset(&db, db_id, self.key, self.sess.ctx().version_ep(), self.ttl_ms)?;

        let meta_rk = zset_meta_key(&db, db_id, self.key);
        for attempt in 0..RETRY_CNT {
            match generic_zadd(&db.store, &meta_rk, &score_map, ZaddFlag::Nx) {
                Ok(_) => return Ok(()),
                Err(StoreError::CommitRetry) if attempt + 1 < RETRY_CNT => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CommandError::Internal("not reachable".to_string()))
    }

    fn restore_list(&self, r: &mut ReadBuf) -> Result<(), CommandError> {
        let (zl_count, _) = load_len(r)?;
        let db = self.db();
        let db_id = self.sess.ctx().db_id();
        let mut txn = db.store.create_transaction();

        let mut meta = ListMetaValue::new(INIT_SEQ, INIT_SEQ);
        for _ in 0..zl_count {
            let blob = load_string(r)?;
            let entries = ziplist::decode(&blob).map_err(|e| {
                error!(key = ?self.key, "restore list failed: {}", e);
                e
            })?;
            for entry in entries {
                let rk = list_ele_key(&db, db_id, self.key, meta.tail);
                txn.set_kv(&rk, &RecordValue::new(RecordType::ListEle, 0, 0, entry))?;
                meta.tail += 1;
            }
        }

        let meta_rk = RecordKey::new(db.chunk_id, db_id, RecordType::ListMeta, self.key, "");
        let meta_rv = RecordValue::new(
            RecordType::ListMeta,
            self.sess.ctx().version_ep(),
            self.ttl_ms,
            meta.encode(),
        );
        txn.set_kv(&meta_rk, &meta_rv)?;
        txn.commit()?;
        Ok(())
    }
}

pub fn restore_cmd(server: &ServerEntry, sess: &mut Session) -> CommandResult {
    let args = sess.args().to_vec();
    let key = &args[1];
    let mut replace = false;
    for opt in &args[4..] {
        if opt.eq_ignore_ascii_case(b"replace") {
            replace = true;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let _locks = server
        .segment_mgr()
        .get_all_keys_locked(&args, &[1], LockMode::Write);
    let db = server.segment_mgr().get_db_has_locked(key);

    match expire_key_if_needed(&db, sess, key) {
        Ok(_) => {
            if replace {
                del_key(&db, sess.ctx().db_id(), key)?;
            } else {
                return Err(CommandError::BusyKey);
            }
        }
        Err(CommandError::NotFound) | Err(CommandError::Expired) => {}
        Err(e) => return Err(e),
    }

    let ttl = super::arg_i64(&args, 2)?;
    if ttl < 0 {
        return Err(CommandError::InvalidTtl);
    }
    let ttl_ms = if ttl != 0 {
        ms_since_epoch() + ttl as u64
    } else {
        0
    };

    let payload = &args[3];
    envelope::verify_payload(payload).map_err(|_| CommandError::BadPayload)?;

    Deserializer::new(server, sess, payload, key, ttl_ms).restore()?;
    Ok(RespValue::ok())
}

/// Batch restore endpoint. Accepted for wire compatibility with DUMPX
/// peers; the triples are not applied yet.
pub fn restorex_cmd(_server: &ServerEntry, _sess: &mut Session) -> CommandResult {
    Ok(RespValue::ok())
}
