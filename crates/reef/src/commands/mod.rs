//! Command registry and shared command plumbing

mod dump;
mod hash;
mod list;
mod set;
mod string;
mod zset;

use crate::segment::DbSlice;
use crate::server::ServerEntry;
use crate::session::Session;
use rdb::RdbError;
use resp::RespValue;
use std::time::{SystemTime, UNIX_EPOCH};
use storage::{RecordKey, RecordType, RecordValue, StoreError};

/// How many times a read-modify-write command retries a lost commit race.
pub const RETRY_CNT: usize = 3;

/// Command failure surfaced to the client. `Display` renders the exact
/// reply line, prefix included.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("BUSYKEY Target key name already exists.")]
    BusyKey,
    #[error("ERR Invalid TTL value, must be >= 0")]
    InvalidTtl,
    #[error("ERR DUMP payload version or checksum are wrong")]
    BadPayload,
    #[error("ERR no such key")]
    NotFound,
    #[error("ERR no such key")]
    Expired,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR {0}")]
    Parse(String),
    #[error("ERR {0}")]
    Store(#[from] StoreError),
    #[error("ERR {0}")]
    Rdb(#[from] RdbError),
    #[error("ERR {0}")]
    Internal(String),
}

pub type CommandResult = Result<RespValue, CommandError>;

/// Command handler signature.
pub type CmdFn = fn(&ServerEntry, &mut Session) -> CommandResult;

/// Static command descriptor, Redis-style: non-negative arity is exact,
/// negative means "at least".
pub struct CommandDef {
    pub name: &'static str,
    pub arity: i32,
    pub flags: &'static str,
    pub handler: CmdFn,
}

impl CommandDef {
    pub fn arity_ok(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= (-self.arity) as usize
        }
    }
}

/// The full command table.
pub fn command_table() -> Vec<CommandDef> {
    vec![
        CommandDef { name: "ping", arity: -1, flags: "r", handler: ping_cmd },
        CommandDef { name: "set", arity: 3, flags: "wm", handler: string::set_cmd },
        CommandDef { name: "get", arity: 2, flags: "r", handler: string::get_cmd },
        CommandDef { name: "del", arity: -2, flags: "w", handler: string::del_cmd },
        CommandDef { name: "type", arity: 2, flags: "r", handler: string::type_cmd },
        CommandDef { name: "rpush", arity: -3, flags: "wm", handler: list::rpush_cmd },
        CommandDef { name: "llen", arity: 2, flags: "r", handler: list::llen_cmd },
        CommandDef { name: "lrange", arity: 4, flags: "r", handler: list::lrange_cmd },
        CommandDef { name: "sadd", arity: -3, flags: "wm", handler: set::sadd_cmd },
        CommandDef { name: "scard", arity: 2, flags: "r", handler: set::scard_cmd },
        CommandDef { name: "smembers", arity: 2, flags: "r", handler: set::smembers_cmd },
        CommandDef { name: "hset", arity: -4, flags: "wm", handler: hash::hset_cmd },
        CommandDef { name: "hgetall", arity: 2, flags: "r", handler: hash::hgetall_cmd },
        CommandDef { name: "zadd", arity: -4, flags: "wm", handler: zset::zadd_cmd },
        CommandDef { name: "zcard", arity: 2, flags: "r", handler: zset::zcard_cmd },
        CommandDef { name: "zscore", arity: 3, flags: "r", handler: zset::zscore_cmd },
        CommandDef { name: "dump", arity: 2, flags: "r", handler: dump::dump_cmd },
        CommandDef { name: "dumpx", arity: -3, flags: "r", handler: dump::dumpx_cmd },
        CommandDef { name: "restore", arity: -4, flags: "wm", handler: dump::restore_cmd },
        CommandDef { name: "restorex", arity: -4, flags: "wm", handler: dump::restorex_cmd },
    ]
}

fn ping_cmd(_server: &ServerEntry, sess: &mut Session) -> CommandResult {
    match sess.args().get(1) {
        Some(msg) => Ok(RespValue::bulk(msg.clone())),
        None => Ok(RespValue::SimpleString(bytes::Bytes::from_static(b"PONG"))),
    }
}

/// Milliseconds since the Unix epoch.
pub fn ms_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Look up the key's primary record, applying lazy expiry.
///
/// `NotFound` when the key has no primary record, `Expired` when it had one
/// whose ttl has passed (the key's records are deleted on the spot).
pub fn expire_key_if_needed(
    db: &DbSlice,
    sess: &Session,
    key: &[u8],
) -> Result<RecordValue, CommandError> {
    let txn = db.store.create_transaction();
    let meta_rk = RecordKey::new(db.chunk_id, sess.ctx().db_id(), RecordType::DataMeta, key, "");
    let rv = match txn.get_kv(&meta_rk) {
        Ok(rv) => rv,
        Err(StoreError::NotFound) => return Err(CommandError::NotFound),
        Err(e) => return Err(e.into()),
    };
    drop(txn);
    if rv.ttl_ms() != 0 && rv.ttl_ms() <= ms_since_epoch() {
        del_key(db, sess.ctx().db_id(), key)?;
        return Err(CommandError::Expired);
    }
    Ok(rv)
}

const ELEMENT_TYPES: [RecordType; 5] = [
    RecordType::ListEle,
    RecordType::HashEle,
    RecordType::SetEle,
    RecordType::ZsetSEle,
    RecordType::ZsetHEle,
];

/// Delete a key's primary record and every element record, atomically.
pub fn del_key(db: &DbSlice, db_id: u32, key: &[u8]) -> Result<(), CommandError> {
    for attempt in 0..RETRY_CNT {
        let mut txn = db.store.create_transaction();
        let meta_rk = RecordKey::new(db.chunk_id, db_id, RecordType::DataMeta, key, "");
        txn.del_kv(&meta_rk)?;
        for ele_type in ELEMENT_TYPES {
            let probe = RecordKey::new(db.chunk_id, db_id, ele_type, key, "");
            let prefix = probe.prefix_pk();
            let mut cursor = txn.create_cursor();
            cursor.seek(&prefix);
            let mut doomed = Vec::new();
            loop {
                let record = match cursor.next() {
                    Ok(record) => record,
                    Err(StoreError::Exhaust) => break,
                    Err(e) => return Err(e.into()),
                };
                if !record.record_key().encode().starts_with(&prefix) {
                    break;
                }
                doomed.push(record.record_key().clone());
            }
            for rk in &doomed {
                txn.del_kv(rk)?;
            }
        }
        match txn.commit() {
            Ok(_) => return Ok(()),
            Err(StoreError::CommitRetry) if attempt + 1 < RETRY_CNT => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::Internal("not reachable".to_string()))
}

/// Parse an argument that must be valid UTF-8.
pub fn arg_str<'a>(args: &'a [Vec<u8>], index: usize) -> Result<&'a str, CommandError> {
    std::str::from_utf8(&args[index])
        .map_err(|_| CommandError::Parse("invalid argument encoding".to_string()))
}

/// Parse an integer argument.
pub fn arg_i64(args: &[Vec<u8>], index: usize) -> Result<i64, CommandError> {
    arg_str(args, index)?
        .parse::<i64>()
        .map_err(|_| CommandError::Parse("value is not an integer or out of range".to_string()))
}

/// Parse a score argument.
pub fn arg_f64(args: &[Vec<u8>], index: usize) -> Result<f64, CommandError> {
    arg_str(args, index)?
        .parse::<f64>()
        .map_err(|_| CommandError::Parse("value is not a valid float".to_string()))
}

/// Render a score the way Redis replies with it: integral scores lose the
/// fraction part.
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}
