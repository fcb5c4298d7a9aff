//! End-to-end DUMP / DUMPX / RESTORE / RESTOREX scenarios driven through
//! the command layer.

use rdb::encoding::{load_len, save_len, save_string};
use rdb::{envelope, DumpType, ReadBuf, WriteBuf, RDB_VERSION};
use reef::server::ServerEntry;
use resp::RespValue;
use storage::{ListMetaValue, RecordKey, RecordType, RecordValue, INIT_SEQ};

fn server() -> ServerEntry {
    ServerEntry::new(16)
}

fn exec(server: &ServerEntry, args: &[&[u8]]) -> RespValue {
    server.execute(args.iter().map(|a| a.to_vec()).collect())
}

fn cmd(server: &ServerEntry, args: &[&str]) -> RespValue {
    let raw: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
    exec(server, &raw)
}

fn bulk(reply: &RespValue) -> Vec<u8> {
    match reply {
        RespValue::BulkString(Some(data)) => data.to_vec(),
        other => panic!("expected bulk string, got {:?}", other),
    }
}

fn array(reply: &RespValue) -> &[RespValue] {
    match reply {
        RespValue::Array(items) => items,
        other => panic!("expected array, got {:?}", other),
    }
}

fn assert_error_contains(reply: &RespValue, needle: &str) {
    match reply {
        RespValue::Error(message) => {
            assert!(
                message.contains(needle),
                "error {:?} does not contain {:?}",
                message,
                needle
            );
        }
        other => panic!("expected error containing {:?}, got {:?}", needle, other),
    }
}

#[test]
fn test_string_dump_bytes_and_round_trip() {
    let srv = server();
    assert_eq!(cmd(&srv, &["SET", "s1", "hello"]), RespValue::ok());

    let payload = bulk(&cmd(&srv, &["DUMP", "s1"]));
    // Type tag, 6-bit length 5, raw bytes, version, CRC.
    assert_eq!(payload.len(), 7 + 10);
    assert_eq!(payload[0], DumpType::String as u8);
    assert_eq!(payload[1], 5);
    assert_eq!(&payload[2..7], b"hello");
    assert_eq!(
        u16::from_le_bytes([payload[7], payload[8]]),
        RDB_VERSION
    );
    let crc = envelope::crc64(&payload[..payload.len() - 8]);
    assert_eq!(
        u64::from_le_bytes(payload[payload.len() - 8..].try_into().unwrap()),
        crc
    );

    assert_eq!(cmd(&srv, &["DEL", "s1"]), RespValue::Integer(1));
    assert_eq!(cmd(&srv, &["DUMP", "s1"]), RespValue::Null);
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"s1", b"0", &payload]),
        RespValue::ok()
    );
    assert_eq!(bulk(&cmd(&srv, &["GET", "s1"])), b"hello");
}

#[test]
fn test_empty_list_is_not_dumpable() {
    let srv = server();
    // Plant a degenerate list meta whose tail equals head.
    let db = srv.segment_mgr().get_db_has_locked(b"el");
    let mut txn = db.store.create_transaction();
    let meta_rk = RecordKey::new(db.chunk_id, 0, RecordType::ListMeta, &b"el"[..], &b""[..]);
    let meta_rv = RecordValue::new(
        RecordType::ListMeta,
        0,
        0,
        ListMetaValue::new(INIT_SEQ, INIT_SEQ).encode(),
    );
    txn.set_kv(&meta_rk, &meta_rv).unwrap();
    txn.commit().unwrap();

    assert_error_contains(&cmd(&srv, &["DUMP", "el"]), "empty list");
}

#[test]
fn test_overlong_list_is_not_dumpable() {
    let srv = server();
    // Metadata claiming more elements than one quicklist payload may carry.
    let db = srv.segment_mgr().get_db_has_locked(b"big");
    let mut txn = db.store.create_transaction();
    let meta_rk = RecordKey::new(db.chunk_id, 0, RecordType::ListMeta, &b"big"[..], &b""[..]);
    let meta_rv = RecordValue::new(
        RecordType::ListMeta,
        0,
        0,
        ListMetaValue::new(INIT_SEQ, INIT_SEQ + 70_000).encode(),
    );
    txn.set_kv(&meta_rk, &meta_rv).unwrap();
    txn.commit().unwrap();

    assert_error_contains(&cmd(&srv, &["DUMP", "big"]), "list too long");
}

#[test]
fn test_set_round_trip() {
    let srv = server();
    assert_eq!(cmd(&srv, &["SADD", "s2", "a", "b", "c"]), RespValue::Integer(3));
    let payload = bulk(&cmd(&srv, &["DUMP", "s2"]));
    assert_eq!(payload[0], DumpType::Set as u8);

    cmd(&srv, &["DEL", "s2"]);
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"s2", b"0", &payload]),
        RespValue::ok()
    );
    assert_eq!(cmd(&srv, &["SCARD", "s2"]), RespValue::Integer(3));
    let mut members: Vec<Vec<u8>> = array(&cmd(&srv, &["SMEMBERS", "s2"]))
        .iter()
        .map(bulk)
        .collect();
    members.sort();
    assert_eq!(members, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_hash_round_trip() {
    let srv = server();
    assert_eq!(
        cmd(&srv, &["HSET", "h1", "f1", "v1", "f2", "v2"]),
        RespValue::Integer(2)
    );
    let payload = bulk(&cmd(&srv, &["DUMP", "h1"]));
    assert_eq!(payload[0], DumpType::Hash as u8);

    cmd(&srv, &["DEL", "h1"]);
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"h1", b"0", &payload]),
        RespValue::ok()
    );
    let flat: Vec<Vec<u8>> = array(&cmd(&srv, &["HGETALL", "h1"])).iter().map(bulk).collect();
    let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = flat
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            (b"f1".to_vec(), b"v1".to_vec()),
            (b"f2".to_vec(), b"v2".to_vec()),
        ]
    );
}

#[test]
fn test_zset_round_trip_emits_reverse_rank_order() {
    let srv = server();
    assert_eq!(
        cmd(&srv, &["ZADD", "z1", "1.5", "a", "2", "b"]),
        RespValue::Integer(2)
    );
    let payload = bulk(&cmd(&srv, &["DUMP", "z1"]));
    assert_eq!(payload[0], DumpType::Zset as u8);

    // Body: count, then (member, binary64 score) highest rank first.
    let mut r = ReadBuf::new(&payload[1..payload.len() - 10]);
    let (count, _) = load_len(&mut r).unwrap();
    assert_eq!(count, 2);
    let first = rdb::encoding::load_string(&mut r).unwrap();
    assert_eq!(first, b"b");
    assert_eq!(r.get_f64_le().unwrap(), 2.0);
    let second = rdb::encoding::load_string(&mut r).unwrap();
    assert_eq!(second, b"a");
    assert_eq!(r.get_f64_le().unwrap(), 1.5);

    cmd(&srv, &["DEL", "z1"]);
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"z1", b"0", &payload]),
        RespValue::ok()
    );
    assert_eq!(cmd(&srv, &["ZCARD", "z1"]), RespValue::Integer(2));
    assert_eq!(bulk(&cmd(&srv, &["ZSCORE", "z1", "a"])), b"1.5");
    assert_eq!(bulk(&cmd(&srv, &["ZSCORE", "z1", "b"])), b"2");
}

#[test]
fn test_zset_duplicate_member_last_write_wins() {
    let srv = server();
    // Hand-crafted payload holding (m, 1.0) then (m, 2.0).
    let mut buf = WriteBuf::new();
    buf.put_u8(DumpType::Zset as u8);
    save_len(&mut buf, 2);
    save_string(&mut buf, b"m");
    buf.put_f64_le(1.0);
    save_string(&mut buf, b"m");
    buf.put_f64_le(2.0);
    envelope::append_trailer(&mut buf, 0);
    let payload = buf.into_vec();

    assert_eq!(
        exec(&srv, &[b"RESTORE", b"zdup", b"0", &payload]),
        RespValue::ok()
    );
    assert_eq!(cmd(&srv, &["ZCARD", "zdup"]), RespValue::Integer(1));
    assert_eq!(bulk(&cmd(&srv, &["ZSCORE", "zdup", "m"])), b"2");
}

#[test]
fn test_quicklist_round_trip_splits_ziplists() {
    let srv = server();
    let elements: Vec<String> = (0..1000).map(|i| format!("e{:09}", i)).collect();
    let mut args: Vec<&[u8]> = vec![b"RPUSH", b"l1"];
    for element in &elements {
        args.push(element.as_bytes());
    }
    assert_eq!(exec(&srv, &args), RespValue::Integer(1000));

    let payload = bulk(&cmd(&srv, &["DUMP", "l1"]));
    assert_eq!(payload[0], DumpType::Quicklist as u8);

    // 1000 ten-byte elements against an 8 KiB per-ziplist bound: two
    // ziplists, entries preserved in order.
    let mut r = ReadBuf::new(&payload[1..payload.len() - 10]);
    let (zl_count, _) = load_len(&mut r).unwrap();
    assert_eq!(zl_count, 2);
    let mut decoded = Vec::new();
    for _ in 0..zl_count {
        let blob = rdb::encoding::load_string(&mut r).unwrap();
        decoded.extend(rdb::ziplist::decode(&blob).unwrap());
    }
    assert_eq!(decoded.len(), 1000);
    assert_eq!(decoded[0], elements[0].as_bytes());
    assert_eq!(decoded[999], elements[999].as_bytes());

    cmd(&srv, &["DEL", "l1"]);
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"l1", b"0", &payload]),
        RespValue::ok()
    );
    assert_eq!(cmd(&srv, &["LLEN", "l1"]), RespValue::Integer(1000));
    let restored: Vec<Vec<u8>> = array(&cmd(&srv, &["LRANGE", "l1", "0", "-1"]))
        .iter()
        .map(bulk)
        .collect();
    let expected: Vec<Vec<u8>> = elements.iter().map(|e| e.as_bytes().to_vec()).collect();
    assert_eq!(restored, expected);
}

#[test]
fn test_restore_rejects_tampered_payload() {
    let srv = server();
    cmd(&srv, &["SET", "s1", "some value worth protecting"]);
    let payload = bulk(&cmd(&srv, &["DUMP", "s1"]));
    cmd(&srv, &["DEL", "s1"]);

    for at in [0, 1, payload.len() / 2, payload.len() - 10, payload.len() - 1] {
        let mut bad = payload.clone();
        bad[at] ^= 0x01;
        assert_error_contains(
            &exec(&srv, &[b"RESTORE", b"s1", b"0", &bad]),
            "DUMP payload version or checksum are wrong",
        );
    }
    assert_eq!(cmd(&srv, &["GET", "s1"]), RespValue::Null);
}

#[test]
fn test_restore_rejects_too_new_version() {
    let srv = server();
    let mut buf = WriteBuf::new();
    buf.put_u8(DumpType::String as u8);
    save_string(&mut buf, b"v");
    buf.put_u16_le(RDB_VERSION + 1);
    let crc = envelope::crc64(buf.as_slice());
    buf.put_u64_le(crc);
    let payload = buf.into_vec();

    assert_error_contains(
        &exec(&srv, &[b"RESTORE", b"future", b"0", &payload]),
        "DUMP payload version or checksum are wrong",
    );
}

#[test]
fn test_restore_busykey_and_replace() {
    let srv = server();
    cmd(&srv, &["SET", "k", "original"]);
    let payload = bulk(&cmd(&srv, &["DUMP", "k"]));

    assert_error_contains(&exec(&srv, &[b"RESTORE", b"k", b"0", &payload]), "BUSYKEY");
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"k", b"0", &payload, b"replace"]),
        RespValue::ok()
    );
    assert_eq!(bulk(&cmd(&srv, &["GET", "k"])), b"original");

    // REPLACE swaps across types: a set payload lands over a string key.
    cmd(&srv, &["SADD", "tmp", "x", "y"]);
    let set_payload = bulk(&cmd(&srv, &["DUMP", "tmp"]));
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"k", b"0", &set_payload, b"REPLACE"]),
        RespValue::ok()
    );
    assert_eq!(cmd(&srv, &["SCARD", "k"]), RespValue::Integer(2));

    assert_error_contains(
        &exec(&srv, &[b"RESTORE", b"k2", b"0", &payload, b"bogus"]),
        "syntax error",
    );
}

#[test]
fn test_restore_ttl_handling() {
    let srv = server();
    cmd(&srv, &["SET", "t", "v"]);
    let payload = bulk(&cmd(&srv, &["DUMP", "t"]));
    cmd(&srv, &["DEL", "t"]);

    assert_error_contains(
        &exec(&srv, &[b"RESTORE", b"t", b"-1", &payload]),
        "Invalid TTL value, must be >= 0",
    );

    assert_eq!(
        exec(&srv, &[b"RESTORE", b"t", b"100000", &payload]),
        RespValue::ok()
    );
    assert_eq!(bulk(&cmd(&srv, &["GET", "t"])), b"v");

    cmd(&srv, &["DEL", "t"]);
    assert_eq!(
        exec(&srv, &[b"RESTORE", b"t", b"1", &payload]),
        RespValue::ok()
    );
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(cmd(&srv, &["GET", "t"]), RespValue::Null);
}

#[test]
fn test_dumpx_batches_and_skips_missing_keys() {
    let srv = server();
    cmd(&srv, &["SET", "k1", "v1"]);
    cmd(&srv, &["HSET", "k3", "f", "v"]);

    let reply = cmd(&srv, &["DUMPX", "0", "k1", "0", "missing", "0", "k3"]);
    let items = array(&reply);
    assert_eq!(items.len(), 1 + 3 * 2);
    assert_eq!(bulk(&items[0]), b"RESTOREX");

    assert_eq!(bulk(&items[1]), b"0");
    assert_eq!(bulk(&items[2]), b"k1");
    let payload1 = bulk(&items[3]);
    // Version-epoch hint ahead of the type tag; the envelope still
    // verifies because the CRC covers the hint.
    envelope::verify_payload(&payload1).unwrap();
    let mut r = ReadBuf::new(&payload1);
    let (version_ep, encoded) = load_len(&mut r).unwrap();
    assert!(!encoded);
    assert_eq!(version_ep, 0);
    assert_eq!(r.get_u8().unwrap(), DumpType::String as u8);

    assert_eq!(bulk(&items[4]), b"0");
    assert_eq!(bulk(&items[5]), b"k3");
    let payload3 = bulk(&items[6]);
    let mut r = ReadBuf::new(&payload3);
    load_len(&mut r).unwrap();
    assert_eq!(r.get_u8().unwrap(), DumpType::Hash as u8);

    // Even-length key vectors are malformed.
    assert_error_contains(
        &cmd(&srv, &["DUMPX", "0", "k1", "0"]),
        "wrong number of arguments",
    );

    // The batch-restore endpoint is a stub that acknowledges.
    assert_eq!(
        cmd(&srv, &["RESTOREX", "0", "k1", "payload"]),
        RespValue::ok()
    );
}

#[test]
fn test_dump_wrong_args_and_unknown_command() {
    let srv = server();
    assert_error_contains(&cmd(&srv, &["DUMP"]), "wrong number of arguments");
    assert_error_contains(&cmd(&srv, &["NOSUCH", "x"]), "unknown command");
}
