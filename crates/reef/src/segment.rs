//! Segment manager: key routing and per-key locking
//!
//! Keys are routed to chunks by CRC16 (XMODEM, the Redis cluster slot
//! function) modulo the configured chunk count. Each chunk has one RwLock;
//! a command takes the locks for every key it touches before its body runs
//! and drops them with scope. Batch lock acquisition sorts the chunk ids
//! first so concurrent batch commands cannot deadlock.

use crc::{Crc, CRC_16_XMODEM};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use storage::KvEngine;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Lock mode for a command's keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// The store slice a key routes to.
#[derive(Clone)]
pub struct DbSlice {
    pub chunk_id: u32,
    pub store: KvEngine,
}

enum KeyLockGuard {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// A held chunk lock; released on drop.
pub struct KeyLock {
    _guard: KeyLockGuard,
}

/// Routes keys to chunks and hands out chunk locks.
pub struct SegmentMgr {
    store: KvEngine,
    locks: Vec<Arc<RwLock<()>>>,
    chunk_count: u32,
}

impl SegmentMgr {
    pub fn new(store: KvEngine, chunk_count: u32) -> Self {
        let locks = (0..chunk_count)
            .map(|_| Arc::new(RwLock::new(())))
            .collect();
        Self {
            store,
            locks,
            chunk_count,
        }
    }

    pub fn chunk_for_key(&self, key: &[u8]) -> u32 {
        CRC16.checksum(key) as u32 % self.chunk_count
    }

    fn lock_chunk(&self, chunk_id: u32, mode: LockMode) -> KeyLock {
        let lock = &self.locks[chunk_id as usize];
        let guard = match mode {
            LockMode::Read => KeyLockGuard::Read(lock.read_arc()),
            LockMode::Write => KeyLockGuard::Write(lock.write_arc()),
        };
        KeyLock { _guard: guard }
    }

    /// Lock the key's chunk and return its store slice.
    pub fn get_db_with_key_lock(&self, key: &[u8], mode: LockMode) -> (DbSlice, KeyLock) {
        let chunk_id = self.chunk_for_key(key);
        let lock = self.lock_chunk(chunk_id, mode);
        (
            DbSlice {
                chunk_id,
                store: self.store.clone(),
            },
            lock,
        )
    }

    /// Store slice for a key whose chunk the caller already holds locked.
    pub fn get_db_has_locked(&self, key: &[u8]) -> DbSlice {
        DbSlice {
            chunk_id: self.chunk_for_key(key),
            store: self.store.clone(),
        }
    }

    /// Lock the chunks of all keys named by `key_indices` into `args`.
    ///
    /// Chunk ids are deduplicated and locked in ascending order, which
    /// makes the acquisition order global across commands.
    pub fn get_all_keys_locked(
        &self,
        args: &[Vec<u8>],
        key_indices: &[usize],
        mode: LockMode,
    ) -> Vec<KeyLock> {
        let chunks: BTreeSet<u32> = key_indices
            .iter()
            .map(|&i| self.chunk_for_key(&args[i]))
            .collect();
        chunks
            .into_iter()
            .map(|chunk_id| self.lock_chunk(chunk_id, mode))
            .collect()
    }
}
