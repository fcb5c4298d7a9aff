//! Cursor buffers for payload assembly and parsing
//!
//! `WriteBuf` is a growable byte buffer with a running cursor. Writes land
//! at the cursor: past the end they grow the buffer, inside it they
//! overwrite in place. The overwrite path is what lets the quicklist
//! serializer reserve room for a length it only knows after the body is
//! built.
//!
//! `ReadBuf` is the matching read cursor over a borrowed slice; every
//! accessor fails with `OutOfBounds` instead of panicking on short input.

use crate::{RdbError, RdbResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Growable write buffer with a running cursor.
#[derive(Debug, Default)]
pub struct WriteBuf {
    buf: Vec<u8>,
    pos: usize,
}

impl WriteBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor; the target must lie inside the written region.
    pub fn set_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.buf.len());
        self.pos = pos;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Write raw bytes at the cursor, overwriting or growing as needed.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> usize {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        bytes.len()
    }

    pub fn put_u8(&mut self, value: u8) -> usize {
        self.put_bytes(&[value])
    }

    pub fn put_u16_le(&mut self, value: u16) -> usize {
        let mut raw = [0u8; 2];
        LittleEndian::write_u16(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn put_u32_le(&mut self, value: u32) -> usize {
        let mut raw = [0u8; 4];
        LittleEndian::write_u32(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn put_u64_le(&mut self, value: u64) -> usize {
        let mut raw = [0u8; 8];
        LittleEndian::write_u64(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn put_f64_le(&mut self, value: f64) -> usize {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32_be(&mut self, value: u32) -> usize {
        let mut raw = [0u8; 4];
        BigEndian::write_u32(&mut raw, value);
        self.put_bytes(&raw)
    }

    pub fn put_u64_be(&mut self, value: u64) -> usize {
        let mut raw = [0u8; 8];
        BigEndian::write_u64(&mut raw, value);
        self.put_bytes(&raw)
    }

    /// Reserve `n` zero bytes at the cursor and skip over them.
    pub fn advance(&mut self, n: usize) {
        let end = self.pos + n;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.pos = end;
    }

    /// Move `src` to start at `dest`; ranges may overlap.
    pub fn copy_within(&mut self, src: std::ops::Range<usize>, dest: usize) {
        self.buf.copy_within(src, dest);
    }
}

/// Read cursor over a borrowed payload slice.
#[derive(Debug)]
pub struct ReadBuf<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadBuf<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Peek the byte at the cursor without consuming it.
    pub fn peek_u8(&self) -> RdbResult<u8> {
        self.buf.get(self.pos).copied().ok_or(RdbError::OutOfBounds)
    }

    pub fn get_bytes(&mut self, len: usize) -> RdbResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(RdbError::OutOfBounds);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> RdbResult<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    pub fn get_i8(&mut self) -> RdbResult<i8> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_u16_le(&mut self) -> RdbResult<u16> {
        Ok(LittleEndian::read_u16(self.get_bytes(2)?))
    }

    pub fn get_i16_le(&mut self) -> RdbResult<i16> {
        Ok(LittleEndian::read_i16(self.get_bytes(2)?))
    }

    pub fn get_u32_le(&mut self) -> RdbResult<u32> {
        Ok(LittleEndian::read_u32(self.get_bytes(4)?))
    }

    pub fn get_i32_le(&mut self) -> RdbResult<i32> {
        Ok(LittleEndian::read_i32(self.get_bytes(4)?))
    }

    pub fn get_i64_le(&mut self) -> RdbResult<i64> {
        Ok(LittleEndian::read_i64(self.get_bytes(8)?))
    }

    pub fn get_u32_be(&mut self) -> RdbResult<u32> {
        Ok(BigEndian::read_u32(self.get_bytes(4)?))
    }

    pub fn get_u64_be(&mut self) -> RdbResult<u64> {
        Ok(BigEndian::read_u64(self.get_bytes(8)?))
    }

    pub fn get_f64_le(&mut self) -> RdbResult<f64> {
        let raw: [u8; 8] = self.get_bytes(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(raw))
    }
}
