//! Ziplist codec
//!
//! A ziplist is one contiguous buffer:
//!
//! ```text
//! zlbytes(u32 LE) zltail(u32 LE) zllen(u16 LE) entries... zlend(0xFF)
//! ```
//!
//! Each entry is `prevlen encoding payload`. `prevlen` holds the previous
//! entry's total byte size, one byte when it fits in [0, 254], otherwise
//! 0xFE followed by a u32 LE. The encoder here emits every entry in string
//! form; the decoder additionally accepts the integer entry encodings that
//! upstream Redis produces, rendering them as decimal text.

use crate::buffer::{ReadBuf, WriteBuf};
use crate::encoding::{load_string, save_string};
use crate::{RdbError, RdbResult};

/// Ziplist header size: zlbytes + zltail + zllen.
pub const ZIPLIST_HEADER_SIZE: usize = 10;

// Entry encodings. A first byte below ZIP_STR_MASK introduces a string.
pub const ZIP_STR_MASK: u8 = 0xC0;
pub const ZIP_INT_16B: u8 = 0xC0;
pub const ZIP_INT_32B: u8 = 0xD0;
pub const ZIP_INT_64B: u8 = 0xE0;
pub const ZIP_INT_24B: u8 = 0xF0;
pub const ZIP_INT_8B: u8 = 0xFE;
pub const ZIP_INT_IMM_MIN: u8 = 0xF1;
pub const ZIP_INT_IMM_MAX: u8 = 0xFD;
pub const ZIP_INT_IMM_MASK: u8 = 0x0F;
pub const ZIP_BIG_PREVLEN: u8 = 0xFE;
pub const ZIP_END: u8 = 0xFF;

/// Build a ziplist holding `entries` in order.
///
/// The caller keeps entry counts within u16 range; the list serializer
/// enforces that bound across the whole quicklist.
pub fn encode(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut zl = WriteBuf::with_capacity(
        ZIPLIST_HEADER_SIZE + 1 + entries.iter().map(|e| e.len() + 6).sum::<usize>(),
    );
    // zlbytes and zltail are patched once the layout is known.
    zl.advance(8);
    zl.put_u16_le(entries.len() as u16);

    let mut prevlen = 0usize;
    let mut last_entry_at = ZIPLIST_HEADER_SIZE;
    for entry in entries {
        last_entry_at = zl.pos();
        let mut written = if prevlen > 254 {
            zl.put_u8(ZIP_BIG_PREVLEN) + zl.put_u32_le(prevlen as u32)
        } else {
            zl.put_u8(prevlen as u8)
        };
        written += save_string(&mut zl, entry);
        prevlen = written;
    }
    zl.put_u8(ZIP_END);

    let zlbytes = zl.len() as u32;
    zl.set_pos(0);
    zl.put_u32_le(zlbytes);
    zl.put_u32_le(last_entry_at as u32);
    zl.into_vec()
}

/// Parse a ziplist into its entries, integer encodings included.
pub fn decode(blob: &[u8]) -> RdbResult<Vec<Vec<u8>>> {
    let mut r = ReadBuf::new(blob);
    let _zlbytes = r.get_u32_le()?;
    let _zltail = r.get_u32_le()?;
    let zllen = r.get_u16_le()?;

    let mut entries = Vec::with_capacity(zllen as usize);
    for _ in 0..zllen {
        // prevlen is self-describing: one byte, or 0xFE plus u32.
        if r.get_u8()? == ZIP_BIG_PREVLEN {
            r.get_bytes(4)?;
        }
        let encoding = r.peek_u8()?;
        let value = if encoding < ZIP_STR_MASK {
            load_string(&mut r)?
        } else {
            r.get_u8()?;
            decode_int_entry(&mut r, encoding)?.to_string().into_bytes()
        };
        entries.push(value);
    }
    if r.get_u8()? != ZIP_END {
        return Err(RdbError::BadZiplist("missing terminator"));
    }
    Ok(entries)
}

fn decode_int_entry(r: &mut ReadBuf, encoding: u8) -> RdbResult<i64> {
    match encoding {
        ZIP_INT_8B => Ok(r.get_i8()? as i64),
        ZIP_INT_16B => Ok(r.get_i16_le()? as i64),
        ZIP_INT_24B => {
            let raw = r.get_bytes(3)?;
            let wide = (raw[2] as i32) << 16 | (raw[1] as i32) << 8 | raw[0] as i32;
            // Sign-extend from 24 bits.
            Ok(((wide << 8) >> 8) as i64)
        }
        ZIP_INT_32B => Ok(r.get_i32_le()? as i64),
        ZIP_INT_64B => Ok(r.get_i64_le()?),
        imm if (ZIP_INT_IMM_MIN..=ZIP_INT_IMM_MAX).contains(&imm) => {
            Ok(((imm & ZIP_INT_IMM_MASK) as i64) - 1)
        }
        _ => Err(RdbError::InvalidIntEncoding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};

    #[test]
    fn test_encode_layout() {
        let zl = encode(&[b"hello".to_vec(), b"hi".to_vec()]);
        // zlbytes covers the whole buffer.
        assert_eq!(LittleEndian::read_u32(&zl[0..4]) as usize, zl.len());
        // zllen.
        assert_eq!(LittleEndian::read_u16(&zl[8..10]), 2);
        // zltail points at the start of the last entry: header + prevlen(1)
        // + strlen header(1) + "hello".
        assert_eq!(LittleEndian::read_u32(&zl[4..8]), 17);
        assert_eq!(*zl.last().unwrap(), ZIP_END);
    }

    #[test]
    fn test_round_trip() {
        let entries = vec![
            b"".to_vec(),
            b"a".to_vec(),
            b"hello world".to_vec(),
            vec![0u8; 100],
        ];
        assert_eq!(decode(&encode(&entries)).unwrap(), entries);
    }

    #[test]
    fn test_round_trip_with_wide_prevlen() {
        // A 300-byte entry forces the 5-byte prevlen form for its successor.
        let entries = vec![vec![b'x'; 300], b"next".to_vec(), b"last".to_vec()];
        let zl = encode(&entries);
        assert_eq!(decode(&zl).unwrap(), entries);
    }

    #[test]
    fn test_decode_upstream_integer_entries() {
        // Hand-built ziplist the way upstream Redis would emit integers.
        let mut zl = WriteBuf::new();
        zl.advance(8);
        zl.put_u16_le(6);
        let mut prevlen = 0usize;
        let put_prevlen = |zl: &mut WriteBuf, len: usize| {
            assert!(len <= 254);
            zl.put_u8(len as u8);
        };

        // Immediate 3 -> 0xF1 + (3 + 1).
        put_prevlen(&mut zl, prevlen);
        zl.put_u8(0xF4);
        prevlen = 2;
        // int8 -7.
        put_prevlen(&mut zl, prevlen);
        zl.put_u8(ZIP_INT_8B);
        zl.put_u8((-7i8) as u8);
        prevlen = 3;
        // int16 12345.
        put_prevlen(&mut zl, prevlen);
        zl.put_u8(ZIP_INT_16B);
        zl.put_bytes(&12345i16.to_le_bytes());
        prevlen = 4;
        // int24 -100000.
        put_prevlen(&mut zl, prevlen);
        zl.put_u8(ZIP_INT_24B);
        zl.put_bytes(&(-100000i32).to_le_bytes()[0..3]);
        prevlen = 5;
        // int32 7654321.
        put_prevlen(&mut zl, prevlen);
        zl.put_u8(ZIP_INT_32B);
        zl.put_bytes(&7654321i32.to_le_bytes());
        prevlen = 6;
        // int64.
        put_prevlen(&mut zl, prevlen);
        zl.put_u8(ZIP_INT_64B);
        zl.put_bytes(&(-9_876_543_210i64).to_le_bytes());
        zl.put_u8(ZIP_END);

        let zlbytes = zl.len() as u32;
        let tail = zl.len() - 1 - 10;
        zl.set_pos(0);
        zl.put_u32_le(zlbytes);
        zl.put_u32_le(tail as u32);

        let entries = decode(zl.as_slice()).unwrap();
        assert_eq!(
            entries,
            vec![
                b"3".to_vec(),
                b"-7".to_vec(),
                b"12345".to_vec(),
                b"-100000".to_vec(),
                b"7654321".to_vec(),
                b"-9876543210".to_vec(),
            ]
        );
    }

    #[test]
    fn test_decode_missing_terminator() {
        let mut zl = encode(&[b"x".to_vec()]);
        let end = zl.len() - 1;
        zl[end] = 0x00;
        assert!(matches!(
            decode(&zl),
            Err(RdbError::BadZiplist("missing terminator"))
        ));
    }

    #[test]
    fn test_decode_bad_int_encoding() {
        // 0xFE-prefixed prevlen then an invalid 0xC5 encoding byte.
        let mut zl = WriteBuf::new();
        zl.advance(8);
        zl.put_u16_le(1);
        zl.put_u8(0);
        zl.put_u8(0xC5);
        zl.put_u8(ZIP_END);
        let zlbytes = zl.len() as u32;
        zl.set_pos(0);
        zl.put_u32_le(zlbytes);
        zl.put_u32_le(10);
        assert!(matches!(
            decode(zl.as_slice()),
            Err(RdbError::InvalidIntEncoding)
        ));
    }
}
