//! Length and string encodings
//!
//! Lengths use the standard Redis scheme keyed by the top two bits of the
//! first byte:
//!
//! | first byte | layout                                   |
//! |------------|------------------------------------------|
//! | `00xxxxxx` | 6-bit length                             |
//! | `01xxxxxx` | 14-bit length, big-endian                |
//! | `0x80`     | 32-bit length follows, network order     |
//! | `0x81`     | 64-bit length follows, network order     |
//! | `11xxxxxx` | not a length: special string encoding    |
//!
//! Strings are a length prefix plus raw bytes on the wire we produce.
//! Decoding also accepts the INT8/INT16/INT32 compact forms (rendered back
//! as decimal text) and LZF-compressed strings, since upstream Redis emits
//! those.

use crate::buffer::{ReadBuf, WriteBuf};
use crate::{
    RdbError, RdbResult, RDB_14BITLEN, RDB_32BITLEN, RDB_64BITLEN, RDB_6BITLEN, RDB_ENCVAL,
    RDB_ENC_INT16, RDB_ENC_INT32, RDB_ENC_INT8, RDB_ENC_LZF,
};
use tracing::warn;

/// Encode a length; returns the encoded width (1, 2, 5 or 9 bytes).
pub fn save_len(buf: &mut WriteBuf, len: u64) -> usize {
    if len < (1 << 6) {
        buf.put_u8((len as u8) | (RDB_6BITLEN << 6))
    } else if len < (1 << 14) {
        buf.put_u8(((len >> 8) as u8) | (RDB_14BITLEN << 6)) + buf.put_u8(len as u8)
    } else if len <= u32::MAX as u64 {
        buf.put_u8(RDB_32BITLEN) + buf.put_u32_be(len as u32)
    } else {
        buf.put_u8(RDB_64BITLEN) + buf.put_u64_be(len)
    }
}

/// Decode a length. The flag is set when the value is not a length but a
/// special-encoding sub-tag (top two bits `11`).
pub fn load_len(r: &mut ReadBuf) -> RdbResult<(u64, bool)> {
    let first = r.get_u8()?;
    let enc_type = (first & 0xC0) >> 6;
    if enc_type == RDB_ENCVAL {
        return Ok(((first & 0x3F) as u64, true));
    }
    if enc_type == RDB_6BITLEN {
        Ok(((first & 0x3F) as u64, false))
    } else if enc_type == RDB_14BITLEN {
        let second = r.get_u8()?;
        Ok(((((first & 0x3F) as u64) << 8) | second as u64, false))
    } else if first == RDB_32BITLEN {
        Ok((r.get_u32_be()? as u64, false))
    } else if first == RDB_64BITLEN {
        Ok((r.get_u64_be()?, false))
    } else {
        Err(RdbError::UnknownLength)
    }
}

/// Encode a string as length prefix plus raw bytes; returns bytes written.
pub fn save_string(buf: &mut WriteBuf, s: &[u8]) -> usize {
    save_len(buf, s.len() as u64) + buf.put_bytes(s)
}

/// Decode a string at the cursor, in any of the accepted encodings.
pub fn load_string(r: &mut ReadBuf) -> RdbResult<Vec<u8>> {
    let (len, is_encoded) = load_len(r)?;
    if is_encoded {
        return match len as u8 {
            RDB_ENC_INT8 | RDB_ENC_INT16 | RDB_ENC_INT32 => {
                let value = load_integer_string(r, len as u8)?;
                Ok(value.to_string().into_bytes())
            }
            RDB_ENC_LZF => load_lzf_string(r),
            other => {
                warn!(encoding = other, "unknown string encoding");
                Ok(Vec::new())
            }
        };
    }
    Ok(r.get_bytes(len as usize)?.to_vec())
}

fn load_integer_string(r: &mut ReadBuf, enc_type: u8) -> RdbResult<i64> {
    match enc_type {
        RDB_ENC_INT8 => Ok(r.get_i8()? as i64),
        RDB_ENC_INT16 => Ok(r.get_i16_le()? as i64),
        RDB_ENC_INT32 => Ok(r.get_i32_le()? as i64),
        _ => Err(RdbError::InvalidIntEncoding),
    }
}

fn load_lzf_string(r: &mut ReadBuf) -> RdbResult<Vec<u8>> {
    let (compressed_len, _) = load_len(r)?;
    let (raw_len, _) = load_len(r)?;
    let compressed = r.get_bytes(compressed_len as usize)?;
    match lzf::decompress(compressed, raw_len as usize) {
        Ok(raw) if !raw.is_empty() => Ok(raw),
        _ => Err(RdbError::InvalidLzf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_len(len: u64) -> (u64, usize) {
        let mut buf = WriteBuf::new();
        let written = save_len(&mut buf, len);
        assert_eq!(written, buf.len());
        let bytes = buf.into_vec();
        let mut r = ReadBuf::new(&bytes);
        let (decoded, encoded) = load_len(&mut r).unwrap();
        assert!(!encoded);
        assert_eq!(r.remaining(), 0);
        (decoded, written)
    }

    #[test]
    fn test_len_widths_match_table() {
        for (len, width) in [
            (0u64, 1usize),
            (1, 1),
            (63, 1),
            (64, 2),
            (16383, 2),
            (16384, 5),
            (u32::MAX as u64, 5),
            (u32::MAX as u64 + 1, 9),
            (1u64 << 63, 9),
        ] {
            let (decoded, written) = round_trip_len(len);
            assert_eq!(decoded, len);
            assert_eq!(written, width, "width for {}", len);
        }
    }

    #[test]
    fn test_len_14bit_is_big_endian() {
        let mut buf = WriteBuf::new();
        save_len(&mut buf, 300);
        // 300 = 0b01_00000001_00101100
        assert_eq!(buf.as_slice(), &[0x41, 0x2C]);
    }

    #[test]
    fn test_len_unknown_header() {
        // 0x82 has the 10 prefix but is neither the 32- nor 64-bit tag.
        let mut r = ReadBuf::new(&[0x82, 0, 0, 0, 0]);
        assert!(matches!(load_len(&mut r), Err(RdbError::UnknownLength)));
    }

    #[test]
    fn test_string_round_trip() {
        for s in [
            &b""[..],
            &b"hello"[..],
            &b"with\x00nul"[..],
            &[0xFFu8; 100][..],
        ] {
            let mut buf = WriteBuf::new();
            save_string(&mut buf, s);
            let bytes = buf.into_vec();
            let mut r = ReadBuf::new(&bytes);
            assert_eq!(load_string(&mut r).unwrap(), s);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn test_large_string_round_trip() {
        let s: Vec<u8> = (0..(1 << 20)).map(|i| (i % 251) as u8).collect();
        let mut buf = WriteBuf::new();
        save_string(&mut buf, &s);
        let bytes = buf.into_vec();
        // 1 MiB needs the 32-bit length form.
        assert_eq!(bytes[0], RDB_32BITLEN);
        let mut r = ReadBuf::new(&bytes);
        assert_eq!(load_string(&mut r).unwrap(), s);
    }

    #[test]
    fn test_decode_integer_encodings() {
        // INT8: 0xC0 sub-tag 0, value -7.
        let mut r = ReadBuf::new(&[0xC0, 0xF9]);
        assert_eq!(load_string(&mut r).unwrap(), b"-7");

        // INT16: little-endian 0x3039 = 12345.
        let mut r = ReadBuf::new(&[0xC1, 0x39, 0x30]);
        assert_eq!(load_string(&mut r).unwrap(), b"12345");

        // INT32: little-endian -100000.
        let raw = (-100000i32).to_le_bytes();
        let buf = [0xC2, raw[0], raw[1], raw[2], raw[3]];
        let mut r = ReadBuf::new(&buf);
        assert_eq!(load_string(&mut r).unwrap(), b"-100000");
    }

    #[test]
    fn test_decode_lzf_string() {
        let raw = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let compressed = lzf::compress(raw).unwrap();
        let mut buf = WriteBuf::new();
        buf.put_u8(0xC0 | RDB_ENC_LZF);
        save_len(&mut buf, compressed.len() as u64);
        save_len(&mut buf, raw.len() as u64);
        buf.put_bytes(&compressed);
        let bytes = buf.into_vec();
        let mut r = ReadBuf::new(&bytes);
        assert_eq!(load_string(&mut r).unwrap(), raw);
    }

    #[test]
    fn test_decode_corrupt_lzf_fails() {
        let mut buf = WriteBuf::new();
        buf.put_u8(0xC0 | RDB_ENC_LZF);
        save_len(&mut buf, 4);
        save_len(&mut buf, 64);
        buf.put_bytes(&[0x01, 0x02, 0x03, 0x04]);
        let bytes = buf.into_vec();
        let mut r = ReadBuf::new(&bytes);
        assert!(matches!(load_string(&mut r), Err(RdbError::InvalidLzf)));
    }

    #[test]
    fn test_truncated_string_fails() {
        let mut buf = WriteBuf::new();
        save_len(&mut buf, 10);
        buf.put_bytes(b"short");
        let bytes = buf.into_vec();
        let mut r = ReadBuf::new(&bytes);
        assert!(matches!(load_string(&mut r), Err(RdbError::OutOfBounds)));
    }
}
