//! Payload trailer: RDB version and CRC64
//!
//! The last ten bytes of every payload are the two-byte RDB version and the
//! eight-byte CRC64 of everything before them, both little-endian. The CRC
//! polynomial is the Jones variant Redis uses.

use crate::buffer::WriteBuf;
use crate::{RdbError, RdbResult, RDB_VERSION};
use crc::{Crc, CRC_64_REDIS};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

/// Version plus checksum footer size.
pub const TRAILER_LEN: usize = 10;

/// CRC64 (Jones) over a byte run.
pub fn crc64(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

/// Append the version and the CRC64 of `[begin, cursor)` at the cursor.
pub fn append_trailer(buf: &mut WriteBuf, begin: usize) {
    buf.put_u16_le(RDB_VERSION);
    let crc = crc64(&buf.as_slice()[begin..buf.pos()]);
    buf.put_u64_le(crc);
}

/// Validate a payload's length, embedded version and checksum.
pub fn verify_payload(payload: &[u8]) -> RdbResult<()> {
    if payload.len() < TRAILER_LEN {
        return Err(RdbError::TooShort);
    }
    let version_at = payload.len() - TRAILER_LEN;
    let version = u16::from_le_bytes([payload[version_at], payload[version_at + 1]]);
    if version > RDB_VERSION {
        return Err(RdbError::VersionTooNew);
    }
    let crc_at = payload.len() - 8;
    let expected = u64::from_le_bytes(payload[crc_at..].try_into().unwrap());
    if crc64(&payload[..crc_at]) != expected {
        return Err(RdbError::ChecksumMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::save_string;
    use crate::DumpType;

    fn dummy_payload() -> Vec<u8> {
        let mut buf = WriteBuf::new();
        buf.put_u8(DumpType::String as u8);
        save_string(&mut buf, b"hello");
        append_trailer(&mut buf, 0);
        buf.into_vec()
    }

    #[test]
    fn test_trailer_layout() {
        let payload = dummy_payload();
        let body_len = payload.len() - TRAILER_LEN;
        assert_eq!(
            u16::from_le_bytes([payload[body_len], payload[body_len + 1]]),
            RDB_VERSION
        );
        let crc = crc64(&payload[..payload.len() - 8]);
        assert_eq!(
            u64::from_le_bytes(payload[payload.len() - 8..].try_into().unwrap()),
            crc
        );
        assert!(verify_payload(&payload).is_ok());
    }

    #[test]
    fn test_known_crc_vector() {
        // Jones CRC64 of the ASCII digits, as used by Redis.
        assert_eq!(crc64(b"123456789"), 0xe9c6d914c4b8d9ca);
    }

    #[test]
    fn test_reject_short_payload() {
        assert!(matches!(
            verify_payload(&[0u8; 9]),
            Err(RdbError::TooShort)
        ));
    }

    #[test]
    fn test_reject_tampered_body_and_trailer() {
        let payload = dummy_payload();
        for at in [0, 1, payload.len() / 2, payload.len() - 9, payload.len() - 1] {
            let mut bad = payload.clone();
            bad[at] ^= 0x01;
            assert!(
                verify_payload(&bad).is_err(),
                "tampered byte {} went undetected",
                at
            );
        }
    }

    #[test]
    fn test_reject_too_new_version() {
        let mut buf = WriteBuf::new();
        buf.put_u8(DumpType::String as u8);
        save_string(&mut buf, b"x");
        buf.put_u16_le(RDB_VERSION + 1);
        let crc = crc64(buf.as_slice());
        buf.put_u64_le(crc);
        assert!(matches!(
            verify_payload(&buf.into_vec()),
            Err(RdbError::VersionTooNew)
        ));
    }
}
