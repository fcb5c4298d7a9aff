//! Redis RDB payload codec
//!
//! A DUMP payload is a self-describing binary blob:
//!
//! ```text
//! ----------------+---------------------+---------------+
//! ... RDB payload | 2 bytes RDB version | 8 bytes CRC64 |
//! ----------------+---------------------+---------------+
//! ```
//!
//! The body starts with a one-byte type tag and is followed by a
//! type-specific layout built from two primitives: the Redis length
//! encoding (`encoding::save_len`) and the length-prefixed string encoding
//! (`encoding::save_string`). The trailer carries the RDB version and the
//! Jones CRC64 of everything before it, both little-endian.
//!
//! The encoder emits only the plain string form; the decoder additionally
//! accepts the integer-compacted and LZF-compressed string forms so that
//! payloads produced by upstream Redis restore correctly.

pub mod buffer;
pub mod encoding;
pub mod envelope;
pub mod ziplist;

pub use buffer::{ReadBuf, WriteBuf};

/// Highest RDB payload version this build understands.
pub const RDB_VERSION: u16 = 9;

// Length-encoding headers (top two bits of the first byte).
pub const RDB_6BITLEN: u8 = 0;
pub const RDB_14BITLEN: u8 = 1;
pub const RDB_ENCVAL: u8 = 3;
// Full first-byte values for the wide forms.
pub const RDB_32BITLEN: u8 = 0x80;
pub const RDB_64BITLEN: u8 = 0x81;

// Special string encodings (sub-tag when the encoded flag is set).
pub const RDB_ENC_INT8: u8 = 0;
pub const RDB_ENC_INT16: u8 = 1;
pub const RDB_ENC_INT32: u8 = 2;
pub const RDB_ENC_LZF: u8 = 3;

/// RDB value type tag, first byte of every payload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DumpType {
    String = 0,
    Set = 2,
    Zset = 3,
    Hash = 4,
    Quicklist = 14,
}

impl DumpType {
    pub fn from_u8(byte: u8) -> Result<DumpType, RdbError> {
        match byte {
            0 => Ok(DumpType::String),
            2 => Ok(DumpType::Set),
            3 => Ok(DumpType::Zset),
            4 => Ok(DumpType::Hash),
            14 => Ok(DumpType::Quicklist),
            other => Err(RdbError::UnknownType(other)),
        }
    }
}

/// Payload codec error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RdbError {
    #[error("unexpected end of payload")]
    OutOfBounds,
    #[error("Unknown length encoding")]
    UnknownLength,
    #[error("Invalid LZF compressed string")]
    InvalidLzf,
    #[error("Invalid integer encoding")]
    InvalidIntEncoding,
    #[error("malformed ziplist: {0}")]
    BadZiplist(&'static str),
    #[error("payload too short")]
    TooShort,
    #[error("payload RDB version is too new")]
    VersionTooNew,
    #[error("payload checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown dump type {0}")]
    UnknownType(u8),
}

pub type RdbResult<T> = Result<T, RdbError>;
