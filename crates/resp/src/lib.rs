//! RESP (REdis Serialization Protocol) support library
//!
//! Provides the RESP value type, a sync codec for buffers, and an async
//! connection wrapper for the server's TCP sessions.

mod codec;
mod conn;

pub use codec::{encode_to_vec, RespParser};
pub use conn::{RespReader, RespWriter, DEFAULT_MAX_FRAME_SIZE};

use bytes::Bytes;
use std::io;

/// RESP data type
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(Bytes),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :123\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n ($-1\r\n when absent)
    BulkString(Option<Bytes>),
    /// Array: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n (*-1\r\n when absent)
    Array(Vec<RespValue>),
    /// Null bulk: $-1\r\n
    Null,
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Flatten a client request array into an argument vector.
    ///
    /// Returns `None` when the value is not an array of bulk/simple strings.
    pub fn to_args(&self) -> Option<Vec<Vec<u8>>> {
        match self {
            RespValue::Array(items) => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        RespValue::BulkString(Some(bytes)) => args.push(bytes.to_vec()),
                        RespValue::SimpleString(s) => args.push(s.to_vec()),
                        _ => return None,
                    }
                }
                Some(args)
            }
            _ => None,
        }
    }

    /// Build a request array from an argument vector.
    pub fn from_args<I, B>(args: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(
            args.into_iter()
                .map(|a| RespValue::BulkString(Some(a.into())))
                .collect(),
        )
    }
}

/// RESP parsing error
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Integer overflow")]
    IntegerOverflow,
    #[error("Frame too large: {0} bytes (max: {1} bytes)")]
    FrameTooLarge(usize, usize),
    #[error("Invalid RESP type: {0}")]
    InvalidType(u8),
}
