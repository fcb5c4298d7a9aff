//! RESP async connection halves
//!
//! `RespReader` parses client frames from an async stream, `RespWriter`
//! serializes replies. The reader enforces a frame size cap so a single
//! oversized request cannot exhaust memory. Client requests are flat
//! arrays of bulk strings; nested arrays are rejected.

use crate::{encode_to_vec, RespError, RespValue};
use bytes::Bytes;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};

/// Default maximum frame size: 512MB (matches the Redis proto-max-bulk-len ceiling)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Async RESP frame reader.
pub struct RespReader<R: AsyncRead + Unpin> {
    reader: BufReader<R>,
    max_bytes: usize,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_bytes(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_bytes(reader: R, max_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_bytes,
        }
    }

    /// Read the next request frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_value(&mut self) -> Result<Option<RespValue>, RespError> {
        let mut budget = self.max_bytes;
        let line = match self.read_line(&mut budget).await? {
            Some(line) => line,
            None => return Ok(None),
        };
        if line.is_empty() {
            return Err(RespError::InvalidFormat("empty line".to_string()));
        }
        if line[0] != b'*' {
            return self.parse_scalar(&line, &mut budget).await.map(Some);
        }

        let len = parse_int(&line[1..])?;
        if len < 0 {
            return Ok(Some(RespValue::Null));
        }
        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let nested = self
                .read_line(&mut budget)
                .await?
                .ok_or(RespError::UnexpectedEof)?;
            if nested.first() == Some(&b'*') {
                return Err(RespError::InvalidFormat(
                    "nested arrays are not valid in requests".to_string(),
                ));
            }
            items.push(self.parse_scalar(&nested, &mut budget).await?);
        }
        Ok(Some(RespValue::Array(items)))
    }

    async fn parse_scalar(
        &mut self,
        line: &[u8],
        budget: &mut usize,
    ) -> Result<RespValue, RespError> {
        if line.is_empty() {
            return Err(RespError::InvalidFormat("empty line".to_string()));
        }
        match line[0] {
            b'$' => {
                let len = parse_int(&line[1..])?;
                if len < 0 {
                    return Ok(RespValue::Null);
                }
                let len = len as usize;
                self.charge(budget, len)?;
                let mut data = vec![0u8; len + 2];
                self.reader.read_exact(&mut data).await?;
                if &data[len..] != b"\r\n" {
                    return Err(RespError::InvalidFormat(
                        "bulk string missing CRLF terminator".to_string(),
                    ));
                }
                data.truncate(len);
                Ok(RespValue::BulkString(Some(Bytes::from(data))))
            }
            b'+' => Ok(RespValue::SimpleString(Bytes::copy_from_slice(&line[1..]))),
            b':' => Ok(RespValue::Integer(parse_int(&line[1..])?)),
            b'-' => Ok(RespValue::Error(
                String::from_utf8_lossy(&line[1..]).into_owned(),
            )),
            other => Err(RespError::InvalidType(other)),
        }
    }

    /// Read one CRLF-terminated header line, without the terminator.
    async fn read_line(&mut self, budget: &mut usize) -> Result<Option<Vec<u8>>, RespError> {
        let mut line = Vec::new();
        let n = self.reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        self.charge(budget, n)?;
        if !line.ends_with(b"\r\n") {
            return Err(RespError::UnexpectedEof);
        }
        line.truncate(line.len() - 2);
        Ok(Some(line))
    }

    fn charge(&self, budget: &mut usize, n: usize) -> Result<(), RespError> {
        if n > *budget {
            let used = self.max_bytes - *budget + n;
            return Err(RespError::FrameTooLarge(used, self.max_bytes));
        }
        *budget -= n;
        Ok(())
    }
}

/// Async RESP frame writer.
pub struct RespWriter<W: AsyncWrite + Unpin> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> RespWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub async fn write_value(&mut self, value: &RespValue) -> Result<(), RespError> {
        let bytes = encode_to_vec(value);
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

fn parse_int(digits: &[u8]) -> Result<i64, RespError> {
    let s = std::str::from_utf8(digits)
        .map_err(|_| RespError::InvalidFormat("non-ascii integer".to_string()))?;
    s.parse::<i64>()
        .map_err(|_| RespError::InvalidFormat(format!("invalid integer: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_request_frame() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = RespWriter::new(client);
        let mut reader = RespReader::new(server);

        let request = RespValue::from_args(vec![&b"SET"[..], &b"k"[..], &b"v\x00v"[..]]);
        writer.write_value(&request).await.unwrap();
        drop(writer);

        let parsed = reader.read_value().await.unwrap().unwrap();
        assert_eq!(parsed, request);
        assert!(reader.read_value().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_size_cap() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = RespWriter::new(client);
        let mut reader = RespReader::with_max_bytes(server, 16);

        let request = RespValue::from_args(vec![vec![b'x'; 64]]);
        writer.write_value(&request).await.unwrap();
        drop(writer);

        assert!(matches!(
            reader.read_value().await,
            Err(RespError::FrameTooLarge(_, _))
        ));
    }

    #[tokio::test]
    async fn test_reject_nested_arrays() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = RespWriter::new(client);
        let mut reader = RespReader::new(server);

        let request = RespValue::Array(vec![RespValue::Array(vec![RespValue::Integer(1)])]);
        writer.write_value(&request).await.unwrap();
        drop(writer);

        assert!(matches!(
            reader.read_value().await,
            Err(RespError::InvalidFormat(_))
        ));
    }
}
