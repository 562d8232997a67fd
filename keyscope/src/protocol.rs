//! RESP2 protocol implementation
//!
//! Commands go out as arrays of bulk strings. Replies are decoded
//! incrementally: [`RespDecoder::decode`] returns `Ok(None)` until a whole
//! value is buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use keyscope_core::{
    error::{RedisError, RedisResult},
    value::RespValue,
};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Encodes RESP values and commands into bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value into a buffer
    pub fn encode(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => Self::put_bulk(data, buf),
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in arr {
                    Self::encode(item, buf);
                }
            }
        }
    }

    /// Encode command parts (name first) as an array of bulk strings
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::InvalidCommand`] if `parts` is empty.
    pub fn encode_command(parts: &[Bytes]) -> RedisResult<Bytes> {
        if parts.is_empty() {
            return Err(RedisError::InvalidCommand("empty command".to_string()));
        }

        // *N\r\n plus $len\r\ndata\r\n per part, lengths rarely exceed 8 digits
        let capacity = 16 + parts.iter().map(|p| p.len() + 16).sum::<usize>();
        let mut buf = BytesMut::with_capacity(capacity);

        buf.put_u8(b'*');
        buf.put_slice(parts.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        for part in parts {
            Self::put_bulk(part, &mut buf);
        }

        Ok(buf.freeze())
    }

    fn put_bulk(data: &[u8], buf: &mut BytesMut) {
        buf.put_u8(b'$');
        buf.put_slice(data.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(data);
        buf.put_slice(CRLF);
    }
}

/// Decodes RESP values from bytes
pub struct RespDecoder;

impl RespDecoder {
    /// Decode one RESP value from the cursor
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a value; the
    /// cursor position is meaningless in that case and the caller retries
    /// from the start once more bytes arrive.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        if !buf.has_remaining() {
            return Ok(None);
        }

        let type_byte = buf.chunk()[0];
        buf.advance(1);

        match type_byte {
            b'+' => Ok(Self::read_text(buf)?.map(RespValue::SimpleString)),
            b'-' => Ok(Self::read_text(buf)?.map(RespValue::Error)),
            b':' => Ok(Self::read_number(buf)?.map(RespValue::Integer)),
            b'$' => Self::decode_bulk_string(buf),
            b'*' => Self::decode_array(buf),
            _ => Err(RedisError::Parse(format!(
                "Invalid RESP type byte: {:?}",
                type_byte as char
            ))),
        }
    }

    fn decode_bulk_string(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let len = match Self::read_number(buf)? {
            Some(len) => len,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        let len = usize::try_from(len)
            .map_err(|_| RedisError::Parse(format!("Invalid bulk string length: {}", len)))?;

        if buf.remaining() < len + 2 {
            return Ok(None);
        }

        let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
        buf.advance(len);
        if buf.chunk()[..2] != *CRLF {
            return Err(RedisError::Parse(
                "Bulk string not terminated by CRLF".to_string(),
            ));
        }
        buf.advance(2);

        Ok(Some(RespValue::BulkString(data)))
    }

    fn decode_array(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let len = match Self::read_number(buf)? {
            Some(len) => len,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        let len = usize::try_from(len)
            .map_err(|_| RedisError::Parse(format!("Invalid array length: {}", len)))?;

        let mut arr = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            match Self::decode(buf)? {
                Some(value) => arr.push(value),
                None => return Ok(None),
            }
        }

        Ok(Some(RespValue::Array(arr)))
    }

    fn read_text(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<String>> {
        match Self::read_line(buf) {
            Some(line) => String::from_utf8(line.to_vec())
                .map(Some)
                .map_err(|e| RedisError::Parse(format!("Invalid UTF-8: {}", e))),
            None => Ok(None),
        }
    }

    fn read_number(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<i64>> {
        match Self::read_text(buf)? {
            Some(line) => line
                .parse::<i64>()
                .map(Some)
                .map_err(|e| RedisError::Parse(format!("Invalid integer {:?}: {}", line, e))),
            None => Ok(None),
        }
    }

    fn read_line<'a>(buf: &mut Cursor<&'a [u8]>) -> Option<&'a [u8]> {
        let start = buf.position() as usize;
        let slice: &'a [u8] = *buf.get_ref();
        let offset = slice.get(start..)?.windows(2).position(|w| w == CRLF)?;
        buf.set_position((start + offset + 2) as u64);
        Some(&slice[start..start + offset])
    }
}
