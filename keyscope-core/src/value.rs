//! RESP (`REdis` Serialization Protocol) value types

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;

/// RESP protocol value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string or null array: $-1\r\n
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Convert to a string if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a string.
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Parse(format!("Invalid UTF-8: {e}"))),
            Self::Null => Err(RedisError::Parse("Value is null".to_string())),
            _ => Err(RedisError::Parse(format!(
                "Cannot convert {self:?} to string"
            ))),
        }
    }

    /// Convert to an integer if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an integer.
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::BulkString(_) | Self::SimpleString(_) => {
                let s = self.as_string()?;
                s.trim()
                    .parse::<i64>()
                    .map_err(|e| RedisError::Parse(format!("Cannot parse integer: {e}")))
            }
            _ => Err(RedisError::Parse(format!(
                "Cannot convert {self:?} to integer"
            ))),
        }
    }

    /// Convert to an array if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an array.
    pub fn into_array(self) -> RedisResult<Vec<Self>> {
        match self {
            Self::Array(arr) => Ok(arr),
            other => Err(RedisError::Parse(format!(
                "Cannot convert {other:?} to array"
            ))),
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Turn a top-level error reply into `Err`, leaving other values intact
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Command`] (or a redirect) for `-ERR` replies.
    pub fn into_result(self) -> RedisResult<Self> {
        match self {
            Self::Error(msg) => Err(RedisError::from_error_reply(&msg)),
            other => Ok(other),
        }
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<Bytes> for RespValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}
