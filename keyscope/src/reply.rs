//! Reply normalization
//!
//! Turns raw RESP values into [`RedisValue`] according to the caller's
//! [`ReplyEncoding`].

use keyscope_core::{
    error::{RedisError, RedisResult},
    types::{RedisValue, ReplyEncoding},
    value::RespValue,
};

/// Normalize a top-level reply
///
/// A top-level error reply becomes `Err`; errors nested in arrays (for
/// example inside an `EXEC` result) are kept as [`RedisValue::Error`].
pub fn normalize(reply: RespValue, encoding: ReplyEncoding) -> RedisResult<RedisValue> {
    match reply {
        RespValue::Error(msg) => Err(RedisError::from_error_reply(&msg)),
        other => Ok(convert(other, encoding)),
    }
}

fn convert(value: RespValue, encoding: ReplyEncoding) -> RedisValue {
    match value {
        RespValue::SimpleString(s) => RedisValue::Status(s),
        RespValue::Error(e) => RedisValue::Error(e),
        RespValue::Integer(i) => RedisValue::Int(i),
        RespValue::BulkString(data) => match encoding {
            ReplyEncoding::Utf8 => RedisValue::String(String::from_utf8_lossy(&data).into_owned()),
            ReplyEncoding::Binary => RedisValue::Bytes(data),
        },
        RespValue::Null => RedisValue::Nil,
        RespValue::Array(items) => RedisValue::Array(
            items
                .into_iter()
                .map(|item| convert(item, encoding))
                .collect(),
        ),
    }
}

/// Read an integer out of a normalized reply
///
/// Accepts integer replies and integer-looking text, the way `DBSIZE`
/// replies arrive from proxies that stringify everything.
pub fn reply_to_int(reply: &RedisValue) -> RedisResult<i64> {
    match reply {
        RedisValue::Int(i) => Ok(*i),
        other => {
            let text = other
                .as_text()
                .ok_or_else(|| RedisError::Parse(format!("Expected integer reply, got {:?}", other)))?;
            text.trim()
                .parse::<i64>()
                .map_err(|e| RedisError::Parse(format!("Invalid integer {:?}: {}", text, e)))
        }
    }
}

/// Read text out of a normalized reply
pub fn reply_to_text(reply: RedisValue) -> RedisResult<String> {
    match reply {
        RedisValue::String(s) | RedisValue::Status(s) => Ok(s),
        RedisValue::Bytes(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
        other => Err(RedisError::Parse(format!("Expected text reply, got {:?}", other))),
    }
}
