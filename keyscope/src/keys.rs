//! Key counts and the raw command entry point
//!
//! `DBSIZE` is the authoritative count. When it is unavailable (renamed,
//! denied by ACL, proxy without it) the count comes from `INFO keyspace`
//! for the handle's current database. When both fail the count is
//! [`KEY_COUNT_UNAVAILABLE`], which means "unknown", never "empty".

use crate::client::CommandExecutor;
use crate::info::KeyspaceInfo;
use crate::reply::{reply_to_int, reply_to_text};
use bytes::Bytes;
use keyscope_core::{
    error::RedisResult,
    types::{CommandOptions, RedisValue},
};
use tracing::debug;

/// Returned when no method could count keys
pub const KEY_COUNT_UNAVAILABLE: i64 = -1;

/// Send a raw command through whichever topology the client uses
pub async fn send_command<C>(
    client: &C,
    parts: Vec<Bytes>,
    options: CommandOptions,
) -> RedisResult<RedisValue>
where
    C: CommandExecutor + ?Sized,
{
    client.send_command(parts, options).await
}

/// Key count from `DBSIZE`
pub async fn get_total_keys_from_db_size<C>(client: &C) -> RedisResult<i64>
where
    C: CommandExecutor + ?Sized,
{
    let reply = client
        .send_command(vec![Bytes::from_static(b"DBSIZE")], CommandOptions::utf8())
        .await?;
    reply_to_int(&reply)
}

/// Key count from `INFO keyspace`
///
/// A database missing from the reply has no keys. Any failure yields
/// [`KEY_COUNT_UNAVAILABLE`].
pub async fn get_total_keys_from_info<C>(client: &C) -> i64
where
    C: CommandExecutor + ?Sized,
{
    let index = client.current_db_index().await.unwrap_or(0);
    match keyspace_key_count(client, index).await {
        Ok(count) => count,
        Err(e) => {
            debug!("INFO keyspace key count failed for db{}: {}", index, e);
            KEY_COUNT_UNAVAILABLE
        }
    }
}

async fn keyspace_key_count<C>(client: &C, index: u32) -> RedisResult<i64>
where
    C: CommandExecutor + ?Sized,
{
    let reply = client
        .send_command(
            vec![Bytes::from_static(b"INFO"), Bytes::from_static(b"keyspace")],
            CommandOptions::utf8(),
        )
        .await?;
    let keyspace = KeyspaceInfo::parse(&reply_to_text(reply)?);
    let count = keyspace.key_count(index)?;
    Ok(i64::try_from(count).unwrap_or(i64::MAX))
}

/// Total keys in the current database, `-1` when unknown
pub async fn get_total_keys<C>(client: &C) -> i64
where
    C: CommandExecutor + ?Sized,
{
    match get_total_keys_from_db_size(client).await {
        Ok(count) => count,
        Err(e) => {
            debug!("DBSIZE unavailable ({}), falling back to INFO keyspace", e);
            get_total_keys_from_info(client).await
        }
    }
}
