//! Multi-topology Redis client facade
//!
//! `keyscope` connects to user-supplied Redis deployments on behalf of a
//! database browser. It decides once whether a configuration points at a
//! standalone server, a Redis Cluster or a sentinel-managed master, and then
//! exposes the same small surface for all three:
//!
//! - [`send_command`] for arbitrary commands, with replies normalized per
//!   [`CommandOptions`]
//! - [`get_total_keys`] and friends for key counts that degrade gracefully
//!   when `DBSIZE` is unavailable
//! - [`ClientPool`] to cache one client per [`ClientMetadata`]
//!
//! # Quick Start
//!
//! ```no_run
//! use keyscope::{get_total_keys, ConnectionConfig, RedisClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("redis://localhost:6379");
//!     let client = RedisClient::connect(config).await?;
//!
//!     let total = get_total_keys(&client).await;
//!     println!("keys: {}", total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod cluster;
pub mod commands;
pub mod connection;
pub mod info;
pub mod keys;
pub mod pool;
pub mod protocol;
pub mod reply;
pub mod sentinel;
pub mod transport;

pub use client::{CommandExecutor, RedisClient, StandaloneClient};
pub use cluster::{calculate_slot, ClusterClient};
pub use commands::{Command, CommandExt, DbSizeCommand, InfoCommand, PingCommand, SelectCommand};
pub use connection::TopologyType;
pub use info::{convert_bulk_string_to_map, InfoReply, KeyspaceInfo};
pub use keys::{
    get_total_keys, get_total_keys_from_db_size, get_total_keys_from_info, send_command,
    KEY_COUNT_UNAVAILABLE,
};
pub use pool::ClientPool;
pub use sentinel::SentinelClient;

pub use keyscope_core::{
    config::{ConnectionConfig, ConnectionProfile, SentinelConfig, SentinelEndpoint, TopologyMode},
    error::{RedisError, RedisResult},
    types::{ClientContext, ClientMetadata, CommandOptions, RedisValue, ReplyEncoding},
    value::RespValue,
};
