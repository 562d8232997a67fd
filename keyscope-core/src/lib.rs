//! Core types for the keyscope Redis client facade
//!
//! This crate holds the configuration, error, and value types shared by the
//! transport, topology and introspection layers of `keyscope`. It does no I/O.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{
    ConnectionConfig, ConnectionProfile, SentinelConfig, SentinelEndpoint, TopologyMode,
};
pub use error::{RedisError, RedisResult};
pub use types::{
    ClientContext, ClientMetadata, CommandOptions, NodeInfo, RedisValue, ReplyEncoding, SlotRange,
};
pub use value::RespValue;
