//! Common types used throughout the library

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized reply returned by the dispatch facade
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisValue {
    /// Null bulk string or null array
    Nil,
    /// Simple string status reply such as `OK` or `PONG`
    Status(String),
    /// Integer reply
    Int(i64),
    /// Bulk string decoded as text (`ReplyEncoding::Utf8`)
    String(String),
    /// Bulk string passed through untouched (`ReplyEncoding::Binary`)
    Bytes(Bytes),
    /// Array of values
    Array(Vec<RedisValue>),
    /// Error element nested inside an array reply
    Error(String),
}

impl RedisValue {
    /// Text view of a string-like value
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Status(s) | Self::String(s) => Some(s.clone()),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

impl From<&str> for RedisValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RedisValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<Self>> for RedisValue {
    fn from(arr: Vec<Self>) -> Self {
        Self::Array(arr)
    }
}

/// How bulk strings in a reply are handed back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyEncoding {
    /// Decode bulk strings as UTF-8 text (invalid sequences are replaced)
    Utf8,
    /// Leave bulk strings as raw bytes
    #[default]
    Binary,
}

/// Per-call options for `send_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandOptions {
    /// Reply decoding mode
    pub reply_encoding: ReplyEncoding,
}

impl CommandOptions {
    /// Options decoding bulk strings as text
    #[must_use]
    pub const fn utf8() -> Self {
        Self {
            reply_encoding: ReplyEncoding::Utf8,
        }
    }

    /// Options passing bulk strings through as bytes
    #[must_use]
    pub const fn binary() -> Self {
        Self {
            reply_encoding: ReplyEncoding::Binary,
        }
    }
}

/// Which part of the application a client serves
///
/// Separate contexts get separate connections so that, for instance, a
/// `SELECT` typed in a CLI tab never changes the database the key browser
/// is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientContext {
    /// Shared client for background work
    #[default]
    Common,
    /// Key browser panels
    Browser,
    /// Interactive CLI
    Cli,
    /// Workbench command editor
    Workbench,
}

impl fmt::Display for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Common => "common",
            Self::Browser => "browser",
            Self::Cli => "cli",
            Self::Workbench => "workbench",
        };
        f.write_str(name)
    }
}

/// Identifies the logical connection target of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Identifier of the stored connection profile
    pub database_id: String,
    /// Application context the client serves
    #[serde(default)]
    pub context: ClientContext,
    /// Distinguishes several clients in the same context (CLI tabs)
    #[serde(default)]
    pub unique_id: Option<String>,
    /// Selected logical database index, if any
    #[serde(default)]
    pub db: Option<u32>,
}

impl ClientMetadata {
    /// Metadata for the common context of a database
    pub fn new(database_id: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            context: ClientContext::Common,
            unique_id: None,
            db: None,
        }
    }

    /// Set the client context
    #[must_use]
    pub fn with_context(mut self, context: ClientContext) -> Self {
        self.context = context;
        self
    }

    /// Set the unique id
    #[must_use]
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Set the logical database index
    #[must_use]
    pub const fn with_db(mut self, db: u32) -> Self {
        self.db = Some(db);
        self
    }

    /// Canonical key used to cache clients
    #[must_use]
    pub fn client_key(&self) -> String {
        let db = self.db.map_or_else(|| "-".to_string(), |db| db.to_string());
        format!(
            "{}:{}:{}:{}",
            self.database_id,
            self.context,
            self.unique_id.as_deref().unwrap_or("-"),
            db
        )
    }
}

/// Represents a slot range in a Redis cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    /// Start of the slot range (inclusive)
    pub start: u16,
    /// End of the slot range (inclusive)
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Check if a slot is within this range
    #[must_use]
    pub const fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }
}

/// Node information in a Redis cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node ID (`host:port` when the server did not report one)
    pub id: String,
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Slot ranges owned by this node
    pub slots: Vec<SlotRange>,
}

impl NodeInfo {
    /// Create a new node info
    #[must_use]
    pub const fn new(id: String, host: String, port: u16) -> Self {
        Self {
            id,
            host,
            port,
            slots: Vec::new(),
        }
    }

    /// `host:port` of the node
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if this node owns a given slot
    #[must_use]
    pub fn owns_slot(&self, slot: u16) -> bool {
        self.slots.iter().any(|range| range.contains(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_separates_contexts() {
        let browser = ClientMetadata::new("db-1").with_context(ClientContext::Browser);
        let cli = ClientMetadata::new("db-1")
            .with_context(ClientContext::Cli)
            .with_unique_id("tab-2")
            .with_db(4);

        assert_eq!(browser.client_key(), "db-1:browser:-:-");
        assert_eq!(cli.client_key(), "db-1:cli:tab-2:4");
        assert_ne!(browser.client_key(), cli.client_key());
    }

    #[test]
    fn test_node_owns_slot() {
        let mut node = NodeInfo::new("n1".into(), "10.0.0.1".into(), 7000);
        node.slots.push(SlotRange::new(0, 5460));
        assert!(node.owns_slot(0));
        assert!(node.owns_slot(5460));
        assert!(!node.owns_slot(5461));
        assert_eq!(node.address(), "10.0.0.1:7000");
    }

    #[test]
    fn test_reply_encoding_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            encoding: ReplyEncoding,
        }
        let parsed: Wrapper = toml::from_str("encoding = \"utf8\"").unwrap();
        assert_eq!(parsed.encoding, ReplyEncoding::Utf8);
        assert_eq!(ReplyEncoding::default(), ReplyEncoding::Binary);
    }
}
