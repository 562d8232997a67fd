//! Error types for Redis operations

use std::io;
use thiserror::Error;

/// Result type for Redis operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Error type shared by every layer of the client facade
///
/// The variants fall into three groups callers care about:
/// connection-class failures (nothing reachable), command failures (the
/// deployment rejected the command) and parse failures (the reply did not
/// have the expected shape).
#[derive(Error, Debug)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// No transport could be reached or the transport was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// The deployment rejected the command
    #[error("{0}")]
    Command(String),

    /// A reply did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// The command was rejected before reaching a transport
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// MOVED redirect in cluster mode
    #[error("MOVED redirect: slot {slot} to {host}:{port}")]
    Moved {
        /// Slot number that was moved
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// ASK redirect in cluster mode
    #[error("ASK redirect: slot {slot} to {host}:{port}")]
    Ask {
        /// Slot number for temporary redirect
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cluster error
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Sentinel could not provide a usable master
    #[error("Sentinel error: {0}")]
    Sentinel(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Too many MOVED/ASK hops for one command
    #[error("Maximum redirects ({0}) exceeded")]
    MaxRedirectsExceeded(usize),
}

impl RedisError {
    /// Build the error for a RESP error reply, recognising cluster redirects
    #[must_use]
    pub fn from_error_reply(msg: &str) -> Self {
        Self::parse_redirect(msg).unwrap_or_else(|| Self::Command(msg.to_string()))
    }

    /// Parse a Redis error message to check for MOVED or ASK redirects
    #[must_use]
    pub fn parse_redirect(msg: &str) -> Option<Self> {
        let (kind, rest) = msg.split_once(' ')?;
        let mut parts = rest.split_whitespace();
        let slot = parts.next()?.parse::<u16>().ok()?;
        let (host, port) = parts.next()?.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        if parts.next().is_some() {
            return None;
        }

        let host = host.to_string();
        match kind {
            "MOVED" => Some(Self::Moved { slot, host, port }),
            "ASK" => Some(Self::Ask { slot, host, port }),
            _ => None,
        }
    }

    /// Check if this error is a redirect (MOVED or ASK)
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        matches!(self, Self::Moved { .. } | Self::Ask { .. })
    }

    /// Whether the failure means the transport is unusable
    ///
    /// Transports drop their socket on these errors and reconnect on the
    /// next command.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection(_) | Self::Timeout | Self::Sentinel(_)
        )
    }

    /// Whether the deployment rejected the command
    #[must_use]
    pub const fn is_command_error(&self) -> bool {
        matches!(self, Self::Command(_))
    }
}
