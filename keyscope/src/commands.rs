//! Typed command builders
//!
//! A thin layer over [`CommandExecutor::send_command`] for the commands the
//! facade itself relies on. Anything else goes through `send_command` with
//! raw parts.

use crate::client::CommandExecutor;
use crate::info::InfoReply;
use crate::reply::{reply_to_int, reply_to_text};
use async_trait::async_trait;
use bytes::Bytes;
use keyscope_core::{
    error::{RedisError, RedisResult},
    types::{CommandOptions, RedisValue, ReplyEncoding},
};

/// Trait for commands that can be executed
pub trait Command {
    /// The return type of the command
    type Output;

    /// Get the command name
    fn command_name(&self) -> &str;

    /// Get the command arguments
    fn args(&self) -> Vec<Bytes>;

    /// Parse the normalized reply into the output type
    fn parse_response(&self, response: RedisValue) -> RedisResult<Self::Output>;

    /// How the reply should be decoded before parsing
    fn reply_encoding(&self) -> ReplyEncoding {
        ReplyEncoding::Utf8
    }

    /// Full command line: name followed by arguments
    fn to_parts(&self) -> Vec<Bytes> {
        let mut parts = Vec::with_capacity(1 + self.args().len());
        parts.push(Bytes::copy_from_slice(self.command_name().as_bytes()));
        parts.extend(self.args());
        parts
    }
}

/// Run typed commands on anything that can send raw ones
#[async_trait]
pub trait CommandExt {
    /// Execute a typed command
    async fn execute<C>(&self, command: C) -> RedisResult<C::Output>
    where
        C: Command + Send + Sync,
        C::Output: Send;
}

#[async_trait]
impl<T> CommandExt for T
where
    T: CommandExecutor + ?Sized,
{
    async fn execute<C>(&self, command: C) -> RedisResult<C::Output>
    where
        C: Command + Send + Sync,
        C::Output: Send,
    {
        let options = CommandOptions {
            reply_encoding: command.reply_encoding(),
        };
        let reply = self.send_command(command.to_parts(), options).await?;
        command.parse_response(reply)
    }
}

/// DBSIZE command
#[derive(Debug, Clone, Copy, Default)]
pub struct DbSizeCommand;

impl DbSizeCommand {
    /// Create a new DBSIZE command
    pub fn new() -> Self {
        Self
    }
}

impl Command for DbSizeCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "DBSIZE"
    }

    fn args(&self) -> Vec<Bytes> {
        Vec::new()
    }

    fn parse_response(&self, response: RedisValue) -> RedisResult<Self::Output> {
        reply_to_int(&response)
    }
}

/// INFO command, optionally limited to one section
#[derive(Debug, Clone, Default)]
pub struct InfoCommand {
    section: Option<String>,
}

impl InfoCommand {
    /// INFO with the server's default sections
    pub fn new() -> Self {
        Self::default()
    }

    /// INFO for a single section
    pub fn section(section: impl Into<String>) -> Self {
        Self {
            section: Some(section.into()),
        }
    }

    /// `INFO keyspace`
    pub fn keyspace() -> Self {
        Self::section("keyspace")
    }
}

impl Command for InfoCommand {
    type Output = InfoReply;

    fn command_name(&self) -> &str {
        "INFO"
    }

    fn args(&self) -> Vec<Bytes> {
        self.section
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }

    fn parse_response(&self, response: RedisValue) -> RedisResult<Self::Output> {
        Ok(InfoReply::parse(&reply_to_text(response)?))
    }
}

/// PING command
#[derive(Debug, Clone, Default)]
pub struct PingCommand {
    message: Option<String>,
}

impl PingCommand {
    /// Plain PING
    pub fn new() -> Self {
        Self::default()
    }

    /// PING with a message to echo
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

impl Command for PingCommand {
    type Output = String;

    fn command_name(&self) -> &str {
        "PING"
    }

    fn args(&self) -> Vec<Bytes> {
        self.message
            .iter()
            .map(|m| Bytes::copy_from_slice(m.as_bytes()))
            .collect()
    }

    fn parse_response(&self, response: RedisValue) -> RedisResult<Self::Output> {
        reply_to_text(response)
    }
}

/// SELECT command
#[derive(Debug, Clone, Copy)]
pub struct SelectCommand {
    db: u32,
}

impl SelectCommand {
    /// Select logical database `db`
    pub fn new(db: u32) -> Self {
        Self { db }
    }
}

impl Command for SelectCommand {
    type Output = ();

    fn command_name(&self) -> &str {
        "SELECT"
    }

    fn args(&self) -> Vec<Bytes> {
        vec![Bytes::from(self.db.to_string())]
    }

    fn parse_response(&self, response: RedisValue) -> RedisResult<Self::Output> {
        match response {
            RedisValue::Status(ref s) if s == "OK" => Ok(()),
            other => Err(RedisError::Parse(format!(
                "Unexpected SELECT response: {:?}",
                other
            ))),
        }
    }
}
