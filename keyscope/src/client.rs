//! High-level Redis client
//!
//! [`RedisClient`] is a closed set of topology variants. The variant is
//! decided once in [`RedisClient::connect`]; every command afterwards goes
//! straight to that variant's transport.

use crate::cluster::ClusterClient;
use crate::connection::{ConnectOptions, TopologyResolver, TopologyType};
use crate::reply::normalize;
use crate::sentinel::SentinelClient;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use keyscope_core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
    types::{CommandOptions, RedisValue},
    value::RespValue,
};
use tracing::info;

/// What every client variant can do
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Send one command and normalize its reply
    ///
    /// `parts[0]` is the command name. An empty `parts` fails with
    /// [`RedisError::InvalidCommand`] without touching the network.
    async fn send_command(
        &self,
        parts: Vec<Bytes>,
        options: CommandOptions,
    ) -> RedisResult<RedisValue>;

    /// Logical database the handle currently uses, `None` if it has none
    async fn current_db_index(&self) -> Option<u32>;

    /// Topology of the deployment behind the handle
    fn topology(&self) -> TopologyType;
}

/// Standalone variant: one transport to one server
pub struct StandaloneClient {
    transport: Transport,
}

impl StandaloneClient {
    /// Create the client; no connection is opened until the first command
    pub fn new(config: &ConnectionConfig) -> RedisResult<Self> {
        let (host, port) = config
            .parse_endpoints()?
            .into_iter()
            .next()
            .ok_or_else(|| RedisError::Config("No endpoints specified".to_string()))?;

        Ok(Self {
            transport: Transport::spawn(host, port, ConnectOptions::from_config(config)),
        })
    }

    /// Send a raw command
    pub async fn send(&self, parts: Vec<Bytes>) -> RedisResult<RespValue> {
        self.transport.execute(parts).await
    }

    /// Database the connection is on
    pub fn current_db(&self) -> Option<u32> {
        self.transport.selected_db()
    }

    /// `host:port` of the server
    pub fn address(&self) -> &str {
        self.transport.address()
    }
}

/// A client bound to one deployment
pub enum RedisClient {
    /// Single server
    Standalone(StandaloneClient),
    /// Redis Cluster
    Cluster(ClusterClient),
    /// Master located through sentinels
    Sentinel(SentinelClient),
}

impl RedisClient {
    /// Connect to Redis with the given configuration
    ///
    /// The topology is resolved here and never re-checked.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use keyscope::{CommandExecutor, CommandOptions, ConnectionConfig, RedisClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = ConnectionConfig::new("redis://localhost:6379");
    ///     let client = RedisClient::connect(config).await?;
    ///     let pong = client
    ///         .send_command(vec!["PING".into()], CommandOptions::utf8())
    ///         .await?;
    ///     println!("{:?}", pong);
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: ConnectionConfig) -> RedisResult<Self> {
        let topology = TopologyResolver::new(config.clone()).resolve().await?;
        info!("Connecting to {} Redis", topology);

        match topology {
            TopologyType::Standalone => Ok(Self::Standalone(StandaloneClient::new(&config)?)),
            TopologyType::Cluster => Ok(Self::Cluster(ClusterClient::connect(&config).await?)),
            TopologyType::Sentinel => Ok(Self::Sentinel(SentinelClient::connect(&config).await?)),
        }
    }

    async fn send_raw(&self, parts: Vec<Bytes>) -> RedisResult<RespValue> {
        match self {
            Self::Standalone(client) => client.send(parts).await,
            Self::Cluster(client) => client.send(parts).await,
            Self::Sentinel(client) => client.send(parts).await,
        }
    }
}

#[async_trait]
impl CommandExecutor for RedisClient {
    async fn send_command(
        &self,
        parts: Vec<Bytes>,
        options: CommandOptions,
    ) -> RedisResult<RedisValue> {
        if parts.is_empty() {
            return Err(RedisError::InvalidCommand(
                "command must have at least a name".to_string(),
            ));
        }

        let reply = self.send_raw(parts).await?;
        normalize(reply, options.reply_encoding)
    }

    async fn current_db_index(&self) -> Option<u32> {
        match self {
            Self::Standalone(client) => client.current_db(),
            Self::Cluster(_) => None,
            Self::Sentinel(client) => client.current_db().await,
        }
    }

    fn topology(&self) -> TopologyType {
        match self {
            Self::Standalone(_) => TopologyType::Standalone,
            Self::Cluster(_) => TopologyType::Cluster,
            Self::Sentinel(_) => TopologyType::Sentinel,
        }
    }
}
