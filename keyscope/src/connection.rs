//! Connection management and topology detection
//!
//! This module handles low-level TCP connections to Redis servers and the
//! one-time decision of which topology a configuration points at.

use crate::protocol::{RespDecoder, RespEncoder};
use bytes::{Buf, Bytes, BytesMut};
use keyscope_core::{
    config::{ConnectionConfig, TopologyMode},
    error::{RedisError, RedisResult},
    value::RespValue,
};
use std::fmt;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Deployment shape behind a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyType {
    /// Standalone Redis server
    Standalone,
    /// Redis Cluster
    Cluster,
    /// Sentinel-managed master
    Sentinel,
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standalone => "standalone",
            Self::Cluster => "cluster",
            Self::Sentinel => "sentinel",
        };
        f.write_str(name)
    }
}

/// Settings needed to open one socket
///
/// Derived from [`ConnectionConfig`], but sentinel connections use the
/// sentinel credentials and never select a database.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// ACL username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Database to select after the handshake
    pub database: Option<u32>,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Per-command read/write timeout
    pub operation_timeout: Duration,
    /// TCP keepalive
    pub tcp_keepalive: Option<Duration>,
}

impl ConnectOptions {
    /// Options for a data node of the given configuration
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database,
            connect_timeout: config.connect_timeout,
            operation_timeout: config.operation_timeout,
            tcp_keepalive: config.tcp_keepalive,
        }
    }

    /// Same options without a database selection
    #[must_use]
    pub fn without_database(mut self) -> Self {
        self.database = None;
        self
    }
}

/// A connection to a Redis server
pub struct RedisConnection {
    stream: TcpStream,
    read_buffer: BytesMut,
    address: String,
    operation_timeout: Duration,
}

impl RedisConnection {
    /// Connect, authenticate and select the configured database
    pub async fn connect(host: &str, port: u16, options: &ConnectOptions) -> RedisResult<Self> {
        let address = format!("{}:{}", host, port);
        debug!("Connecting to Redis at {}", address);

        let stream = timeout(options.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| RedisError::Connection(format!("Timed out connecting to {}", address)))?
            .map_err(|e| {
                RedisError::Connection(format!("Failed to connect to {}: {}", address, e))
            })?;

        stream.set_nodelay(true)?;
        if let Some(keepalive_duration) = options.tcp_keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(keepalive_duration);
            socket2::SockRef::from(&stream)
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| {
                    RedisError::Connection(format!("Failed to set TCP keepalive: {}", e))
                })?;
        }

        let mut conn = Self {
            stream,
            read_buffer: BytesMut::with_capacity(8192),
            address,
            operation_timeout: options.operation_timeout,
        };

        if let Some(ref password) = options.password {
            conn.authenticate(options.username.as_deref(), password)
                .await?;
        }
        if let Some(db) = options.database {
            conn.select_database(db).await?;
        }

        Ok(conn)
    }

    /// `host:port` this connection talks to
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn authenticate(&mut self, username: Option<&str>, password: &str) -> RedisResult<()> {
        debug!("Authenticating with {}", self.address);
        let mut parts = vec![Bytes::from_static(b"AUTH")];
        if let Some(username) = username {
            parts.push(Bytes::copy_from_slice(username.as_bytes()));
        }
        parts.push(Bytes::copy_from_slice(password.as_bytes()));

        match self.execute_raw(&parts).await? {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(RedisError::Auth(e)),
            other => Err(RedisError::Auth(format!(
                "Unexpected authentication response: {:?}",
                other
            ))),
        }
    }

    /// Select a logical database
    pub async fn select_database(&mut self, db: u32) -> RedisResult<()> {
        let parts = [
            Bytes::from_static(b"SELECT"),
            Bytes::from(db.to_string()),
        ];
        match self.execute(&parts).await? {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            other => Err(RedisError::Parse(format!(
                "Unexpected SELECT response: {:?}",
                other
            ))),
        }
    }

    /// Send a command; error replies become `Err`
    pub async fn execute(&mut self, parts: &[Bytes]) -> RedisResult<RespValue> {
        self.execute_raw(parts).await?.into_result()
    }

    /// Send a command and return the reply as decoded, error replies included
    pub async fn execute_raw(&mut self, parts: &[Bytes]) -> RedisResult<RespValue> {
        let encoded = RespEncoder::encode_command(parts)?;

        timeout(self.operation_timeout, self.stream.write_all(&encoded))
            .await
            .map_err(|_| RedisError::Timeout)??;

        timeout(self.operation_timeout, self.read_response())
            .await
            .map_err(|_| RedisError::Timeout)?
    }

    /// Read a complete RESP response from the connection
    async fn read_response(&mut self) -> RedisResult<RespValue> {
        loop {
            let mut cursor = Cursor::new(&self.read_buffer[..]);
            if let Some(value) = RespDecoder::decode(&mut cursor)? {
                let pos = cursor.position() as usize;
                self.read_buffer.advance(pos);
                return Ok(value);
            }

            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(RedisError::Connection(format!(
                    "Connection to {} closed by server",
                    self.address
                )));
            }
        }
    }

    /// Probe the server with `CLUSTER INFO`
    pub async fn detect_topology(&mut self) -> RedisResult<TopologyType> {
        info!("Detecting Redis topology at {}", self.address);

        let parts = [Bytes::from_static(b"CLUSTER"), Bytes::from_static(b"INFO")];
        match self.execute(&parts).await {
            Ok(reply) => {
                let info_str = match reply {
                    RespValue::BulkString(data) => String::from_utf8_lossy(&data).into_owned(),
                    RespValue::SimpleString(s) => s,
                    _ => String::new(),
                };
                if info_str.contains("cluster_enabled:1") || info_str.contains("cluster_state:ok") {
                    info!("Detected Redis Cluster");
                    return Ok(TopologyType::Cluster);
                }
            }
            Err(RedisError::Command(ref e))
                if e.contains("command not supported")
                    || e.contains("unknown command")
                    || e.contains("disabled") =>
            {
                info!("Detected Standalone Redis (CLUSTER command not available)");
                return Ok(TopologyType::Standalone);
            }
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => {
                warn!("Error detecting topology: {}, assuming standalone", e);
                return Ok(TopologyType::Standalone);
            }
        }

        info!("Detected Standalone Redis");
        Ok(TopologyType::Standalone)
    }
}

/// Decides once which topology a configuration points at
pub struct TopologyResolver {
    config: ConnectionConfig,
}

impl TopologyResolver {
    /// Create a resolver for the given configuration
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Resolve the topology
    ///
    /// Forced modes never touch the network. `Auto` picks sentinel when a
    /// sentinel block is configured, otherwise probes the first reachable
    /// endpoint.
    pub async fn resolve(&self) -> RedisResult<TopologyType> {
        match self.config.topology_mode {
            TopologyMode::Standalone => Ok(TopologyType::Standalone),
            TopologyMode::Cluster => Ok(TopologyType::Cluster),
            TopologyMode::Sentinel => {
                if self.config.sentinel.is_none() {
                    return Err(RedisError::Config(
                        "Sentinel topology requested without sentinel settings".to_string(),
                    ));
                }
                Ok(TopologyType::Sentinel)
            }
            TopologyMode::Auto if self.config.sentinel.is_some() => Ok(TopologyType::Sentinel),
            TopologyMode::Auto => self.probe().await,
        }
    }

    async fn probe(&self) -> RedisResult<TopologyType> {
        let endpoints = self.config.parse_endpoints()?;
        if endpoints.is_empty() {
            return Err(RedisError::Config("No endpoints specified".to_string()));
        }

        let options = ConnectOptions::from_config(&self.config).without_database();
        let mut last_error = None;
        for (host, port) in &endpoints {
            match RedisConnection::connect(host, *port, &options).await {
                Ok(mut conn) => return conn.detect_topology().await,
                Err(e) if e.is_connection_error() => {
                    warn!("Endpoint {}:{} unreachable during probe: {}", host, port, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| RedisError::Connection("No reachable endpoint".to_string())))
    }

    /// Get the configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}
