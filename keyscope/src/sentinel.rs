//! Redis Sentinel support
//!
//! Sentinels are asked for the current master of a named group; the client
//! then talks to that master through an ordinary [`Transport`]. When the
//! master stops answering, the address is forgotten and the next command
//! asks the sentinels again, which is how a failover is picked up.

use crate::connection::{ConnectOptions, RedisConnection};
use crate::transport::Transport;
use bytes::Bytes;
use keyscope_core::{
    config::{ConnectionConfig, SentinelConfig, SentinelEndpoint},
    error::{RedisError, RedisResult},
    value::RespValue,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Information about a Redis master as reported by a sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterInfo {
    /// Master group name
    pub name: String,
    /// Master host
    pub host: String,
    /// Master port
    pub port: u16,
    /// Status flags (`master`, `s_down`, `o_down`, ...)
    pub flags: Vec<String>,
}

impl MasterInfo {
    /// Check if master is down
    #[must_use]
    pub fn is_down(&self) -> bool {
        self.flags
            .iter()
            .any(|f| f == "s_down" || f == "o_down" || f == "disconnected")
    }

    /// Check if failover is in progress
    #[must_use]
    pub fn is_failover_in_progress(&self) -> bool {
        self.flags.iter().any(|f| f == "failover_in_progress")
    }

    /// Get master address
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse the flat field/value array returned by `SENTINEL MASTER <name>`
pub fn parse_master_reply(reply: RespValue) -> RedisResult<MasterInfo> {
    let items = reply.into_array()?;
    if items.len() % 2 != 0 {
        return Err(RedisError::Parse(
            "SENTINEL MASTER reply has an odd number of elements".to_string(),
        ));
    }

    let mut fields = HashMap::with_capacity(items.len() / 2);
    for pair in items.chunks(2) {
        fields.insert(pair[0].as_string()?, pair[1].as_string()?);
    }

    let required = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| RedisError::Parse(format!("SENTINEL MASTER reply lacks '{}'", name)))
    };

    let port = required("port")?
        .parse::<u16>()
        .map_err(|e| RedisError::Parse(format!("Invalid master port: {}", e)))?;

    Ok(MasterInfo {
        name: required("name")?,
        host: required("ip")?,
        port,
        flags: fields
            .get("flags")
            .map(|f| f.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
    })
}

/// Asks sentinels, in order, where the master is
pub struct SentinelResolver {
    config: SentinelConfig,
    options: ConnectOptions,
}

impl SentinelResolver {
    /// Create a resolver; sentinel connections reuse the data timeouts
    pub fn new(config: SentinelConfig, connection: &ConnectionConfig) -> Self {
        let options = ConnectOptions {
            username: config.username.clone(),
            password: config.password.clone(),
            database: None,
            connect_timeout: connection.connect_timeout,
            operation_timeout: connection.operation_timeout,
            tcp_keepalive: None,
        };
        Self { config, options }
    }

    /// Name of the master group
    pub fn master_name(&self) -> &str {
        &self.config.master_name
    }

    /// Find the current healthy master
    ///
    /// Unreachable sentinels and sentinels reporting the master as down or
    /// mid-failover are skipped.
    pub async fn discover_master(&self) -> RedisResult<MasterInfo> {
        if self.config.sentinels.is_empty() {
            return Err(RedisError::Config("No sentinels configured".to_string()));
        }

        for endpoint in &self.config.sentinels {
            match self.query(endpoint).await {
                Ok(master) if master.is_down() => {
                    warn!(
                        "Sentinel {} reports master {} down ({})",
                        endpoint.address(),
                        master.address(),
                        master.flags.join(",")
                    );
                }
                Ok(master) if master.is_failover_in_progress() => {
                    warn!(
                        "Sentinel {} is failing over master {}",
                        endpoint.address(),
                        master.address()
                    );
                }
                Ok(master) => {
                    info!(
                        "Sentinel {} names {} as master of '{}'",
                        endpoint.address(),
                        master.address(),
                        master.name
                    );
                    return Ok(master);
                }
                Err(e) => {
                    debug!("Failed to query sentinel {}: {}", endpoint.address(), e);
                }
            }
        }

        Err(RedisError::Sentinel(format!(
            "No sentinel could name a healthy master for '{}'",
            self.config.master_name
        )))
    }

    async fn query(&self, endpoint: &SentinelEndpoint) -> RedisResult<MasterInfo> {
        let mut conn = RedisConnection::connect(&endpoint.host, endpoint.port, &self.options).await?;
        let parts = [
            Bytes::from_static(b"SENTINEL"),
            Bytes::from_static(b"MASTER"),
            Bytes::copy_from_slice(self.config.master_name.as_bytes()),
        ];
        parse_master_reply(conn.execute(&parts).await?)
    }
}

#[derive(Default)]
struct MasterState {
    transport: Option<Arc<Transport>>,
    // db carried over to the next master
    database: Option<u32>,
}

/// Sentinel variant of the client
pub struct SentinelClient {
    resolver: SentinelResolver,
    options: ConnectOptions,
    state: RwLock<MasterState>,
}

impl SentinelClient {
    /// Create the client and locate the master once
    pub async fn connect(config: &ConnectionConfig) -> RedisResult<Self> {
        let sentinel = config.sentinel.clone().ok_or_else(|| {
            RedisError::Config("Sentinel topology requested without sentinel settings".to_string())
        })?;

        let options = ConnectOptions::from_config(config);
        let client = Self {
            resolver: SentinelResolver::new(sentinel, config),
            state: RwLock::new(MasterState {
                transport: None,
                database: options.database,
            }),
            options,
        };
        client.master().await?;
        Ok(client)
    }

    /// Send a command to the current master
    ///
    /// A connection-class failure (or a `READONLY` reply from a demoted
    /// master) forgets the master; the failed command is not retried.
    pub async fn send(&self, parts: Vec<Bytes>) -> RedisResult<RespValue> {
        if parts.is_empty() {
            return Err(RedisError::InvalidCommand("empty command".to_string()));
        }

        let transport = self.master().await?;
        let result = transport.execute(parts).await;
        if let Err(ref e) = result {
            if e.is_connection_error() || is_demoted(e) {
                self.forget(&transport).await;
            }
        }
        result
    }

    /// Database of the current (or last) master connection
    pub async fn current_db(&self) -> Option<u32> {
        let state = self.state.read().await;
        match state.transport {
            Some(ref transport) => transport.selected_db(),
            None => state.database,
        }
    }

    /// Address of the master in use, if one is known
    pub async fn master_address(&self) -> Option<String> {
        let state = self.state.read().await;
        state.transport.as_ref().map(|t| t.address().to_string())
    }

    async fn master(&self) -> RedisResult<Arc<Transport>> {
        if let Some(ref transport) = self.state.read().await.transport {
            return Ok(Arc::clone(transport));
        }

        let mut state = self.state.write().await;
        if let Some(ref transport) = state.transport {
            return Ok(Arc::clone(transport));
        }

        let master = self.resolver.discover_master().await?;
        let mut options = self.options.clone();
        options.database = state.database;
        let transport = Arc::new(Transport::spawn(master.host, master.port, options));
        state.transport = Some(Arc::clone(&transport));
        Ok(transport)
    }

    async fn forget(&self, failed: &Arc<Transport>) {
        let mut state = self.state.write().await;
        let is_current = state
            .transport
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed));
        if is_current {
            warn!(
                "Forgetting master {} of '{}'",
                failed.address(),
                self.resolver.master_name()
            );
            state.database = failed.selected_db();
            state.transport = None;
        }
    }
}

fn is_demoted(error: &RedisError) -> bool {
    matches!(error, RedisError::Command(msg) if msg.starts_with("READONLY"))
}
