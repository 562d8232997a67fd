//! Configuration types for Redis connections
//!
//! [`ConnectionConfig`] is the builder used in code. [`ConnectionProfile`] is
//! the serializable descriptor of a stored connection (TOML or any serde
//! format) and converts into a `ConnectionConfig`.

use crate::error::{RedisError, RedisResult};
use serde::Deserialize;
use std::time::Duration;

/// Default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// Default Sentinel port
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Topology hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyMode {
    /// Sentinel if a sentinel block is configured, otherwise probe with `CLUSTER INFO`
    #[default]
    Auto,
    /// Force standalone mode
    Standalone,
    /// Force cluster mode
    Cluster,
    /// Resolve the master through Sentinel
    Sentinel,
}

/// Sentinel endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelEndpoint {
    /// Sentinel host
    pub host: String,
    /// Sentinel port
    pub port: u16,
}

impl SentinelEndpoint {
    /// Create a new sentinel endpoint
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse from address string (`host:port`, or `host` for the default port)
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not a number.
    pub fn from_address(addr: &str) -> RedisResult<Self> {
        let (host, port) = parse_host_port(addr, DEFAULT_SENTINEL_PORT)
            .ok_or_else(|| RedisError::Config(format!("Invalid sentinel address: {}", addr)))?;
        Ok(Self::new(host, port))
    }

    /// Get the address string
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for Redis Sentinel
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Name of the monitored master group
    pub master_name: String,
    /// Sentinels, asked in order
    pub sentinels: Vec<SentinelEndpoint>,
    /// Username for sentinel authentication
    pub username: Option<String>,
    /// Password for sentinel authentication
    pub password: Option<String>,
}

impl SentinelConfig {
    /// Create a new sentinel configuration
    #[must_use]
    pub fn new(master_name: impl Into<String>) -> Self {
        Self {
            master_name: master_name.into(),
            sentinels: Vec::new(),
            username: None,
            password: None,
        }
    }

    /// Add a sentinel endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn add_sentinel(mut self, addr: impl AsRef<str>) -> RedisResult<Self> {
        self.sentinels
            .push(SentinelEndpoint::from_address(addr.as_ref())?);
        Ok(self)
    }

    /// Set sentinel password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set sentinel username
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Configuration for a Redis connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Comma separated endpoints, e.g. `redis://host1:6379,host2:6379`
    pub connection_string: String,

    /// Optional ACL username
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Logical database to select after connecting (standalone and sentinel)
    pub database: Option<u32>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Read/write operation timeout
    pub operation_timeout: Duration,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Topology hint
    pub topology_mode: TopologyMode,

    /// Maximum number of MOVED/ASK hops per command
    pub max_redirects: usize,

    /// Sentinel configuration
    pub sentinel: Option<SentinelConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://localhost:6379".to_string(),
            username: None,
            password: None,
            database: None,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            topology_mode: TopologyMode::Auto,
            max_redirects: 3,
            sentinel: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given connection string
    ///
    /// Only the endpoint list is read from the string; any `user:pass@`
    /// userinfo or `/db` path is ignored. Use [`ConnectionConfig::from_url`]
    /// to pick those up.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Create a configuration from a `redis://[user:pass@]host:port[/db]` URL
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported schemes or a non-numeric database.
    pub fn from_url(url: &str) -> RedisResult<Self> {
        let url = url.trim();
        let rest = if let Some(rest) = url.strip_prefix("redis://") {
            rest
        } else if url.starts_with("rediss://") {
            return Err(RedisError::Config("TLS connections are not supported".to_string()));
        } else if url.contains("://") {
            return Err(RedisError::Config(format!("Unsupported URL scheme: {}", url)));
        } else {
            url
        };

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let (userinfo, hosts) = match authority.rsplit_once('@') {
            Some((userinfo, hosts)) => (Some(userinfo), hosts),
            None => (None, authority),
        };

        let mut config = Self::new(hosts);
        if let Some(userinfo) = userinfo {
            match userinfo.split_once(':') {
                Some((user, pass)) => {
                    if !user.is_empty() {
                        config.username = Some(user.to_string());
                    }
                    config.password = Some(pass.to_string());
                }
                None if !userinfo.is_empty() => config.password = Some(userinfo.to_string()),
                None => {}
            }
        }

        let path = path.trim_end_matches('/');
        if !path.is_empty() {
            let db = path
                .parse::<u32>()
                .map_err(|_| RedisError::Config(format!("Invalid database index: {}", path)))?;
            config.database = Some(db);
        }

        Ok(config)
    }

    /// Create a new connection config resolved through Sentinel
    #[must_use]
    pub fn new_with_sentinel(sentinel_config: SentinelConfig) -> Self {
        Self {
            connection_string: String::new(),
            topology_mode: TopologyMode::Sentinel,
            sentinel: Some(sentinel_config),
            ..Default::default()
        }
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the ACL username
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the logical database index
    #[must_use]
    pub const fn with_database(mut self, database: u32) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set or disable TCP keepalive
    #[must_use]
    pub const fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// Set the topology mode
    #[must_use]
    pub const fn with_topology_mode(mut self, mode: TopologyMode) -> Self {
        self.topology_mode = mode;
        self
    }

    /// Set the maximum number of redirects
    #[must_use]
    pub const fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Attach a sentinel configuration
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: SentinelConfig) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// Parse connection endpoints from the connection string
    ///
    /// Endpoints without a port use 6379.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint has a non-numeric port.
    pub fn parse_endpoints(&self) -> RedisResult<Vec<(String, u16)>> {
        let conn_str = self.connection_string.trim();
        let addr_part = conn_str.strip_prefix("redis://").unwrap_or(conn_str);
        let addr_part = addr_part.split('/').next().unwrap_or_default();
        let addr_part = addr_part
            .rsplit_once('@')
            .map_or(addr_part, |(_, hosts)| hosts);

        addr_part
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| {
                parse_host_port(endpoint, DEFAULT_PORT)
                    .ok_or_else(|| RedisError::Config(format!("Invalid endpoint: {}", endpoint)))
            })
            .collect()
    }
}

/// Split `host:port`, falling back to `default_port` when no port is given
fn parse_host_port(addr: &str, default_port: u16) -> Option<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return None;
    }

    // bracketed IPv6: [::1]:6379
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => default_port,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host.to_string(), port.parse().ok()?)),
        Some(_) => Some((addr.to_string(), default_port)),
        None => Some((addr.to_string(), default_port)),
    }
}

/// Sentinel block of a [`ConnectionProfile`]
#[derive(Debug, Clone, Deserialize)]
pub struct SentinelProfile {
    /// Master group name
    pub master_name: String,
    /// Sentinel addresses (`host:port`)
    pub sentinels: Vec<String>,
    /// Sentinel username
    #[serde(default)]
    pub username: Option<String>,
    /// Sentinel password
    #[serde(default)]
    pub password: Option<String>,
}

/// Serializable description of a stored connection
///
/// ```toml
/// id = "local"
/// host = "127.0.0.1"
/// port = 6379
/// db = 2
/// topology = "standalone"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionProfile {
    /// Profile identifier, used as `ClientMetadata::database_id`
    pub id: String,
    /// Full URL; takes precedence over `host`/`port`
    #[serde(default)]
    pub url: Option<String>,
    /// Host of the first endpoint
    #[serde(default)]
    pub host: Option<String>,
    /// Port of the first endpoint
    #[serde(default)]
    pub port: Option<u16>,
    /// Extra cluster seed nodes (`host:port`)
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Topology hint
    #[serde(default)]
    pub topology: TopologyMode,
    /// ACL username
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index
    #[serde(default)]
    pub db: Option<u32>,
    /// Connect timeout in milliseconds
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// Operation timeout in milliseconds
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
    /// TCP keepalive in seconds; 0 disables keepalive
    #[serde(default)]
    pub tcp_keepalive_secs: Option<u64>,
    /// Maximum redirects per command in cluster mode
    #[serde(default)]
    pub max_redirects: Option<usize>,
    /// Sentinel settings
    #[serde(default)]
    pub sentinel: Option<SentinelProfile>,
}

impl ConnectionProfile {
    /// Parse a profile from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Config`] when the TOML is invalid.
    pub fn from_toml_str(text: &str) -> RedisResult<Self> {
        toml::from_str(text).map_err(|e| RedisError::Config(e.to_string()))
    }

    /// Build the connection configuration described by this profile
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Config`] when neither `url` nor `host` (nor a
    /// sentinel block) is present, or when an address is malformed.
    pub fn into_config(self) -> RedisResult<ConnectionConfig> {
        let mut config = match (&self.url, &self.host) {
            (Some(url), _) => ConnectionConfig::from_url(url)?,
            (None, Some(host)) => {
                ConnectionConfig::new(format!("{}:{}", host, self.port.unwrap_or(DEFAULT_PORT)))
            }
            (None, None) if self.sentinel.is_some() => ConnectionConfig::new(""),
            (None, None) => {
                return Err(RedisError::Config(format!(
                    "Profile '{}' has neither url nor host",
                    self.id
                )))
            }
        };

        for node in &self.nodes {
            if !config.connection_string.is_empty() {
                config.connection_string.push(',');
            }
            config.connection_string.push_str(node);
        }

        config.topology_mode = self.topology;
        if self.username.is_some() {
            config.username = self.username;
        }
        if self.password.is_some() {
            config.password = self.password;
        }
        if self.db.is_some() {
            config.database = self.db;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.operation_timeout_ms {
            config.operation_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = self.tcp_keepalive_secs {
            config.tcp_keepalive = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(max) = self.max_redirects {
            config.max_redirects = max;
        }

        if let Some(sentinel) = self.sentinel {
            let mut sentinel_config = SentinelConfig::new(sentinel.master_name);
            for addr in &sentinel.sentinels {
                sentinel_config = sentinel_config.add_sentinel(addr)?;
            }
            sentinel_config.username = sentinel.username;
            sentinel_config.password = sentinel.password;
            config.sentinel = Some(sentinel_config);
        }

        Ok(config)
    }
}
