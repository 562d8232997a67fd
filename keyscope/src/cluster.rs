//! Redis Cluster support
//!
//! This module provides:
//! - Slot calculation using CRC16
//! - Slot map loading from `CLUSTER SLOTS`
//! - MOVED and ASK redirect handling
//! - Command routing: keyed commands to the slot owner, keyless commands to
//!   any master, `DBSIZE`/`INFO` fanned out to every master and aggregated

use crate::connection::ConnectOptions;
use crate::info::merge_info_replies;
use crate::transport::Transport;
use bytes::Bytes;
use crc16::{State, XMODEM};
use futures_util::future::join_all;
use keyscope_core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
    types::{NodeInfo, SlotRange},
    value::RespValue,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Total number of hash slots in Redis Cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Calculate the hash slot for a given key
///
/// - If the key contains {...}, only the part between the first { and first } is hashed
/// - Otherwise, the entire key is hashed
/// - The hash is CRC16 mod 16384
pub fn calculate_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key);
    State::<XMODEM>::calculate(hash_key) % CLUSTER_SLOTS
}

/// Extract the hash tag from a key
///
/// `{user1000}.following` and `{user1000}.followers` hash to the same slot.
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let end = start + 1 + end;
            // empty tags hash the whole key
            if end > start + 1 {
                return &key[start + 1..end];
            }
        }
    }
    key
}

/// Where a command has to go in a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Owner of this slot
    Slot(u16),
    /// Any master; the command touches no key
    AnyNode,
    /// Every master, integer replies summed
    AllMastersSum,
    /// Every master, INFO replies merged
    AllMastersInfo,
}

/// Commands that touch no key
const KEYLESS_COMMANDS: &[&[u8]] = &[
    b"ACL", b"AUTH", b"BGREWRITEAOF", b"BGSAVE", b"CLIENT", b"CLUSTER", b"COMMAND", b"CONFIG",
    b"DEBUG", b"ECHO", b"FLUSHALL", b"FLUSHDB", b"FUNCTION", b"HELLO", b"KEYS", b"LASTSAVE",
    b"LATENCY", b"LOLWUT", b"MODULE", b"PING", b"PUBLISH", b"RANDOMKEY", b"READONLY",
    b"READWRITE", b"ROLE", b"SAVE", b"SCAN", b"SCRIPT", b"SELECT", b"SLOWLOG", b"SWAPDB", b"TIME",
    b"WAIT",
];

/// Commands whose first key follows a subcommand (`OBJECT ENCODING key`)
const SUBCOMMAND_KEY_COMMANDS: &[&[u8]] = &[b"MEMORY", b"OBJECT", b"XGROUP", b"XINFO"];

/// Decide where a command goes
pub fn route(parts: &[Bytes]) -> Route {
    let Some(name) = parts.first() else {
        return Route::AnyNode;
    };
    let name = name.to_ascii_uppercase();
    let slot_of = |index: usize| parts.get(index).map_or(Route::AnyNode, |k| Route::Slot(calculate_slot(k)));

    match name.as_slice() {
        b"DBSIZE" => Route::AllMastersSum,
        b"INFO" => Route::AllMastersInfo,
        b"EVAL" | b"EVALSHA" | b"EVAL_RO" | b"EVALSHA_RO" | b"FCALL" | b"FCALL_RO" => {
            let numkeys = parts
                .get(2)
                .and_then(|n| std::str::from_utf8(n).ok())
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            if numkeys > 0 {
                slot_of(3)
            } else {
                Route::AnyNode
            }
        }
        b"XREAD" | b"XREADGROUP" => parts
            .iter()
            .position(|p| p.eq_ignore_ascii_case(b"STREAMS"))
            .map_or(Route::AnyNode, |i| slot_of(i + 1)),
        n if SUBCOMMAND_KEY_COMMANDS.contains(&n) => slot_of(2),
        n if KEYLESS_COMMANDS.contains(&n) => Route::AnyNode,
        _ => slot_of(1),
    }
}

/// Parse a `CLUSTER SLOTS` reply into master nodes
///
/// An empty host means "the node you asked", so `seed_host` fills it in.
pub fn parse_cluster_slots(reply: RespValue, seed_host: &str) -> RedisResult<Vec<NodeInfo>> {
    let mut nodes: HashMap<String, NodeInfo> = HashMap::new();

    for entry in reply.into_array()? {
        let fields = entry.into_array()?;
        if fields.len() < 3 {
            return Err(RedisError::Parse(format!(
                "CLUSTER SLOTS entry too short: {:?}",
                fields
            )));
        }

        let start = slot_number(&fields[0])?;
        let end = slot_number(&fields[1])?;
        let master = fields[2].clone().into_array()?;
        if master.len() < 2 {
            return Err(RedisError::Parse("CLUSTER SLOTS master without port".to_string()));
        }

        let mut host = master[0].as_string()?;
        if host.is_empty() || host == "?" {
            host = seed_host.to_string();
        }
        let port = u16::try_from(master[1].as_int()?)
            .map_err(|_| RedisError::Parse("CLUSTER SLOTS port out of range".to_string()))?;
        let address = format!("{}:{}", host, port);
        let id = master
            .get(2)
            .and_then(|v| v.as_string().ok())
            .unwrap_or_else(|| address.clone());

        nodes
            .entry(address)
            .or_insert_with(|| NodeInfo::new(id, host, port))
            .slots
            .push(SlotRange::new(start, end));
    }

    let mut nodes: Vec<NodeInfo> = nodes.into_values().collect();
    nodes.sort_by(|a, b| a.address().cmp(&b.address()));
    Ok(nodes)
}

fn slot_number(value: &RespValue) -> RedisResult<u16> {
    let slot = value.as_int()?;
    u16::try_from(slot)
        .ok()
        .filter(|s| *s < CLUSTER_SLOTS)
        .ok_or_else(|| RedisError::Parse(format!("Invalid slot number {}", slot)))
}

/// Manages cluster topology and slot mappings
#[derive(Clone)]
pub struct ClusterTopology {
    /// Mapping from slot to node address (host, port)
    slot_map: Arc<RwLock<HashMap<u16, (String, u16)>>>,
    /// Master nodes keyed by address
    nodes: Arc<RwLock<HashMap<String, NodeInfo>>>,
}

impl ClusterTopology {
    /// Create a new cluster topology
    pub fn new() -> Self {
        Self {
            slot_map: Arc::new(RwLock::new(HashMap::new())),
            nodes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the node address for a given slot
    pub async fn get_node_for_slot(&self, slot: u16) -> Option<(String, u16)> {
        let slot_map = self.slot_map.read().await;
        slot_map.get(&slot).cloned()
    }

    /// Update the slot mapping when a MOVED redirect occurs
    pub async fn update_slot_mapping(&self, slot: u16, host: String, port: u16) {
        let mut slot_map = self.slot_map.write().await;
        slot_map.insert(slot, (host, port));
    }

    /// Replace the whole map with freshly discovered masters
    pub async fn update_from_nodes(&self, masters: Vec<NodeInfo>) {
        let mut slot_map = self.slot_map.write().await;
        let mut nodes = self.nodes.write().await;
        slot_map.clear();
        nodes.clear();

        for node in masters {
            for range in &node.slots {
                for slot in range.start..=range.end {
                    slot_map.insert(slot, (node.host.clone(), node.port));
                }
            }
            nodes.insert(node.address(), node);
        }
    }

    /// Get all known master nodes
    pub async fn get_all_nodes(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.read().await;
        let mut all: Vec<NodeInfo> = nodes.values().cloned().collect();
        all.sort_by(|a, b| a.address().cmp(&b.address()));
        all
    }
}

impl Default for ClusterTopology {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper to handle MOVED and ASK redirects
pub struct RedirectHandler {
    topology: ClusterTopology,
    max_redirects: usize,
}

impl RedirectHandler {
    /// Create a new redirect handler
    pub fn new(topology: ClusterTopology, max_redirects: usize) -> Self {
        Self {
            topology,
            max_redirects,
        }
    }

    /// Handle a redirect error; returns target host, port and whether it was ASK
    pub async fn handle_redirect(&self, error: &RedisError) -> RedisResult<(String, u16, bool)> {
        match error {
            RedisError::Moved { slot, host, port } => {
                // MOVED is permanent
                self.topology
                    .update_slot_mapping(*slot, host.clone(), *port)
                    .await;
                Ok((host.clone(), *port, false))
            }
            RedisError::Ask { host, port, .. } => Ok((host.clone(), *port, true)),
            _ => Err(RedisError::Cluster(format!(
                "Not a redirect error: {:?}",
                error
            ))),
        }
    }

    /// Get max redirects allowed
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }
}

/// Cluster variant of the client
///
/// Holds one lazily connected [`Transport`] per node. Dispatch is serialized
/// per handle so commands reach the cluster in submission order even when
/// they land on different nodes.
pub struct ClusterClient {
    options: ConnectOptions,
    seeds: Vec<(String, u16)>,
    topology: ClusterTopology,
    redirects: RedirectHandler,
    nodes: RwLock<HashMap<String, Arc<Transport>>>,
    dispatch_lock: Mutex<()>,
}

impl ClusterClient {
    /// Connect to the seeds and load the slot map
    pub async fn connect(config: &ConnectionConfig) -> RedisResult<Self> {
        info!("Connecting to Redis Cluster");

        let seeds = config.parse_endpoints()?;
        if seeds.is_empty() {
            return Err(RedisError::Config("No endpoints specified".to_string()));
        }

        let topology = ClusterTopology::new();
        let client = Self {
            options: ConnectOptions::from_config(config).without_database(),
            seeds,
            redirects: RedirectHandler::new(topology.clone(), config.max_redirects),
            topology,
            nodes: RwLock::new(HashMap::new()),
            dispatch_lock: Mutex::new(()),
        };
        client.refresh_slots().await?;
        Ok(client)
    }

    /// Reload the slot map from the first seed or known node that answers
    pub async fn refresh_slots(&self) -> RedisResult<()> {
        let mut candidates = self.seeds.clone();
        for node in self.topology.get_all_nodes().await {
            if !candidates.contains(&(node.host.clone(), node.port)) {
                candidates.push((node.host, node.port));
            }
        }

        let mut last_error = None;
        for (host, port) in candidates {
            let transport = self.transport_for(&host, port).await;
            let parts = vec![Bytes::from_static(b"CLUSTER"), Bytes::from_static(b"SLOTS")];
            let loaded = match transport.execute(parts).await {
                Ok(reply) => parse_cluster_slots(reply, &host),
                Err(e) => Err(e),
            };

            match loaded {
                Ok(masters) if !masters.is_empty() => {
                    info!(
                        "Loaded cluster slot map from {}:{} ({} masters)",
                        host,
                        port,
                        masters.len()
                    );
                    self.topology.update_from_nodes(masters).await;
                    return Ok(());
                }
                Ok(_) => {
                    warn!("{}:{} reported no slots", host, port);
                    last_error = Some(RedisError::Cluster(format!(
                        "{}:{} reported no slots",
                        host, port
                    )));
                }
                Err(e) => {
                    warn!("Failed to load slots from {}:{}: {}", host, port, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) if e.is_connection_error() => e,
            Some(e) => RedisError::Cluster(format!("Failed to load cluster slots: {}", e)),
            None => RedisError::Cluster("No cluster node to ask for slots".to_string()),
        })
    }

    /// Known master nodes
    pub async fn masters(&self) -> Vec<NodeInfo> {
        self.topology.get_all_nodes().await
    }

    /// Slot map shared with the redirect handler
    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// Send a command to the node(s) it belongs to
    pub async fn send(&self, parts: Vec<Bytes>) -> RedisResult<RespValue> {
        if parts.is_empty() {
            return Err(RedisError::InvalidCommand("empty command".to_string()));
        }

        let _ordered = self.dispatch_lock.lock().await;
        match route(&parts) {
            Route::Slot(slot) => self.execute_with_redirects(slot, parts).await,
            Route::AnyNode => {
                let transport = self.any_master().await?;
                transport.execute(parts).await
            }
            Route::AllMastersSum => {
                let mut total = 0i64;
                for reply in self.fan_out(parts).await? {
                    total += reply.as_int()?;
                }
                Ok(RespValue::Integer(total))
            }
            Route::AllMastersInfo => {
                let texts = self
                    .fan_out(parts)
                    .await?
                    .iter()
                    .map(RespValue::as_string)
                    .collect::<RedisResult<Vec<_>>>()?;
                Ok(RespValue::from(merge_info_replies(&texts)))
            }
        }
    }

    async fn execute_with_redirects(&self, slot: u16, parts: Vec<Bytes>) -> RedisResult<RespValue> {
        let max_redirects = self.redirects.max_redirects();
        let mut target = match self.topology.get_node_for_slot(slot).await {
            Some((host, port)) => self.transport_for(&host, port).await,
            None => self.any_master().await?,
        };
        let mut asking = false;
        let mut redirects = 0;

        loop {
            if asking {
                target.execute(vec![Bytes::from_static(b"ASKING")]).await?;
            }

            match target.execute(parts.clone()).await {
                Err(e) if e.is_redirect() => {
                    if redirects >= max_redirects {
                        return Err(RedisError::MaxRedirectsExceeded(max_redirects));
                    }
                    redirects += 1;
                    debug!(
                        "Handling redirect (attempt {}/{}): {}",
                        redirects, max_redirects, e
                    );

                    let (host, port, is_ask) = self.redirects.handle_redirect(&e).await?;
                    target = self.transport_for(&host, port).await;
                    asking = is_ask;
                }
                other => return other,
            }
        }
    }

    async fn fan_out(&self, parts: Vec<Bytes>) -> RedisResult<Vec<RespValue>> {
        let masters = self.masters().await;
        if masters.is_empty() {
            return Err(RedisError::Cluster("No known cluster masters".to_string()));
        }

        let mut transports = Vec::with_capacity(masters.len());
        for node in &masters {
            transports.push(self.transport_for(&node.host, node.port).await);
        }

        join_all(transports.iter().map(|t| t.execute(parts.clone())))
            .await
            .into_iter()
            .collect()
    }

    async fn any_master(&self) -> RedisResult<Arc<Transport>> {
        let masters = self.masters().await;
        match masters.first() {
            Some(node) => Ok(self.transport_for(&node.host, node.port).await),
            None => {
                let (host, port) = self
                    .seeds
                    .first()
                    .cloned()
                    .ok_or_else(|| RedisError::Cluster("No cluster nodes available".to_string()))?;
                Ok(self.transport_for(&host, port).await)
            }
        }
    }

    async fn transport_for(&self, host: &str, port: u16) -> Arc<Transport> {
        let node_key = format!("{}:{}", host, port);
        if let Some(transport) = self.nodes.read().await.get(&node_key) {
            return Arc::clone(transport);
        }

        let mut nodes = self.nodes.write().await;
        Arc::clone(
            nodes
                .entry(node_key)
                .or_insert_with(|| Arc::new(Transport::spawn(host, port, self.options.clone()))),
        )
    }
}
