//! Client pooling
//!
//! Handles are cached per [`ClientMetadata::client_key`], so each database,
//! context and CLI tab gets its own [`RedisClient`]. Concurrent requests for
//! the same key share one connect attempt.

use crate::client::RedisClient;
use keyscope_core::{config::ConnectionConfig, error::RedisResult, types::ClientMetadata};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default idle time before a handle is evicted
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct PooledClient {
    metadata: ClientMetadata,
    client: OnceCell<Arc<RedisClient>>,
    // millis since pool creation
    last_used: AtomicU64,
}

/// Cache of connected clients
pub struct ClientPool {
    clients: RwLock<HashMap<String, Arc<PooledClient>>>,
    idle_timeout: Duration,
    epoch: Instant,
}

impl ClientPool {
    /// Create a pool with the default idle timeout
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    /// Create a pool evicting handles unused for `idle_timeout`
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            idle_timeout,
            epoch: Instant::now(),
        }
    }

    /// Cached client for `metadata`, connecting with `config` on a miss
    ///
    /// A logical index in the metadata overrides the configured database.
    /// A failed connect is not cached.
    pub async fn get_or_connect(
        &self,
        metadata: &ClientMetadata,
        config: ConnectionConfig,
    ) -> RedisResult<Arc<RedisClient>> {
        let key = metadata.client_key();
        let entry = self.entry(&key, metadata).await;
        let config = match metadata.db {
            Some(db) => config.with_database(db),
            None => config,
        };

        let connecting = key.clone();
        let client = match entry
            .client
            .get_or_try_init(|| async move {
                info!("Creating client {}", connecting);
                RedisClient::connect(config).await.map(Arc::new)
            })
            .await
        {
            Ok(client) => client,
            Err(e) => {
                self.discard_unconnected(&key, &entry).await;
                return Err(e);
            }
        };

        entry.last_used.store(self.now_millis(), Ordering::Relaxed);
        Ok(Arc::clone(client))
    }

    /// Cached client, if one is connected
    pub async fn get(&self, metadata: &ClientMetadata) -> Option<Arc<RedisClient>> {
        let clients = self.clients.read().await;
        let entry = clients.get(&metadata.client_key())?;
        let client = entry.client.get()?;
        entry.last_used.store(self.now_millis(), Ordering::Relaxed);
        Some(Arc::clone(client))
    }

    /// Drop the handle for `metadata`
    pub async fn remove(&self, metadata: &ClientMetadata) -> bool {
        self.clients
            .write()
            .await
            .remove(&metadata.client_key())
            .is_some()
    }

    /// Drop every handle of a database (all contexts and tabs)
    pub async fn remove_database(&self, database_id: &str) -> usize {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|_, entry| entry.metadata.database_id != database_id);
        before - clients.len()
    }

    /// Evict handles idle for longer than the idle timeout
    pub async fn sweep_idle(&self) -> usize {
        let now = self.now_millis();
        let limit = u64::try_from(self.idle_timeout.as_millis()).unwrap_or(u64::MAX);

        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|key, entry| {
            let idle = now.saturating_sub(entry.last_used.load(Ordering::Relaxed));
            let keep = idle <= limit;
            if !keep {
                debug!("Evicting idle client {} ({} ms idle)", key, idle);
            }
            keep
        });
        before - clients.len()
    }

    /// Number of cached handles
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether no handle is cached
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` until the pool is dropped
    pub fn spawn_idle_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let evicted = pool.sweep_idle().await;
                if evicted > 0 {
                    info!("Evicted {} idle clients", evicted);
                }
            }
        })
    }

    async fn entry(&self, key: &str, metadata: &ClientMetadata) -> Arc<PooledClient> {
        if let Some(entry) = self.clients.read().await.get(key) {
            return Arc::clone(entry);
        }

        let now = self.now_millis();
        let mut clients = self.clients.write().await;
        Arc::clone(clients.entry(key.to_string()).or_insert_with(|| {
            Arc::new(PooledClient {
                metadata: metadata.clone(),
                client: OnceCell::new(),
                last_used: AtomicU64::new(now),
            })
        }))
    }

    // another caller may have connected or replaced the entry meanwhile
    async fn discard_unconnected(&self, key: &str, entry: &Arc<PooledClient>) {
        let mut clients = self.clients.write().await;
        if let Some(current) = clients.get(key) {
            if Arc::ptr_eq(current, entry) && current.client.get().is_none() {
                clients.remove(key);
            }
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}
