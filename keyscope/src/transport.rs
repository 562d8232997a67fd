//! Per-handle command transport
//!
//! A [`Transport`] owns one socket, driven by a background task that drains
//! an mpsc queue. Requests are written in queue order, so commands issued on
//! one transport reach the server in submission order. Each caller waits on a
//! oneshot; dropping that wait abandons the reply but the exchange itself
//! still completes, keeping the socket in sync.

use crate::connection::{ConnectOptions, RedisConnection};
use bytes::Bytes;
use keyscope_core::{
    error::{RedisError, RedisResult},
    value::RespValue,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const NO_DB: u64 = u64::MAX;

/// Logical database currently selected on a transport
///
/// Updated by the transport task after a successful `SELECT` so that a
/// reconnect re-selects the same database and callers can ask which index
/// they are on.
#[derive(Debug, Clone)]
pub struct SelectedDb(Arc<AtomicU64>);

impl SelectedDb {
    /// Create with an optional initial index
    pub fn new(db: Option<u32>) -> Self {
        Self(Arc::new(AtomicU64::new(db.map_or(NO_DB, u64::from))))
    }

    /// Current index, `None` if nothing was ever selected
    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::Acquire) {
            NO_DB => None,
            db => u32::try_from(db).ok(),
        }
    }

    /// Record a new index
    pub fn set(&self, db: u32) {
        self.0.store(u64::from(db), Ordering::Release);
    }
}

/// Request handed to the transport task
struct CommandRequest {
    parts: Vec<Bytes>,
    response_tx: oneshot::Sender<RedisResult<RespValue>>,
}

/// Queue-fed connection to one server
pub struct Transport {
    command_tx: mpsc::UnboundedSender<CommandRequest>,
    address: String,
    selected_db: SelectedDb,
}

impl Transport {
    /// Spawn the transport task; the socket is opened on the first command
    pub fn spawn(host: impl Into<String>, port: u16, options: ConnectOptions) -> Self {
        let host = host.into();
        let address = format!("{}:{}", host, port);
        let selected_db = SelectedDb::new(options.database);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            host,
            port,
            options,
            selected_db: selected_db.clone(),
            conn: None,
        };
        tokio::spawn(worker.run(command_rx));

        Self {
            command_tx,
            address,
            selected_db,
        }
    }

    /// Queue a command and wait for its reply
    ///
    /// Error replies come back as [`RedisError::Command`] or a redirect.
    pub async fn execute(&self, parts: Vec<Bytes>) -> RedisResult<RespValue> {
        if parts.is_empty() {
            return Err(RedisError::InvalidCommand("empty command".to_string()));
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(CommandRequest { parts, response_tx })
            .map_err(|_| {
                RedisError::Connection(format!("Transport to {} is shut down", self.address))
            })?;

        response_rx.await.map_err(|_| {
            RedisError::Connection(format!("Transport to {} dropped the request", self.address))
        })?
    }

    /// `host:port` of the server
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Logical database the connection is on
    pub fn selected_db(&self) -> Option<u32> {
        self.selected_db.get()
    }
}

struct Worker {
    host: String,
    port: u16,
    options: ConnectOptions,
    selected_db: SelectedDb,
    conn: Option<RedisConnection>,
}

impl Worker {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<CommandRequest>) {
        while let Some(req) = command_rx.recv().await {
            let result = self.dispatch(&req.parts).await;
            // the caller may have stopped waiting
            let _ = req.response_tx.send(result);
        }
        debug!("Transport to {}:{} stopped", self.host, self.port);
    }

    async fn dispatch(&mut self, parts: &[Bytes]) -> RedisResult<RespValue> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                self.options.database = self.selected_db.get();
                RedisConnection::connect(&self.host, self.port, &self.options).await?
            }
        };

        let result = conn.execute(parts).await;
        match result {
            Err(e) if e.is_connection_error() || matches!(e, RedisError::Parse(_)) => {
                warn!(
                    "Dropping connection to {} after error: {}",
                    conn.address(),
                    e
                );
                Err(e)
            }
            Ok(reply) => {
                // a queued SELECT inside MULTI answers +QUEUED and may never run
                if let Some(db) = select_target(parts).filter(|_| is_ok(&reply)) {
                    self.selected_db.set(db);
                }
                self.conn = Some(conn);
                Ok(reply)
            }
            Err(e) => {
                self.conn = Some(conn);
                Err(e)
            }
        }
    }
}

fn is_ok(reply: &RespValue) -> bool {
    matches!(reply, RespValue::SimpleString(s) if s == "OK")
}

/// Index argument of a `SELECT` command
fn select_target(parts: &[Bytes]) -> Option<u32> {
    match parts {
        [name, index] if name.eq_ignore_ascii_case(b"select") => {
            std::str::from_utf8(index).ok()?.parse().ok()
        }
        _ => None,
    }
}
