//! Scripted RESP server for tests that must not depend on a live Redis
//!
//! Each server answers commands through a handler closure and records every
//! command it receives along with how many connections were accepted.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use keyscope::protocol::RespDecoder;
use keyscope::RespValue;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the server does with one command
pub enum Reply {
    /// Write raw RESP bytes
    Raw(String),
    /// Wait, then write raw RESP bytes
    Delayed(Duration, String),
    /// Close the connection without replying
    Close,
}

type Handler = Arc<dyn Fn(&[String]) -> Reply + Send + Sync>;

pub struct FakeServer {
    pub port: u16,
    log: Arc<Mutex<Vec<Vec<String>>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    /// Bind first so handlers can refer to the port
    pub async fn bind() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        let (listener, _) = Self::bind().await;
        Self::serve(listener, handler)
    }

    pub fn serve<F>(listener: TcpListener, handler: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        let port = listener.local_addr().unwrap().port();
        let handler: Handler = Arc::new(handler);
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (task_log, task_connections) = (Arc::clone(&log), Arc::clone(&connections));
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                task_connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle(socket, Arc::clone(&handler), Arc::clone(&task_log)));
            }
        });

        Self {
            port,
            log,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port)
    }

    /// Every command received so far, in arrival order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().clone()
    }

    /// Received commands with the given name
    pub fn commands_named(&self, name: &str) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .filter(|c| c.first().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn handle(mut socket: TcpStream, handler: Handler, log: Arc<Mutex<Vec<Vec<String>>>>) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        loop {
            let (value, consumed) = {
                let mut cursor = Cursor::new(&buf[..]);
                match RespDecoder::decode(&mut cursor) {
                    Ok(Some(value)) => (value, cursor.position() as usize),
                    Ok(None) => break,
                    Err(_) => return,
                }
            };
            buf.advance(consumed);

            let parts = to_strings(value);
            log.lock().unwrap().push(parts.clone());
            let reply = handler(&parts);
            let written = match reply {
                Reply::Raw(raw) => socket.write_all(raw.as_bytes()).await,
                Reply::Delayed(delay, raw) => {
                    tokio::time::sleep(delay).await;
                    socket.write_all(raw.as_bytes()).await
                }
                Reply::Close => return,
            };
            if written.is_err() {
                return;
            }
        }

        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn to_strings(value: RespValue) -> Vec<String> {
    match value {
        RespValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(b) => String::from_utf8_lossy(&b).into_owned(),
                other => format!("{:?}", other),
            })
            .collect(),
        other => vec![format!("{:?}", other)],
    }
}

/// Replies a plain Redis gives to connection housekeeping
pub fn standard(cmd: &[String]) -> Reply {
    let name = cmd.first().map(|n| n.to_ascii_uppercase()).unwrap_or_default();
    match name.as_str() {
        "PING" => simple("PONG"),
        "SELECT" | "AUTH" => simple("OK"),
        "ECHO" => bulk(cmd.get(1).map_or("", String::as_str)),
        "CLUSTER" => error("ERR This instance has cluster support disabled"),
        _ => error(&format!("ERR unknown command '{}'", name)),
    }
}

pub fn simple(s: &str) -> Reply {
    Reply::Raw(format!("+{}\r\n", s))
}

pub fn error(s: &str) -> Reply {
    Reply::Raw(format!("-{}\r\n", s))
}

pub fn int(n: i64) -> Reply {
    Reply::Raw(format!(":{}\r\n", n))
}

pub fn bulk(s: &str) -> Reply {
    Reply::Raw(bulk_raw(s))
}

pub fn bulk_raw(s: &str) -> String {
    format!("${}\r\n{}\r\n", s.len(), s)
}

pub fn array_raw(items: &[String]) -> String {
    let mut out = format!("*{}\r\n", items.len());
    for item in items {
        out.push_str(item);
    }
    out
}

pub fn int_raw(n: i64) -> String {
    format!(":{}\r\n", n)
}

/// `CLUSTER SLOTS` reply for `(start, end, port)` ranges on 127.0.0.1
pub fn cluster_slots(ranges: &[(u16, u16, u16)]) -> Reply {
    let entries: Vec<String> = ranges
        .iter()
        .map(|(start, end, port)| {
            let master = array_raw(&[
                bulk_raw("127.0.0.1"),
                int_raw(i64::from(*port)),
                bulk_raw(&format!("node-{}", port)),
            ]);
            array_raw(&[int_raw(i64::from(*start)), int_raw(i64::from(*end)), master])
        })
        .collect();
    Reply::Raw(array_raw(&entries))
}

/// `SENTINEL MASTER` reply naming 127.0.0.1:`port`
pub fn sentinel_master(name: &str, port: u16, flags: &str) -> Reply {
    let fields = [
        ("name", name.to_string()),
        ("ip", "127.0.0.1".to_string()),
        ("port", port.to_string()),
        ("flags", flags.to_string()),
        ("num-slaves", "0".to_string()),
        ("quorum", "1".to_string()),
    ];
    let items: Vec<String> = fields
        .iter()
        .flat_map(|(k, v)| [bulk_raw(k), bulk_raw(v)])
        .collect();
    Reply::Raw(array_raw(&items))
}

/// Port with nothing listening on it
pub async fn closed_port() -> u16 {
    let (listener, port) = FakeServer::bind().await;
    drop(listener);
    port
}
