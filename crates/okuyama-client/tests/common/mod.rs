//! In-process okuyama master node for integration tests
//!
//! Speaks the line protocol for the opcodes the client uses and stores
//! fields exactly as received, so tests can inspect what went over the
//! wire. Faults can be queued to misbehave on upcoming requests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const MAX_VALUE_SIZE: usize = 2_560_000;
pub const SERVER_VERSION: &str = "VERSION okuyama-0.9.6";

/// Misbehaviour applied to the next request
#[derive(Debug, Clone)]
pub enum Fault {
    /// Close the connection without replying
    Drop,
    /// Never reply, keeping the connection open
    Stall,
    /// Send this line instead of the real reply
    Reply(String),
}

#[derive(Debug, Clone)]
struct Entry {
    /// Value field exactly as sent
    value: String,
    version: u64,
    /// Tag fields as sent
    tags: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by key field as sent; ordered for deterministic scans
    store: Mutex<BTreeMap<String, Entry>>,
    faults: Mutex<VecDeque<Fault>>,
    requests: Mutex<Vec<String>>,
    accepted: AtomicUsize,
    next_version: AtomicUsize,
}

pub struct MockServer {
    address: String,
    state: Arc<State>,
    shutdown: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0").await
    }

    pub async fn start_on(address: &str) -> Self {
        let listener = TcpListener::bind(address).await.expect("bind mock server");
        let address = listener.local_addr().expect("local addr").to_string();
        let state = Arc::new(State::default());
        let (shutdown, _) = watch::channel(false);

        let acceptor = {
            let state = Arc::clone(&state);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    state.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, Arc::clone(&state), shutdown.subscribe()));
                }
            })
        };

        Self {
            address,
            state,
            shutdown,
            acceptor,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Request lines received so far, without the newline
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    pub fn inject(&self, fault: Fault) {
        self.state.faults.lock().push_back(fault);
    }

    /// Value field stored under a key field
    pub fn stored_field(&self, key_field: &str) -> Option<String> {
        self.state
            .store
            .lock()
            .get(key_field)
            .map(|e| e.value.clone())
    }

    /// Store a value field directly, as another client would have
    pub fn insert_field(&self, key_field: &str, value_field: &str) {
        let version = self.state.next_version.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.state.store.lock().insert(
            key_field.to_string(),
            Entry {
                value: value_field.to_string(),
                version,
                tags: Vec::new(),
            },
        );
    }

    /// Close every open connection but keep accepting new ones
    pub async fn close_connections(&self) {
        self.shutdown.send_replace(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.shutdown.send_replace(false);
    }

    /// Stop listening and close every connection
    pub async fn stop(self) {
        self.acceptor.abort();
        let _ = self.acceptor.await;
        self.shutdown.send_replace(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve(stream: TcpStream, state: Arc<State>, mut shutdown: watch::Receiver<bool>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            read = lines.read_line(&mut line) => read,
            _ = shutdown.wait_for(|closed| *closed) => return,
        };
        match read {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let request = line.trim_end_matches('\n').to_string();
        state.requests.lock().push(request.clone());

        let fault = state.faults.lock().pop_front();
        let reply = match fault {
            Some(Fault::Drop) => return,
            Some(Fault::Stall) => {
                let _ = shutdown.wait_for(|closed| *closed).await;
                return;
            }
            Some(Fault::Reply(reply)) => reply,
            None => handle(&state, &request),
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn handle(state: &State, request: &str) -> String {
    let fields: Vec<&str> = request.split(',').collect();
    let field = |i: usize| fields.get(i).copied().unwrap_or("");
    let mut store = state.store.lock();

    match field(0) {
        "0" => format!("0,true,{MAX_VALUE_SIZE}\n"),
        "999" => format!("999,{SERVER_VERSION}\n"),
        op @ ("1" | "6") => {
            let (key, tags, value) = (field(1), field(2), field(4));
            if value.len() > MAX_VALUE_SIZE {
                return format!("{op},false,NG:Max Data Size Over\n");
            }
            if op == "6" && store.contains_key(key) {
                return "6,false,NG:Data has already created\n".to_string();
            }
            let version = state.next_version.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            store.insert(key.to_string(), entry(value, version, tags));
            format!("{op},true,OK\n")
        }
        "2" => match store.get(field(1)) {
            Some(e) => format!("2,true,{}\n", e.value),
            None => "2,false,\n".to_string(),
        },
        "3" => {
            let keys: Vec<&str> = store
                .iter()
                .filter(|(_, e)| e.tags.iter().any(|t| t == field(1)))
                .map(|(k, _)| k.as_str())
                .collect();
            if keys.is_empty() {
                "4,false,\n".to_string()
            } else {
                format!("4,true,{}\n", keys.join(":"))
            }
        }
        "5" => match store.remove(field(1)) {
            Some(e) => format!("5,true,{}\n", e.value),
            None => "5,false,\n".to_string(),
        },
        "15" => match store.get(field(1)) {
            Some(e) => format!("15,true,{},{}\n", e.value, e.version),
            None => "15,false,\n".to_string(),
        },
        "16" => {
            let (key, tags, value, expected) = (field(1), field(2), field(4), field(5));
            match store.get(key) {
                Some(e) if e.version.to_string() == expected => {
                    let version = state.next_version.fetch_add(1, Ordering::SeqCst) as u64 + 1;
                    store.insert(key.to_string(), entry(value, version, tags));
                    "16,true,OK\n".to_string()
                }
                _ => "16,false,NG:Data has already been updated\n".to_string(),
            }
        }
        "22" => {
            let mut reply = String::new();
            for key in &fields[1..] {
                match store.get(*key) {
                    Some(e) => reply.push_str(&format!("22,true,{}\n", e.value)),
                    None => reply.push_str("22,false,\n"),
                }
            }
            reply.push_str("END\n");
            reply
        }
        "23" => {
            let mut reply = String::new();
            for (key, e) in store.iter() {
                if e.tags.iter().any(|t| t == field(1)) {
                    reply.push_str(&format!("23,true,{key},{}\n", e.value));
                }
            }
            reply.push_str("END\n");
            reply
        }
        op => format!("{op},false,NG:unsupported\n"),
    }
}

fn entry(value: &str, version: u64, tags: &str) -> Entry {
    Entry {
        value: value.to_string(),
        version,
        tags: if tags == "(B)" {
            Vec::new()
        } else {
            tags.split(':').map(str::to_string).collect()
        },
    }
}

/// Client configuration for the given servers with short timeouts
pub fn config_for(addresses: &[&str]) -> okuyama_client::ClientConfig {
    let mut config = okuyama_client::ClientConfig::new(addresses.iter().copied());
    config.pool.connect_timeout = Duration::from_millis(500);
    config.pool.read_timeout = Duration::from_millis(500);
    config.health.recheck_interval = Duration::from_millis(50);
    config.health.settle_delay = Duration::from_millis(20);
    config.health.probe_timeout = Duration::from_millis(200);
    config
}

/// Address nothing listens on
pub async fn refused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").to_string()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
