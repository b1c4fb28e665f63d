//! Pool of TCP connections to the master nodes
//!
//! Connections are opened on demand against the endpoint registry and kept
//! idle for reuse up to `max_pool_size`. Callers never wait on the pool:
//! when nothing idle is usable a new connection is opened.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use okuyama_protocol::{ReadBuffer, Request, ResponseReader, StreamTap, TapContext, write_request};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::{Error, Result, Stage};

/// Keeps the live-connection counter exact however a connection ends
#[must_use = "LiveGuard must be held for as long as the connection is open"]
struct LiveGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Outcome of the pre-use check of an idle connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Ready,
    Expired,
    PeerClosed,
    /// Unread bytes or a socket error; the stream is out of sync
    Unusable,
}

/// An open connection with its own read buffer
pub struct PooledConnection {
    stream: TcpStream,
    buffer: ReadBuffer,
    endpoint: Arc<Endpoint>,
    serial: u64,
    created_at: Instant,
    expires_at: Instant,
    io_timeout: Duration,
    tap: Option<Arc<dyn StreamTap>>,
    _live: LiveGuard,
}

impl PooledConnection {
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Order in which this connection was opened by its pool
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Write `request` and return a reader for its response
    ///
    /// Write failures are attributed to [`Stage::Request`]; failures while
    /// reading through the returned reader belong to the response.
    pub async fn send(&mut self, request: &Request) -> Result<ResponseReader<'_, TcpStream>> {
        let tap = self
            .tap
            .as_deref()
            .map(|tap| TapContext::new(tap, self.endpoint.address()));

        trace!(endpoint = %self.endpoint, opcode = %request.opcode(), "sending request");
        write_request(&mut self.stream, request, Some(self.io_timeout), tap)
            .await
            .map_err(|e| Error::from_protocol(e, Stage::Request))?;

        Ok(ResponseReader::new(&mut self.stream, &mut self.buffer)
            .with_read_timeout(self.io_timeout)
            .with_tap(tap))
    }

    fn check(&self) -> Liveness {
        if self.is_expired() {
            return Liveness::Expired;
        }
        if !self.buffer.is_empty() {
            return Liveness::Unusable;
        }
        // Nothing should be readable on an idle connection
        let mut probe = [0u8; 1];
        match self.stream.try_read(&mut probe) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Liveness::Ready,
            Ok(0) => Liveness::PeerClosed,
            Ok(_) => Liveness::Unusable,
            Err(e) if is_peer_shutdown(&e) => Liveness::PeerClosed,
            Err(_) => Liveness::Unusable,
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.endpoint.address())
            .field("serial", &self.serial)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}

fn is_peer_shutdown(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections, idle or in use
    pub live: usize,
    /// Highest `live` seen
    pub peak: usize,
    pub idle: usize,
}

#[derive(Debug)]
pub struct ConnectionPool {
    registry: Arc<EndpointRegistry>,
    config: PoolConfig,
    idle: Mutex<VecDeque<PooledConnection>>,
    tap: Option<Arc<dyn StreamTap>>,
    live: Arc<AtomicUsize>,
    peak: AtomicUsize,
    serial: AtomicU64,
    /// Serial of the newest connection opened while `live` was within
    /// capacity; anything newer is overflow and is not pooled
    latest_pooled: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        config: PoolConfig,
        tap: Option<Arc<dyn StreamTap>>,
    ) -> Self {
        Self {
            registry,
            idle: Mutex::new(VecDeque::with_capacity(config.max_pool_size)),
            config,
            tap,
            live: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            serial: AtomicU64::new(0),
            latest_pooled: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Take an idle connection or open a new one
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let candidate = self.idle.lock().pop_front();
        if let Some(conn) = candidate {
            match conn.check() {
                Liveness::Ready => {
                    trace!(endpoint = %conn.endpoint, serial = conn.serial, "reusing pooled connection");
                    return Ok(conn);
                }
                Liveness::PeerClosed => {
                    debug!(endpoint = %conn.endpoint, serial = conn.serial, "pooled connection closed by peer");
                    self.registry.mark_offline(&conn.endpoint);
                }
                state => {
                    debug!(endpoint = %conn.endpoint, serial = conn.serial, ?state, "discarding pooled connection");
                }
            }
        }
        self.open().await
    }

    /// Connect to the next reachable endpoint
    ///
    /// Each failed endpoint is marked offline. Gives up after trying every
    /// endpoint once or on coming back around to the first one that failed.
    async fn open(&self) -> Result<PooledConnection> {
        let limit = self.registry.len();
        let mut first_failed: Option<Arc<Endpoint>> = None;
        let mut attempts = 0;
        let mut last_error = String::from("no endpoint attempted");

        while attempts < limit {
            let endpoint = self.registry.next_endpoint();
            if first_failed
                .as_ref()
                .is_some_and(|failed| Arc::ptr_eq(failed, &endpoint))
            {
                break;
            }
            attempts += 1;

            match timeout(self.config.connect_timeout, TcpStream::connect(endpoint.address())).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(endpoint = %endpoint, error = %e, "failed to set TCP_NODELAY");
                    }
                    if endpoint.is_offline() {
                        self.registry.mark_online(&endpoint);
                    }
                    return Ok(self.register(stream, endpoint));
                }
                Ok(Err(e)) => last_error = format!("{endpoint}: {e}"),
                Err(_) => {
                    last_error = format!(
                        "{endpoint}: connect timed out after {:?}",
                        self.config.connect_timeout
                    );
                }
            }

            warn!(endpoint = %endpoint, error = %last_error, "connect failed");
            self.registry.mark_offline(&endpoint);
            first_failed.get_or_insert(endpoint);
        }

        Err(Error::NoAvailableEndpoint {
            attempts,
            last_error,
        })
    }

    fn register(&self, stream: TcpStream, endpoint: Arc<Endpoint>) -> PooledConnection {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(live, Ordering::Relaxed);
        if live <= self.config.max_pool_size {
            self.latest_pooled.fetch_max(serial, Ordering::Relaxed);
        }
        debug!(endpoint = %endpoint, serial, live, "opened connection");

        let created_at = Instant::now();
        PooledConnection {
            stream,
            buffer: ReadBuffer::new(),
            endpoint,
            serial,
            created_at,
            expires_at: created_at + self.config.connection_ttl,
            io_timeout: self.config.read_timeout,
            tap: self.tap.clone(),
            _live: LiveGuard {
                live: Arc::clone(&self.live),
            },
        }
    }

    /// Return a connection after a successful exchange
    ///
    /// Expired, out-of-sync and overflow connections are closed, as is
    /// anything arriving when the idle queue is already full.
    pub fn recycle(&self, conn: PooledConnection) {
        if conn.serial > self.latest_pooled.load(Ordering::Relaxed) {
            debug!(endpoint = %conn.endpoint, serial = conn.serial, "closing overflow connection");
            return;
        }
        if conn.is_expired() {
            debug!(endpoint = %conn.endpoint, serial = conn.serial, "closing expired connection");
            return;
        }
        if !conn.buffer.is_empty() {
            warn!(
                endpoint = %conn.endpoint,
                unread = conn.buffer.remaining(),
                "closing connection with unread response bytes"
            );
            return;
        }

        let rejected = {
            let mut idle = self.idle.lock();
            if idle.len() < self.config.max_pool_size {
                idle.push_back(conn);
                None
            } else {
                Some(conn)
            }
        };
        if let Some(conn) = rejected {
            debug!(endpoint = %conn.endpoint, serial = conn.serial, "idle queue full, closing connection");
        }
    }

    /// Close a connection whose stream state is unknown
    pub fn destroy(&self, conn: PooledConnection) {
        debug!(endpoint = %conn.endpoint, serial = conn.serial, "destroying connection");
        drop(conn);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.live.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
        }
    }
}
