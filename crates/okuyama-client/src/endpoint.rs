//! Master node registry with round-robin selection and offline tracking
//!
//! Endpoints are parsed once from the configured `host:port` list and live
//! as long as the registry. An endpoint that fails to accept a connection is
//! marked offline and skipped by [`EndpointRegistry::next_endpoint`] until
//! its health probe sees it accept connections again.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::error::ConfigError;
use crate::health::HealthMonitor;

/// One master node
pub struct Endpoint {
    index: usize,
    host: String,
    port: u16,
    address: String,
    offline: AtomicBool,
    last_tried: AtomicU64,
    /// Guards the offline transition; holds the running probe, if any
    probe: Mutex<Option<AbortHandle>>,
}

impl Endpoint {
    fn parse(index: usize, address: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            endpoint: address.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = address
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        if !host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
        {
            return Err(invalid("host may only contain letters, digits, '.' and '-'"));
        }
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("port is not a number"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| invalid("port must be between 0 and 65535"))?;

        Ok(Self {
            index,
            host: host.to_string(),
            port,
            address: format!("{host}:{port}"),
            offline: AtomicBool::new(false),
            last_tried: AtomicU64::new(0),
            probe: Mutex::new(None),
        })
    }

    /// Position in the configured list
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, used for connecting and in logs
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// Called by the probe task once the endpoint accepts connections again
    ///
    /// Only the task whose handle is stored may clear the flag; a probe that
    /// was superseded by a later offline transition leaves it alone.
    pub(crate) fn finish_probe(&self) {
        let mut probe = self.probe.lock();
        if probe.as_ref().map(AbortHandle::id) != tokio::task::try_id() {
            debug!(endpoint = %self.address, "stale probe finished, ignoring");
            return;
        }
        // The task is ending on its own; drop the handle without aborting
        probe.take();
        if self.offline.swap(false, Ordering::AcqRel) {
            info!(endpoint = %self.address, "endpoint back online");
        }
    }

    fn abort_probe(&self) {
        if let Some(handle) = self.probe.lock().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("offline", &self.is_offline())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Ordered set of endpoints with a shared rotation cursor
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
    cursor: AtomicUsize,
    /// Logical clock for least-recently-tried selection
    ticks: AtomicU64,
    monitor: HealthMonitor,
}

impl EndpointRegistry {
    /// Parse `addresses` and set up health probing
    pub fn new<S: AsRef<str>>(addresses: &[S], health: HealthConfig) -> Result<Self, ConfigError> {
        if addresses.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if health.recheck_interval.is_zero() {
            return Err(ConfigError::InvalidSetting {
                name: "health.recheck_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        let endpoints = addresses
            .iter()
            .enumerate()
            .map(|(index, address)| Endpoint::parse(index, address.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = endpoints.len(), "endpoint registry created");
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            ticks: AtomicU64::new(0),
            monitor: HealthMonitor::new(health),
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn online_count(&self) -> usize {
        self.endpoints.iter().filter(|e| !e.is_offline()).count()
    }

    /// Next endpoint in rotation that is not offline
    ///
    /// Falls back to the least recently tried endpoint when all are offline.
    pub fn next_endpoint(&self) -> Arc<Endpoint> {
        let count = self.endpoints.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        let chosen = (0..count)
            .map(|offset| (offset, &self.endpoints[(start + offset) % count]))
            .find(|(_, endpoint)| !endpoint.is_offline())
            .map(|(offset, endpoint)| {
                if offset > 0 {
                    // Continue the rotation after the endpoint handed out
                    self.cursor.fetch_add(offset, Ordering::Relaxed);
                }
                endpoint
            });

        let endpoint = match chosen {
            Some(endpoint) => endpoint,
            None => {
                let fallback = self
                    .endpoints
                    .iter()
                    .min_by_key(|e| e.last_tried.load(Ordering::Relaxed))
                    .unwrap_or(&self.endpoints[start % count]);
                warn!(endpoint = %fallback, "all endpoints offline, trying least recently used");
                fallback
            }
        };

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        endpoint.last_tried.store(tick, Ordering::Relaxed);
        Arc::clone(endpoint)
    }

    /// Flag `endpoint` offline and start its health probe
    ///
    /// Returns `true` on the online to offline transition. Repeated calls
    /// are no-ops. Without a tokio runtime no probe can run, so the
    /// transition is refused.
    pub fn mark_offline(&self, endpoint: &Arc<Endpoint>) -> bool {
        let mut probe = endpoint.probe.lock();
        if endpoint.is_offline() {
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(endpoint = %endpoint, "no async runtime to probe endpoint, leaving it online");
            return false;
        };

        let task = runtime.spawn(self.monitor.probe(Arc::downgrade(endpoint)));
        *probe = Some(task.abort_handle());
        endpoint.offline.store(true, Ordering::Release);
        warn!(endpoint = %endpoint, "endpoint marked offline");
        true
    }

    /// Clear the offline flag and stop any probe
    pub fn mark_online(&self, endpoint: &Endpoint) {
        let mut probe = endpoint.probe.lock();
        if let Some(handle) = probe.take() {
            handle.abort();
        }
        if endpoint.offline.swap(false, Ordering::AcqRel) {
            info!(endpoint = %endpoint, "endpoint marked online");
        }
    }
}

impl Drop for EndpointRegistry {
    fn drop(&mut self) {
        for endpoint in &self.endpoints {
            endpoint.abort_probe();
        }
    }
}
