//! Background reconnect probes for offline endpoints
//!
//! One task runs per offline endpoint. It tries a bare TCP connect on every
//! tick of the recheck interval and, once one succeeds, waits the settle
//! delay before returning the endpoint to rotation.

use std::future::Future;
use std::sync::Weak;

use tokio::net::TcpStream;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, trace};

use crate::config::HealthConfig;
use crate::endpoint::Endpoint;

/// Spawns and drives endpoint probes
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Attempt one connection to `address`, bounded by the probe timeout
    pub async fn check(&self, address: &str) -> bool {
        match timeout(self.config.probe_timeout, TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!(endpoint = address, error = %e, "probe connect failed");
                false
            }
            Err(_) => {
                trace!(endpoint = address, "probe connect timed out");
                false
            }
        }
    }

    /// Probe task for `endpoint`
    ///
    /// The task ends when the endpoint recovers or is dropped.
    pub(crate) fn probe(&self, endpoint: Weak<Endpoint>) -> impl Future<Output = ()> + Send + 'static {
        let monitor = self.clone();
        async move { monitor.run(endpoint).await }
    }

    async fn run(self, endpoint: Weak<Endpoint>) {
        // First tick fires immediately
        let mut ticker = interval(self.config.recheck_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(address) = endpoint.upgrade().map(|e| e.address().to_string()) else {
                return;
            };
            if !self.check(&address).await {
                continue;
            }

            debug!(endpoint = %address, settle = ?self.config.settle_delay, "endpoint reachable, settling");
            sleep(self.config.settle_delay).await;
            if let Some(endpoint) = endpoint.upgrade() {
                endpoint.finish_probe();
            }
            return;
        }
    }
}
