//! Client configuration

use std::time::Duration;

use okuyama_compression::{CompressorId, DEFAULT_MIN_LENGTH};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Master node addresses as `host:port`
    pub endpoints: Vec<String>,

    pub pool: PoolConfig,
    pub health: HealthConfig,
    pub encoding: EncodingConfig,
    pub compression: CompressionConfig,

    /// Mirror wire bytes to the `okuyama::wire` trace target
    pub dump_stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections kept for reuse; also the live-count watermark
    pub max_pool_size: usize,
    pub connect_timeout: Duration,
    /// Bound on every read and write of an established connection
    pub read_timeout: Duration,
    /// Age after which a connection is closed instead of reused
    pub connection_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 10,
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            connection_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between reconnect probes of an offline endpoint
    pub recheck_interval: Duration,
    /// Pause after a successful probe before the endpoint is trusted again
    pub settle_delay: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_secs(5),
            settle_delay: Duration::from_millis(3000),
            probe_timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Send keys and tags as Base64 rather than raw text
    pub base64_keys: bool,
    /// Store text values through the object codec
    pub serialize_strings: bool,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            base64_keys: true,
            serialize_strings: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Values strictly longer than this are compressed
    pub min_length: usize,
    pub compressor: CompressorId,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: DEFAULT_MIN_LENGTH,
            compressor: CompressorId::DEFLATE,
        }
    }
}

impl ClientConfig {
    /// Configuration for the given endpoints with every other setting at its
    /// default
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Create configuration from `OKUYAMA_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pool = PoolConfig::default();
        let health = HealthConfig::default();
        let encoding = EncodingConfig::default();
        let compression = CompressionConfig::default();

        let parsed = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());
        let flag = |name: &str, default: bool| {
            lookup(name)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            endpoints: lookup("OKUYAMA_ENDPOINTS")
                .map(|s| split_endpoints(&s))
                .unwrap_or_default(),
            pool: PoolConfig {
                max_pool_size: lookup("OKUYAMA_POOL_SIZE")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(pool.max_pool_size),
                connect_timeout: parsed("OKUYAMA_CONNECT_TIMEOUT_MS")
                    .map_or(pool.connect_timeout, Duration::from_millis),
                read_timeout: parsed("OKUYAMA_READ_TIMEOUT_MS")
                    .map_or(pool.read_timeout, Duration::from_millis),
                connection_ttl: parsed("OKUYAMA_CONNECTION_TTL_SECS")
                    .map_or(pool.connection_ttl, Duration::from_secs),
            },
            health: HealthConfig {
                recheck_interval: parsed("OKUYAMA_RECHECK_INTERVAL_MS")
                    .map_or(health.recheck_interval, Duration::from_millis),
                settle_delay: parsed("OKUYAMA_SETTLE_DELAY_MS")
                    .map_or(health.settle_delay, Duration::from_millis),
                probe_timeout: parsed("OKUYAMA_PROBE_TIMEOUT_MS")
                    .map_or(health.probe_timeout, Duration::from_millis),
            },
            encoding: EncodingConfig {
                base64_keys: flag("OKUYAMA_BASE64_KEYS", encoding.base64_keys),
                serialize_strings: flag("OKUYAMA_SERIALIZE_STRINGS", encoding.serialize_strings),
            },
            compression: CompressionConfig {
                enabled: flag("OKUYAMA_COMPRESSION", compression.enabled),
                min_length: lookup("OKUYAMA_COMPRESSION_MIN_LENGTH")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(compression.min_length),
                compressor: lookup("OKUYAMA_COMPRESSOR")
                    .and_then(|s| s.trim().parse::<u8>().ok())
                    .and_then(CompressorId::new)
                    .unwrap_or(compression.compressor),
            },
            dump_stream: flag("OKUYAMA_DUMP_STREAM", false),
        }
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if self.pool.max_pool_size == 0 {
            return Err(invalid("pool.max_pool_size", "must be at least 1"));
        }
        for (name, value) in [
            ("pool.connect_timeout", self.pool.connect_timeout),
            ("pool.read_timeout", self.pool.read_timeout),
            ("health.recheck_interval", self.health.recheck_interval),
            ("health.probe_timeout", self.health.probe_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(name, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}

/// Split a comma-separated endpoint list, dropping blanks
pub fn split_endpoints(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
