//! # okuyama-client
//!
//! Async client for the okuyama distributed key-value store.
//!
//! The client keeps a pool of TCP connections to the configured master
//! nodes, rotates across them, takes a node out of rotation when it stops
//! accepting connections and probes it in the background until it comes
//! back.
//!
//! ```no_run
//! use okuyama_client::{ClientConfig, OkuyamaClient, StoreOptions, Value};
//!
//! # async fn example() -> okuyama_client::Result<()> {
//! let client = OkuyamaClient::new(ClientConfig::new(["127.0.0.1:8888"]))?;
//!
//! client
//!     .set("greeting", Value::text("hello"), &StoreOptions::new().tag("demo"))
//!     .await?;
//! assert_eq!(client.get("greeting").await?, Some(Value::text("hello")));
//!
//! // Optimistic concurrency
//! if let Some(current) = client.get_versioned("greeting").await? {
//!     client
//!         .set_versioned("greeting", Value::text("hi"), current.version(), &StoreOptions::new())
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Transport failures are retried once on a fresh connection. Writes that
//! cannot safely be repeated (`add`, `set_versioned`) are only retried when
//! the request never left the client; see [`RetryMode`].

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod pool;
pub mod retry;

pub use client::{ClientBuilder, OkuyamaClient, StoreOptions};
pub use config::{ClientConfig, CompressionConfig, EncodingConfig, HealthConfig, PoolConfig};
pub use endpoint::{Endpoint, EndpointRegistry};
pub use error::{ConfigError, Error, ErrorKind, FailureKind, Result, Stage};
pub use health::HealthMonitor;
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use retry::{RetryMode, retry_once};

pub use okuyama_compression::{CompressionStrategy, CompressorId, CompressorRegistry};
pub use okuyama_protocol::{ObjectCodec, Pair, StreamTap, TapFormat, TracingTap, Value, VersionedValue};
