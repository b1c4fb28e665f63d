//! Public client operations
//!
//! Every operation has the same shape: validate arguments, encode the
//! request once, then run one exchange through [`retry_once`]. An exchange
//! acquires a connection, sends, decodes the full response line and either
//! recycles the connection (success) or destroys it (any error).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use okuyama_compression::{
    CompressionStrategy, CompressorRegistry, NoCompression, ThresholdStrategy,
};
use okuyama_protocol::{
    FieldEncoding, JsonObjectCodec, ObjectCodec, Opcode, Pair, PayloadCodec, Request, Status,
    StreamTap, TracingTap, Value, VersionedValue, wire,
};
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::endpoint::EndpointRegistry;
use crate::error::{
    ALREADY_EXISTS_PREFIX, ConfigError, Error, FailureKind, Result, VERSION_CONFLICT_MESSAGE,
};
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::retry::{RetryMode, retry_once};

/// Prefix of the master node's version reply
const VERSION_PREFIX: &str = "VERSION ";
const PRODUCT_PREFIX: &str = "okuyama-";

/// Tags and expiry attached to a write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub tags: Vec<String>,
    /// Seconds until the server expires the entry; 0 keeps it forever
    pub expire_secs: u64,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_secs = ttl.as_secs();
        self
    }
}

/// Assembles an [`OkuyamaClient`] from configuration plus optional
/// collaborators
pub struct ClientBuilder {
    config: ClientConfig,
    strategy: Option<Arc<dyn CompressionStrategy>>,
    objects: Option<Arc<dyn ObjectCodec>>,
    compressors: Option<CompressorRegistry>,
    tap: Option<Arc<dyn StreamTap>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            strategy: None,
            objects: None,
            compressors: None,
            tap: None,
        }
    }

    /// Replace the threshold strategy derived from the compression config
    #[must_use]
    pub fn compression_strategy(mut self, strategy: Arc<dyn CompressionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn object_codec(mut self, codec: Arc<dyn ObjectCodec>) -> Self {
        self.objects = Some(codec);
        self
    }

    #[must_use]
    pub fn compressors(mut self, registry: CompressorRegistry) -> Self {
        self.compressors = Some(registry);
        self
    }

    /// Mirror wire traffic to `tap`; overrides `dump_stream`
    #[must_use]
    pub fn tap(mut self, tap: Arc<dyn StreamTap>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn build(self) -> Result<OkuyamaClient> {
        let config = self.config;
        config.validate()?;

        let compressors = self.compressors.unwrap_or_default();
        let strategy: Arc<dyn CompressionStrategy> = match self.strategy {
            Some(strategy) => strategy,
            None if config.compression.enabled => {
                let id = config.compression.compressor;
                if compressors.get(id).is_none() {
                    return Err(ConfigError::InvalidSetting {
                        name: "compression.compressor",
                        reason: format!("no compressor registered with id {id}"),
                    }
                    .into());
                }
                Arc::new(ThresholdStrategy::new(config.compression.min_length, id))
            }
            None => Arc::new(NoCompression),
        };
        let objects: Arc<dyn ObjectCodec> = match self.objects {
            Some(codec) => codec,
            None => Arc::new(JsonObjectCodec),
        };
        let payload = PayloadCodec::new(Arc::new(compressors), strategy, objects)
            .with_serialized_strings(config.encoding.serialize_strings);

        let tap = self.tap.or_else(|| {
            config
                .dump_stream
                .then(|| Arc::new(TracingTap::default()) as Arc<dyn StreamTap>)
        });

        let registry = EndpointRegistry::new(&config.endpoints, config.health.clone())?;
        let pool = ConnectionPool::new(Arc::new(registry), config.pool.clone(), tap);

        debug!(
            endpoints = config.endpoints.len(),
            pool_size = config.pool.max_pool_size,
            base64_keys = config.encoding.base64_keys,
            "okuyama client created"
        );

        Ok(OkuyamaClient {
            inner: Arc::new(Inner {
                pool,
                payload,
                key_encoding: if config.encoding.base64_keys {
                    FieldEncoding::Base64
                } else {
                    FieldEncoding::Raw
                },
                max_value_size: AtomicU64::new(0),
            }),
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .field("objects", &self.objects)
            .field("tap", &self.tap)
            .finish_non_exhaustive()
    }
}

struct Inner {
    pool: ConnectionPool,
    payload: PayloadCodec,
    key_encoding: FieldEncoding,
    /// Server value limit from `init_client`; 0 until known
    max_value_size: AtomicU64,
}

/// Async client for an okuyama cluster
///
/// Cloning is cheap; clones share the connection pool and endpoint state.
#[derive(Clone)]
pub struct OkuyamaClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for OkuyamaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OkuyamaClient")
            .field("pool", &self.inner.pool)
            .field("key_encoding", &self.inner.key_encoding)
            .field("max_value_size", &self.max_value_size())
            .finish_non_exhaustive()
    }
}

impl OkuyamaClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn registry(&self) -> &EndpointRegistry {
        self.inner.pool.registry()
    }

    /// Server value size limit, once [`init_client`](Self::init_client) ran
    pub fn max_value_size(&self) -> Option<u64> {
        match self.inner.max_value_size.load(Ordering::Relaxed) {
            0 => None,
            size => Some(size),
        }
    }

    /// Ask the server for its value size limit and remember it
    #[instrument(level = "debug", skip(self))]
    pub async fn init_client(&self) -> Result<u64> {
        let request = Request::builder(Opcode::Init).finish();
        let size = retry_once("init_client", RetryMode::Always, || self.try_init(&request)).await?;
        self.inner.max_value_size.store(size, Ordering::Relaxed);
        Ok(size)
    }

    async fn try_init(&self, request: &Request) -> Result<u64> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::Init).await?;
            let size = match reader.next_status().await? {
                Status::Ok => reader.next_number().await?,
                Status::Failed => {
                    let message = reader.next_string(FieldEncoding::Raw).await?;
                    return Err(Error::operation(message.unwrap_or_default()));
                }
            };
            reader.finish().await?;
            Ok::<_, Error>(size)
        }
        .await;
        self.release(conn, outcome)
    }

    /// Version string of the master node, e.g. `0.9.6`
    #[instrument(level = "debug", skip(self))]
    pub async fn master_node_version(&self) -> Result<String> {
        let request = Request::builder(Opcode::MasterNodeVersion).finish();
        retry_once("master_node_version", RetryMode::Always, || {
            self.try_master_node_version(&request)
        })
        .await
    }

    async fn try_master_node_version(&self, request: &Request) -> Result<String> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::MasterNodeVersion).await?;
            // No status field: the reply carries the banner directly
            let banner = reader
                .next_string(FieldEncoding::Raw)
                .await?
                .unwrap_or_default();
            reader.finish().await?;
            Ok::<_, Error>(banner)
        }
        .await;
        let banner = self.release(conn, outcome)?;

        let version = banner
            .strip_prefix(VERSION_PREFIX)
            .ok_or_else(|| Error::operation(banner.clone()))?;
        Ok(version
            .strip_prefix(PRODUCT_PREFIX)
            .unwrap_or(version)
            .to_string())
    }

    /// Store `value` under `key`, replacing any previous value
    #[instrument(level = "debug", skip(self, value, options), fields(tags = options.tags.len()))]
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Option<Value>>,
        options: &StoreOptions,
    ) -> Result<()> {
        let request = self.write_request(Opcode::Set, key, value.into(), None, options)?;
        retry_once("set", RetryMode::Always, || self.try_set(&request)).await
    }

    async fn try_set(&self, request: &Request) -> Result<()> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::Set).await?;
            if reader.next_status().await? == Status::Failed {
                let message = reader.next_string(FieldEncoding::Raw).await?;
                return Err(Error::operation(message.unwrap_or_default()));
            }
            reader.finish().await?;
            Ok::<_, Error>(())
        }
        .await;
        self.release(conn, outcome)
    }

    /// Store `value` only if `key` is absent
    ///
    /// Returns `false` when the key already exists.
    ///
    /// Retried once only when the request never reached the server. A
    /// failure after sending is returned as is, since a repeat could report
    /// `false` for a write that succeeded; [`Error::is_ambiguous`] flags it.
    #[instrument(level = "debug", skip(self, value, options), fields(tags = options.tags.len()))]
    pub async fn add(
        &self,
        key: &str,
        value: impl Into<Option<Value>>,
        options: &StoreOptions,
    ) -> Result<bool> {
        let request = self.write_request(Opcode::Add, key, value.into(), None, options)?;
        retry_once("add", RetryMode::RequestStage, || self.try_add(&request)).await
    }

    async fn try_add(&self, request: &Request) -> Result<bool> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::Add).await?;
            let added = match reader.next_status().await? {
                Status::Ok => true,
                Status::Failed => {
                    let message = reader
                        .next_string(FieldEncoding::Raw)
                        .await?
                        .unwrap_or_default();
                    if !message.starts_with(ALREADY_EXISTS_PREFIX) {
                        return Err(Error::operation(message));
                    }
                    false
                }
            };
            reader.finish().await?;
            Ok::<_, Error>(added)
        }
        .await;
        self.release(conn, outcome)
    }

    /// Value stored under `key`, or `None`
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.validate_key(key)?;
        let request = Request::builder(Opcode::Get)
            .string(Some(key), self.inner.key_encoding)
            .finish();
        retry_once("get", RetryMode::Always, || self.try_get(&request)).await
    }

    async fn try_get(&self, request: &Request) -> Result<Option<Value>> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::Get).await?;
            let value = match reader.next_status().await? {
                Status::Ok => reader.next_value(&self.inner.payload).await?,
                Status::Failed => {
                    absent_unless_message(reader.next_string(FieldEncoding::Raw).await?)?;
                    None
                }
            };
            reader.finish().await?;
            Ok::<_, Error>(value)
        }
        .await;
        self.release(conn, outcome)
    }

    /// Delete `key`, returning the value it held
    ///
    /// When the first attempt fails after the request was sent the retry
    /// may find the key already gone and return `None`.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.validate_key(key)?;
        let request = Request::builder(Opcode::Remove)
            .string(Some(key), self.inner.key_encoding)
            .number(0)
            .finish();
        retry_once("remove", RetryMode::Always, || self.try_remove(&request)).await
    }

    async fn try_remove(&self, request: &Request) -> Result<Option<Value>> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::Remove).await?;
            let previous = match reader.next_status().await? {
                Status::Ok => reader.next_value(&self.inner.payload).await?,
                Status::Failed => {
                    absent_unless_message(reader.next_string(FieldEncoding::Raw).await?)?;
                    None
                }
            };
            reader.finish().await?;
            Ok::<_, Error>(previous)
        }
        .await;
        self.release(conn, outcome)
    }

    /// Keys carrying `tag`
    #[instrument(level = "debug", skip(self))]
    pub async fn get_tag_keys(&self, tag: &str, include_deleted: bool) -> Result<Vec<String>> {
        validate_tag(tag)?;
        let request = Request::builder(Opcode::GetTagKeys)
            .string(Some(tag), FieldEncoding::Base64)
            .string(
                Some(if include_deleted { "true" } else { "false" }),
                FieldEncoding::Raw,
            )
            .finish();
        retry_once("get_tag_keys", RetryMode::Always, || {
            self.try_get_tag_keys(&request)
        })
        .await
    }

    async fn try_get_tag_keys(&self, request: &Request) -> Result<Vec<String>> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::GetTagKeys).await?;
            let keys = match reader.next_status().await? {
                Status::Ok => reader.next_string_list(self.inner.key_encoding).await?,
                Status::Failed => {
                    absent_unless_message(reader.next_string(FieldEncoding::Raw).await?)?;
                    Vec::new()
                }
            };
            reader.finish().await?;
            Ok::<_, Error>(keys)
        }
        .await;
        self.release(conn, outcome)
    }

    /// Value and version token for `key`, for a later
    /// [`set_versioned`](Self::set_versioned)
    #[instrument(level = "debug", skip(self))]
    pub async fn get_versioned(&self, key: &str) -> Result<Option<VersionedValue>> {
        self.validate_key(key)?;
        let request = Request::builder(Opcode::GetVersioned)
            .string(Some(key), self.inner.key_encoding)
            .finish();
        retry_once("get_versioned", RetryMode::Always, || {
            self.try_get_versioned(&request)
        })
        .await
    }

    async fn try_get_versioned(&self, request: &Request) -> Result<Option<VersionedValue>> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::GetVersioned).await?;
            let versioned = match reader.next_status().await? {
                Status::Ok => {
                    let value = reader.next_value(&self.inner.payload).await?;
                    let version = reader
                        .next_string(FieldEncoding::Raw)
                        .await?
                        .unwrap_or_default();
                    value.map(|value| VersionedValue::new(value, version))
                }
                Status::Failed => {
                    absent_unless_message(reader.next_string(FieldEncoding::Raw).await?)?;
                    None
                }
            };
            reader.finish().await?;
            Ok::<_, Error>(versioned)
        }
        .await;
        self.release(conn, outcome)
    }

    /// Store `value` only if the entry still carries `version`
    ///
    /// Fails with [`Error::VersionConflict`] when another writer got there
    /// first.
    ///
    /// Like [`add`](Self::add), retried once only when the request never
    /// reached the server; a lost reply surfaces as an ambiguous error
    /// rather than a spurious conflict.
    #[instrument(level = "debug", skip(self, value, options), fields(tags = options.tags.len()))]
    pub async fn set_versioned(
        &self,
        key: &str,
        value: impl Into<Option<Value>>,
        version: &str,
        options: &StoreOptions,
    ) -> Result<()> {
        if version.is_empty() || version.bytes().any(is_field_delimiter) {
            return Err(Error::InvalidArgument(format!(
                "invalid version token {version:?}"
            )));
        }
        let request =
            self.write_request(Opcode::SetVersioned, key, value.into(), Some(version), options)?;
        retry_once("set_versioned", RetryMode::RequestStage, || {
            self.try_set_versioned(&request)
        })
        .await
    }

    async fn try_set_versioned(&self, request: &Request) -> Result<()> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            reader.expect_opcode(Opcode::SetVersioned).await?;
            if reader.next_status().await? == Status::Failed {
                let message = reader
                    .next_string(FieldEncoding::Raw)
                    .await?
                    .unwrap_or_default();
                if message == VERSION_CONFLICT_MESSAGE {
                    return Err(Error::VersionConflict(message));
                }
                return Err(Error::operation(message));
            }
            reader.finish().await?;
            Ok::<_, Error>(())
        }
        .await;
        self.release(conn, outcome)
    }

    /// Values for `keys` in one round trip; missing keys are skipped
    #[instrument(level = "debug", skip(self, keys), fields(keys = keys.len()))]
    pub async fn get_multi<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<Value>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = Request::builder(Opcode::GetMulti);
        for key in keys {
            let key = key.as_ref();
            self.validate_key(key)?;
            builder = builder.string(Some(key), self.inner.key_encoding);
        }
        let request = builder.finish();
        retry_once("get_multi", RetryMode::Always, || self.try_get_multi(&request)).await
    }

    async fn try_get_multi(&self, request: &Request) -> Result<Vec<Value>> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            let mut values = Vec::new();
            while reader.next_block(Opcode::GetMulti).await? {
                match reader.next_status().await? {
                    Status::Ok => values.extend(reader.next_value(&self.inner.payload).await?),
                    Status::Failed => {
                        reader.next_string(FieldEncoding::Raw).await?;
                    }
                }
                reader.finish().await?;
            }
            Ok::<_, Error>(values)
        }
        .await;
        self.release(conn, outcome)
    }

    /// Every key carrying `tag` together with its value
    #[instrument(level = "debug", skip(self))]
    pub async fn get_pairs_by_tag(&self, tag: &str) -> Result<Vec<Pair>> {
        validate_tag(tag)?;
        let request = Request::builder(Opcode::GetPairsByTag)
            .string(Some(tag), FieldEncoding::Base64)
            .finish();
        retry_once("get_pairs_by_tag", RetryMode::Always, || {
            self.try_get_pairs_by_tag(&request)
        })
        .await
    }

    async fn try_get_pairs_by_tag(&self, request: &Request) -> Result<Vec<Pair>> {
        let mut conn = self.inner.pool.acquire().await?;
        let outcome = async {
            let mut reader = conn.send(request).await?;
            let mut pairs = Vec::new();
            while reader.next_block(Opcode::GetPairsByTag).await? {
                match reader.next_status().await? {
                    Status::Ok => {
                        let key = reader.next_string(self.inner.key_encoding).await?;
                        let value = reader.next_value(&self.inner.payload).await?;
                        if let (Some(key), Some(value)) = (key, value) {
                            pairs.push(Pair { key, value });
                        }
                    }
                    Status::Failed => {
                        reader.next_string(FieldEncoding::Raw).await?;
                    }
                }
                reader.finish().await?;
            }
            Ok::<_, Error>(pairs)
        }
        .await;
        self.release(conn, outcome)
    }

    fn release<T>(&self, conn: PooledConnection, outcome: Result<T>) -> Result<T> {
        match &outcome {
            Ok(_) => self.inner.pool.recycle(conn),
            Err(e) => {
                debug!(endpoint = %conn.endpoint(), error = %e, "exchange failed, closing connection");
                self.inner.pool.destroy(conn);
            }
        }
        outcome
    }

    /// Encode a write request (set, add, versioned set)
    fn write_request(
        &self,
        opcode: Opcode,
        key: &str,
        value: Option<Value>,
        version: Option<&str>,
        options: &StoreOptions,
    ) -> Result<Request> {
        self.validate_key(key)?;
        for tag in &options.tags {
            validate_tag(tag)?;
        }
        let value = value.ok_or_else(|| {
            Error::InvalidArgument("okuyama cannot store a null value".to_string())
        })?;
        let payload = self.inner.payload.encode(key, &value)?;
        self.check_value_size(payload.len())?;

        let mut builder = Request::builder(opcode)
            .string(Some(key), self.inner.key_encoding)
            .string_list(&options.tags, FieldEncoding::Base64)
            .number(0)
            .blob(&payload);
        if let Some(version) = version {
            builder = builder.string(Some(version), FieldEncoding::Raw);
        }
        Ok(builder
            .number(options.expire_secs)
            .trailing_separator()
            .finish())
    }

    /// Reject values the server is known to refuse
    ///
    /// The server limit applies to the Base64 field as sent.
    fn check_value_size(&self, payload_len: usize) -> Result<()> {
        let Some(limit) = self.max_value_size() else {
            return Ok(());
        };
        let encoded = (payload_len as u64).div_ceil(3) * 4;
        if encoded > limit {
            return Err(Error::Operation {
                kind: FailureKind::ValueTooLarge,
                message: format!("encoded value of {encoded} bytes exceeds server limit of {limit}"),
            });
        }
        Ok(())
    }

    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".to_string()));
        }
        if key.chars().any(char::is_control) {
            return Err(Error::InvalidArgument(format!(
                "key {key:?} contains control characters"
            )));
        }
        if self.inner.key_encoding == FieldEncoding::Raw
            && (key.bytes().any(is_field_delimiter) || key.as_bytes() == wire::ABSENT)
        {
            return Err(Error::InvalidArgument(format!(
                "key {key:?} cannot be sent unencoded"
            )));
        }
        Ok(())
    }
}

fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() || tag.chars().any(char::is_control) {
        return Err(Error::InvalidArgument(format!("invalid tag {tag:?}")));
    }
    Ok(())
}

fn is_field_delimiter(b: u8) -> bool {
    b == wire::FIELD_SEPARATOR || b == wire::LIST_SEPARATOR || b == wire::LINE_TERMINATOR
}

/// A failed read with empty text means "not found"
fn absent_unless_message(message: Option<String>) -> Result<()> {
    match message {
        Some(message) if !message.is_empty() => Err(Error::operation(message)),
        _ => Ok(()),
    }
}
