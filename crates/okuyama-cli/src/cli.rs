//! Command-line arguments

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use okuyama_client::{ClientConfig, CompressorId, StoreOptions, Value};

#[derive(Debug, Parser)]
#[command(name = "okuyama", about = "Command-line client for okuyama master nodes", version)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Compressor {
    Deflate,
    Lz4,
}

impl From<Compressor> for CompressorId {
    fn from(compressor: Compressor) -> Self {
        match compressor {
            Compressor::Deflate => Self::DEFLATE,
            Compressor::Lz4 => Self::LZ4,
        }
    }
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Master nodes as host:port, comma separated
    #[arg(
        long,
        short = 'e',
        env = "OKUYAMA_ENDPOINTS",
        value_delimiter = ',',
        required = true
    )]
    pub endpoints: Vec<String>,

    /// Idle connections kept for reuse
    #[arg(long, env = "OKUYAMA_POOL_SIZE", default_value_t = 10)]
    pub pool_size: usize,

    #[arg(long, env = "OKUYAMA_CONNECT_TIMEOUT_MS", default_value_t = 2000)]
    pub connect_timeout_ms: u64,

    #[arg(long, env = "OKUYAMA_READ_TIMEOUT_MS", default_value_t = 2000)]
    pub read_timeout_ms: u64,

    /// Send keys unencoded instead of Base64
    #[arg(long)]
    pub raw_keys: bool,

    /// Store values uncompressed
    #[arg(long)]
    pub no_compression: bool,

    #[arg(long, value_enum, default_value_t = Compressor::Deflate)]
    pub compressor: Compressor,

    /// Trace every byte on the wire (target okuyama::wire)
    #[arg(long, env = "OKUYAMA_DUMP_STREAM")]
    pub dump_stream: bool,
}

impl ConnectionArgs {
    pub fn to_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        config.endpoints.clone_from(&self.endpoints);
        config.pool.max_pool_size = self.pool_size;
        config.pool.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        config.pool.read_timeout = Duration::from_millis(self.read_timeout_ms);
        config.encoding.base64_keys = !self.raw_keys;
        config.compression.enabled = !self.no_compression;
        config.compression.compressor = self.compressor.into();
        config.dump_stream = self.dump_stream;
        config
    }
}

/// Value and write options shared by the storing commands
#[derive(Debug, Args)]
pub struct WriteArgs {
    pub key: String,
    pub value: String,

    /// Parse the value as JSON and store it as an object
    #[arg(long)]
    pub json: bool,

    /// Tag to attach; may be repeated
    #[arg(long = "tag", short = 't')]
    pub tags: Vec<String>,

    /// Seconds until the entry expires
    #[arg(long, default_value_t = 0)]
    pub expire: u64,
}

impl WriteArgs {
    pub fn value(&self) -> anyhow::Result<Value> {
        if self.json {
            let object: serde_json::Value = serde_json::from_str(&self.value)?;
            Ok(Value::Object(object))
        } else {
            Ok(Value::text(self.value.clone()))
        }
    }

    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            tags: self.tags.clone(),
            expire_secs: self.expire,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a value
    Set(WriteArgs),
    /// Store a value only if the key is absent
    Add(WriteArgs),
    /// Delete a key and print its previous value
    Remove { key: String },
    /// List keys carrying a tag
    TagKeys {
        tag: String,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Print key/value pairs carrying a tag
    Pairs { tag: String },
    /// Print values for several keys; missing keys are skipped
    MultiGet {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print a value and its version token
    VersionedGet { key: String },
    /// Store a value if the entry still has the given version
    VersionedSet {
        #[command(flatten)]
        write: WriteArgs,
        #[arg(long)]
        version: String,
    },
    /// Print the master node version
    Version,
    /// Print the server's maximum value size
    Init,
    /// Print endpoint and pool state as JSON
    Stats,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("okuyama").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn test_connection_args_to_config() {
        let cli = parse(&[
            "--endpoints",
            "a:8888,b:8889",
            "--pool-size",
            "3",
            "--raw-keys",
            "--compressor",
            "lz4",
            "get",
            "key",
        ]);
        let config = cli.connection.to_config();
        assert_eq!(config.endpoints, vec!["a:8888", "b:8889"]);
        assert_eq!(config.pool.max_pool_size, 3);
        assert!(!config.encoding.base64_keys);
        assert_eq!(config.compression.compressor, CompressorId::LZ4);
        assert!(matches!(cli.command, Command::Get { ref key } if key == "key"));
    }

    #[test]
    fn test_write_args() {
        let cli = parse(&[
            "-e", "a:1", "set", "k", r#"{"n":1}"#, "--json", "-t", "x", "-t", "y", "--expire", "30",
        ]);
        let Command::Set(write) = cli.command else {
            panic!("expected set");
        };
        assert_eq!(write.value().expect("json"), Value::Object(serde_json::json!({"n": 1})));
        assert_eq!(
            write.options(),
            StoreOptions {
                tags: vec!["x".into(), "y".into()],
                expire_secs: 30
            }
        );
    }

    #[test]
    fn test_versioned_set_requires_version() {
        assert!(Cli::try_parse_from(["okuyama", "-e", "a:1", "versioned-set", "k", "v"]).is_err());
        let cli = parse(&["-e", "a:1", "versioned-set", "k", "v", "--version", "12"]);
        assert!(matches!(cli.command, Command::VersionedSet { ref version, .. } if version == "12"));
    }

    #[test]
    fn test_multi_get_needs_keys() {
        assert!(Cli::try_parse_from(["okuyama", "-e", "a:1", "multi-get"]).is_err());
    }
}
