//! okuyama command-line client
//!
//! Thin wrapper around okuyama-client: parses arguments, initializes
//! logging on stderr, runs one operation and prints the result on stdout.
//! Lookups that find nothing exit with status 1.

mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use okuyama_client::{OkuyamaClient, Value};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LogFormat};

#[derive(Serialize)]
struct EndpointState<'a> {
    address: &'a str,
    offline: bool,
}

#[derive(Serialize)]
struct Stats<'a> {
    max_value_size: Option<u64>,
    pool: okuyama_client::PoolStats,
    endpoints: Vec<EndpointState<'a>>,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn found(value: Option<Value>) -> ExitCode {
    match value {
        Some(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        None => ExitCode::FAILURE,
    }
}

async fn run(client: &OkuyamaClient, command: Command) -> Result<ExitCode> {
    let code = match command {
        Command::Get { key } => found(client.get(&key).await?),
        Command::Set(write) => {
            client.set(&write.key, write.value()?, &write.options()).await?;
            ExitCode::SUCCESS
        }
        Command::Add(write) => {
            if client.add(&write.key, write.value()?, &write.options()).await? {
                println!("added");
                ExitCode::SUCCESS
            } else {
                println!("exists");
                ExitCode::FAILURE
            }
        }
        Command::Remove { key } => found(client.remove(&key).await?),
        Command::TagKeys {
            tag,
            include_deleted,
        } => {
            let keys = client.get_tag_keys(&tag, include_deleted).await?;
            for key in &keys {
                println!("{key}");
            }
            if keys.is_empty() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Pairs { tag } => {
            let pairs = client.get_pairs_by_tag(&tag).await?;
            for pair in &pairs {
                println!("{}\t{}", pair.key, pair.value);
            }
            if pairs.is_empty() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::MultiGet { keys } => {
            for value in client.get_multi(keys.as_slice()).await? {
                println!("{value}");
            }
            ExitCode::SUCCESS
        }
        Command::VersionedGet { key } => match client.get_versioned(&key).await? {
            Some(versioned) => {
                println!("{}\t{}", versioned.value(), versioned.version());
                ExitCode::SUCCESS
            }
            None => ExitCode::FAILURE,
        },
        Command::VersionedSet { write, version } => {
            client
                .set_versioned(&write.key, write.value()?, &version, &write.options())
                .await?;
            ExitCode::SUCCESS
        }
        Command::Version => {
            println!("{}", client.master_node_version().await?);
            ExitCode::SUCCESS
        }
        Command::Init => {
            println!("{}", client.init_client().await?);
            ExitCode::SUCCESS
        }
        Command::Stats => {
            let max_value_size = client.init_client().await.ok();
            let stats = Stats {
                max_value_size,
                pool: client.stats(),
                endpoints: client
                    .registry()
                    .endpoints()
                    .iter()
                    .map(|e| EndpointState {
                        address: e.address(),
                        offline: e.is_offline(),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&stats)?);
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = cli.connection.to_config();
    tracing::debug!(endpoints = ?config.endpoints, "connecting");
    let client = OkuyamaClient::new(config).context("invalid client configuration")?;

    run(&client, cli.command).await
}
