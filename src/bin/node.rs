//! Ring node binary

use anyhow::Context;
use clap::Parser;
use ringkv::common::{load_address_list, node_port, parse_duration, Config};
use ringkv::transport::http::{serve, HttpConnector};
use ringkv::{console, Node};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ringkv-node")]
#[command(about = "ringkv peer-to-peer key/value node")]
#[command(version)]
struct Cli {
    /// Bootstrap id; the node is named `<prefix><id>` and listens on `base_port + id`
    #[arg(long)]
    id: u16,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bootstrap address list
    #[arg(long)]
    address_file: Option<PathBuf>,

    /// Ring space is 2^hash_bits
    #[arg(long)]
    hash_bits: Option<u32>,

    /// Liveness probe period, e.g. 500ms or 1s
    #[arg(long, value_parser = parse_duration)]
    heartbeat_interval: Option<std::time::Duration>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // File and environment first, CLI flags win
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.address_file {
        config.address_file = path;
    }
    if let Some(bits) = cli.hash_bits {
        config.hash_bits = bits;
    }
    if let Some(interval) = cli.heartbeat_interval {
        config.heartbeat_interval_ms = interval.as_millis() as u64;
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let entries = load_address_list(&config.address_file)
        .await
        .with_context(|| format!("reading {}", config.address_file.display()))?;
    let host = entries
        .iter()
        .find(|entry| entry.id == cli.id)
        .map(|entry| entry.host.clone())
        .unwrap_or_else(|| {
            tracing::warn!(
                "id {} not in the address list, advertising {}",
                cli.id,
                config.bind_host
            );
            config.bind_host.clone()
        });
    let port = node_port(config.base_port, cli.id)?;

    let listener = TcpListener::bind((config.bind_host.as_str(), port))
        .await
        .with_context(|| format!("binding {}:{}", config.bind_host, port))?;

    let connector = HttpConnector::new(config.rpc_timeout())?;
    let node = Node::from_bootstrap_id(
        cli.id,
        format!("{}:{}", host, port),
        config,
        Arc::new(connector),
    );

    let server_node = node.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = serve(listener, server_node).await {
            tracing::error!("peer RPC server stopped: {}", e);
        }
    });

    // a failed join leaves a singleton that keeps serving
    match node.join(&entries).await {
        Ok(()) => tracing::info!("{} is up (leader: {})", node.info(), node.is_leader()),
        Err(e) => tracing::error!("{} is up on its own, join failed: {}", node.info(), e),
    }

    let exited = console::run(&node, BufReader::new(tokio::io::stdin())).await?;
    if !exited {
        // stdin closed without EXIT
        if let Err(e) = node.leave().await {
            tracing::error!("{}: leave failed: {}", node.info(), e);
        }
    }

    server.abort();
    Ok(())
}
