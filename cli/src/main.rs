//! The server binary: parses CLI flags over a config-file baseline,
//! bootstraps the KV-backed engine, and runs the accept loop (§6 "server
//! process", external collaborator surface).

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use common::config::ServerConfig;
use common::log::init_log;
use kv::MemoryStore;
use server::Shared;

#[derive(Parser, Debug)]
#[command(name = "opentick-server", about = "Time-series SQL front-end over a key-value store")]
struct Args {
    /// Path to a TOML config file; flags below override its values.
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    addr: Option<String>,

    /// KV cluster file. The bundled store is in-memory and ignores this;
    /// it's accepted so the flag surface matches a real KV-backed deployment.
    #[arg(long)]
    fdb_cluster_file: Option<String>,

    #[arg(long)]
    num_foundation_db_connections: Option<usize>,

    #[arg(long)]
    max_concurrency: Option<usize>,

    #[arg(long)]
    timeout: Option<u64>,

    /// Response-cache TTL in seconds; 0 disables the cache.
    #[arg(long)]
    cache: Option<u64>,

    #[arg(long)]
    debug: bool,
}

fn main() -> common::CResult<()> {
    let args = Args::parse();
    let _log_guard = init_log(args.debug, None);

    let mut config = match &args.config {
        Some(path) => common::config::read_config(path)?,
        None => ServerConfig::default(),
    };

    if let Some(addr) = args.addr {
        config.listen.addr = addr;
    }
    if let Some(cluster_file) = args.fdb_cluster_file {
        config.storage.cluster_file = Some(cluster_file);
    }
    if let Some(n) = args.num_foundation_db_connections {
        config.storage.num_connections = n;
    }
    if let Some(n) = args.max_concurrency {
        config.limits.max_concurrency = n;
    }
    if let Some(t) = args.timeout {
        config.limits.timeout_secs = t;
    }
    if let Some(ttl) = args.cache {
        config.response_cache.enabled = ttl > 0;
        config.response_cache.ttl_secs = ttl;
    }

    if config.storage.cluster_file.is_some() {
        tracing::warn!("fdb_cluster_file was set but this build only ships the in-memory store; ignoring");
    }

    let runtime = tokio::runtime::Runtime::new().map_err(|e| common::Error::internal(e.to_string()))?;
    runtime.block_on(run(config))
}

async fn run(config: ServerConfig) -> common::CResult<()> {
    let cache_ttl = config.response_cache.enabled.then_some(config.response_cache.ttl_secs);
    let shared = Arc::new(Shared::new(MemoryStore::new(), cache_ttl, config.limits.max_concurrency)?);
    let timeout = Duration::from_secs(config.limits.timeout_secs);
    server::serve(&config.listen.addr, shared, timeout).await.map_err(|e| common::Error::internal(e.to_string()))
}
