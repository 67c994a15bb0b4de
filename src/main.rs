//! restful-dns - a forwarding DNS resolver with REST-managed authoritative records

pub mod api;
pub mod config;
pub mod dns_server;
pub mod error;
pub mod metrics;
pub mod records;
pub mod recovery;
pub mod resolver;
pub mod rr;
pub mod store;
pub mod types;
pub mod wire;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use config::{parse_addr, CacheBackend, Config};
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG: &str = "Dnsfile";

// log timestamps in local time instead of UTC
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "restful-dns")]
#[command(about = "A forwarding DNS resolver with a REST API for authoritative records", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./Dnsfile when present)
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long)]
    dns_address: Option<String>,

    #[arg(long)]
    api_address: Option<String>,

    /// Upstream resolver, may be repeated; replaces the configured list
    #[arg(long = "upstream")]
    upstreams: Vec<String>,

    /// `memory` or a redis:// URL
    #[arg(long)]
    cache: Option<String>,

    /// SQLite database path, or `:memory:`
    #[arg(long)]
    store: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)?,
            None if std::path::Path::new(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG)?,
            None => Config::default(),
        };

        if let Some(addr) = &self.dns_address {
            cfg.dns_addr = parse_addr(addr, 53)?;
        }
        if let Some(addr) = &self.api_address {
            cfg.api_addr = parse_addr(addr, 8081)?;
        }
        if !self.upstreams.is_empty() {
            cfg.forward.upstreams = self
                .upstreams
                .iter()
                .map(|u| parse_addr(u, 53))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(cache) = &self.cache {
            cfg.cache = CacheBackend::parse(cache)?;
        }
        if let Some(store) = self.store {
            cfg.store_path = store;
        }
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let cfg = Args::parse().into_config()?;

    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("restful-dns-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cfg, cores))
}

async fn async_main(cfg: Config, cores: usize) -> Result<()> {
    std::fs::create_dir_all(&cfg.log.dir)?;

    // rotated at local midnight
    let file_appender = RollingFileAppender::new(
        format!("{}/restful-dns.log", cfg.log.dir),
        RollingConditionBasic::new().daily(),
        cfg.log.keep,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    info!("Starting restful-dns version {}", env!("CARGO_PKG_VERSION"));
    info!(">>> Runtime using {} worker threads", cores);
    info!(
        ">>> Forwarding to {:?} with a {:?} timeout per attempt",
        cfg.forward.upstreams, cfg.forward.timeout
    );

    let cache = store::open_cache(&cfg.cache).await?;
    let record_store = store::open_records(&cfg.store_path)?;

    recovery::Recovery::new(cache.clone(), record_store.clone()).run().await?;

    let resolver = Arc::new(resolver::Resolver::new(cache.clone(), &cfg.forward));
    let records = Arc::new(records::RecordManager::new(cache, record_store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = dns_server::DnsServer::new(resolver);
    let dns_addr = cfg.dns_addr;
    let dns_shutdown = shutdown_rx.clone();
    let mut dns_task = tokio::spawn(async move { server.run(dns_addr, dns_shutdown).await });

    let state = api::ApiState { records };
    let mut api_task = tokio::spawn(api::serve(cfg.api_addr, state, shutdown_rx));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutdown signal received");
        }
        res = &mut dns_task => {
            res??;
            anyhow::bail!("DNS server exited unexpectedly");
        }
        res = &mut api_task => {
            res??;
            anyhow::bail!("API server exited unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = dns_task.await? {
        error!("DNS server shutdown error: {}", e);
    }
    api_task.await??;
    info!("Shutdown complete");
    Ok(())
}
