use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ntp_exporter::collector::{
    BaseCollector, CollectorRegistry, HybridCollector, QualityCollector, SecurityCollector,
    run_collection_loop,
};
use ntp_exporter::config::{Config, load_config, load_config_from_env};
use ntp_exporter::metrics::MetricsRegistry;
use ntp_exporter::ntp::dns_cache::{DnsCache, DnsCacheConfig};
use ntp_exporter::logging;
use ntp_exporter::server::{AppState, serve};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Deadline for in-flight work once shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "Prometheus exporter for NTP quality, security and kernel coherence metrics", long_about = None)]
struct Args {
    /// Configuration file path; falls back to env vars + defaults when the
    /// file does not exist
    #[arg(short, long, default_value = "config.toml", env = "NTP_EXPORTER_CONFIG")]
    config: String,

    /// Number of worker threads (default: CPU cores)
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration comes first: logging setup depends on it.
    let config = resolve_config(&args.config)?;
    logging::init(&config.logging);

    let num_cpus = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    let worker_threads = args.threads.unwrap_or(num_cpus);

    let runtime = if worker_threads == 1 {
        info!("starting with single-threaded runtime");
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
    } else {
        info!(worker_threads, "starting with multi-threaded runtime");
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_all()
            .build()?
    };

    runtime.block_on(run(config))
}

/// Load from file when it exists, otherwise defaults + environment.
fn resolve_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        load_config(path).with_context(|| format!("loading config file {path}"))
    } else {
        load_config_from_env().context("loading config from environment")
    }
}

async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    info!(
        version = VERSION,
        servers = config.ntp.servers.len(),
        pools = config.ntp.pools.len(),
        kernel = config.ntp.enable_kernel,
        "ntp-exporter starting"
    );

    let metrics_registry = MetricsRegistry::new(&config.metrics.namespace)
        .context("building metrics registry")?;
    let metrics = metrics_registry.metrics();

    metrics.build_info.with_label_values(&[VERSION]).set(1.0);
    metrics
        .servers_configured
        .set((config.ntp.servers.len() + config.ntp.pools.len()) as f64);

    let cancel = CancellationToken::new();

    // Shared DNS cache for pool resolution, with its background cleanup.
    let dns_cache = Arc::new(DnsCache::new(DnsCacheConfig {
        min_ttl: config.ntp.dns_cache.min_ttl,
        max_ttl: config.ntp.dns_cache.max_ttl,
    }));
    let cleanup_task =
        dns_cache.spawn_cleanup(config.ntp.dns_cache.cleanup_interval, cancel.clone());

    let mut registry = CollectorRegistry::new(Arc::clone(&metrics));
    registry.register(Box::new(BaseCollector::new(
        Arc::clone(&config),
        Arc::clone(&metrics),
        Arc::clone(&dns_cache),
    )));
    registry.register(Box::new(QualityCollector::new(
        Arc::clone(&config),
        Arc::clone(&metrics),
    )));
    registry.register(Box::new(SecurityCollector::new(
        Arc::clone(&config),
        Arc::clone(&metrics),
    )));
    if config.ntp.enable_kernel {
        registry.register(Box::new(HybridCollector::new(
            Arc::clone(&config),
            Arc::clone(&metrics),
        )));
        info!("hybrid mode enabled, kernel metrics will be collected");
    }
    info!(
        total = registry.count(),
        enabled = registry.enabled_count(),
        "collectors registered"
    );

    let collection_task = tokio::spawn(run_collection_loop(
        Arc::new(registry),
        Arc::clone(&metrics),
        config.ntp.scrape_interval,
        cancel.clone(),
    ));

    let addr: SocketAddr = format!("{}:{}", config.server.address, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.address, config.server.port
            )
        })?;
    let state = AppState::new(metrics_registry, VERSION);
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(serve(addr, state, async move {
        server_cancel.cancelled().await;
    }));

    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();

    let drain = async {
        let _ = collection_task.await;
        let _ = cleanup_task.await;
        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "HTTP server error"),
            Err(err) => error!(error = %err, "HTTP server task failed"),
        }
    };

    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "graceful shutdown deadline exceeded, exiting"
        );
    }

    info!("ntp-exporter stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};
        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
