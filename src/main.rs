//! Stage File Proxy Server
//!
//! Loads configuration, sets up logging and serves the document root with
//! the proxy in front of missing public files.

use anyhow::Context;
use stage_file_proxy::{FileServer, MetricsEndpoint, ProxyConfig};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// # Usage
/// ```bash
/// # Start with default config (stage_file_proxy.yaml)
/// stage-file-proxy
///
/// # Start with custom config
/// stage-file-proxy /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Stage File Proxy");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "stage_file_proxy.yaml".to_string());

    info!("Loading configuration from: {}", config_path);

    let config = ProxyConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    match config.origin_url() {
        Some(origin) => info!("  - Origin: {}/{}", origin, config.remote_dir()),
        None => info!("  - Origin: none, proxy disabled"),
    }
    info!("  - Public file path: {}", config.local_namespace());
    info!("  - Document root: {}", config.document_root);
    info!("  - Hotlink: {}", config.hotlink);
    info!("  - Use derivative root: {}", config.use_derivative_root);
    info!("  - Fetch timeout: {} seconds", config.fetch_timeout_secs);

    let metrics_addr = match config.metrics_endpoint {
        Some(ref endpoint) if endpoint.enabled => Some(
            endpoint
                .address
                .parse::<SocketAddr>()
                .context("invalid metrics endpoint address")?,
        ),
        _ => None,
    };

    let server = Arc::new(FileServer::new(config).context("failed to build server")?);

    if let Some(addr) = metrics_addr {
        let endpoint = MetricsEndpoint::new(server.engine().metrics_arc(), addr);
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    #[cfg(unix)]
    spawn_reload_on_hangup(Arc::clone(&server), config_path.clone())?;

    tokio::select! {
        result = Arc::clone(&server).start() => {
            result.context("server stopped")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Shutdown requested, stopping server");
        }
    }

    Ok(())
}

/// Reload the configuration file whenever the process receives SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(server: Arc<FileServer>, config_path: String) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading {}", config_path);
            if let Err(e) = server.reload_config(&config_path) {
                error!("Configuration reload failed: {}", e);
            }
        }
    });
    Ok(())
}
