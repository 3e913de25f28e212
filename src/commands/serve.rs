use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;

use poolbroker::server::BrokerServer;

use super::load_config;

/// Run the HTTP service until Ctrl+C
pub async fn serve(config_path: Option<&Path>, bind: Option<SocketAddr>) -> Result<()> {
    let config = load_config(config_path)?;

    if let Err(e) = poolbroker::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let mut server = BrokerServer::new(config).context("Failed to create pool broker server")?;
    if let Some(addr) = bind {
        server = server.with_bind_address(addr);
    }

    let info = server.info();
    println!("{}", info.display());
    println!();
    println!("API Endpoints:");
    println!("  GET  /                  - Service info");
    println!("  GET  /api/health        - Health, cache and lease status");
    println!("  GET  /api/servers       - Current snapshot (?refresh=1 forces a refresh)");
    println!("  POST /api/lease         - Lease an instance");
    println!("  POST /api/release       - Release a lease");
    println!("  POST /api/confirm       - Mark an instance as consumed");
    println!("  GET  /metrics           - Prometheus metrics endpoint");
    println!();
    println!("Pool broker listening on http://{}", info.bind_address);
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Pool broker stopped.");
    Ok(())
}
