use super::routes::build_router;
use crate::config::DevServerConfig;
use crate::errors::Error;
use crate::xds::SnapshotCache;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serve the debug interface until `shutdown_signal` resolves
pub async fn start_debug_server<F>(
    config: &DevServerConfig,
    cache: Arc<SnapshotCache>,
    shutdown_signal: F,
) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .socket_address()
        .parse()
        .map_err(|e| Error::config(format!("Invalid debug server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind debug server: {}", e)))?;

    info!(address = %addr, "Starting debug HTTP server");
    axum::serve(listener, build_router(cache))
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| Error::transport(format!("Debug server error: {}", e)))?;

    info!("Debug server shutdown completed");
    Ok(())
}
