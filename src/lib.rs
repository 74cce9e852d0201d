//! # gwplane
//!
//! A Gateway API control plane for Envoy. Gateways, HTTPRoutes and their
//! referenced objects are translated into per-Gateway xDS snapshots and
//! served to proxies over ADS.
//!
//! The crate runs standalone against YAML manifests on disk, and every
//! cluster-facing seam is a trait so other backends can be plugged in.

pub mod api;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod query;
pub mod reports;
pub mod storage;
pub mod syncer;
pub mod translator;
pub mod xds;

pub use config::Config;
pub use errors::{Error, Result};

use std::sync::Arc;
use storage::ManifestStore;
use syncer::{kick_on_change, XdsSyncer};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use xds::SnapshotCache;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "gwplane";

/// The control plane: syncer, discovery pipeline and servers over one store
#[derive(Debug)]
pub struct Server {
    config: Config,
    store: Arc<ManifestStore>,
    cache: Arc<SnapshotCache>,
}

impl Server {
    pub fn new(config: Config, store: ManifestStore) -> Self {
        Self { config, store: Arc::new(store), cache: Arc::new(SnapshotCache::new()) }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<ManifestStore> {
        self.store.clone()
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        self.cache.clone()
    }

    /// Run every component until `shutdown` fires.
    ///
    /// The standalone binary is always the leader.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(app_name = APP_NAME, version = VERSION, "Starting control plane");

        let (_leader_tx, leadership) = watch::channel(true);
        let syncer = XdsSyncer::new(
            self.store.clone(),
            self.store.clone(),
            self.cache.clone(),
            &self.config.controller,
            leadership,
        );

        let discovery = tokio::spawn(discovery::run_discovery(
            self.store.clone(),
            self.store.subscribe(),
            syncer.discovery_queue(),
            shutdown.clone(),
        ));
        let kicks = tokio::spawn(kick_on_change(
            self.store.subscribe(),
            syncer.kick_queue(),
            shutdown.clone(),
        ));
        let sync = tokio::spawn(syncer.run(shutdown.clone()));

        let xds_shutdown = shutdown.clone();
        let xds = xds::start_xds_server(&self.config.xds, self.cache.clone(), async move {
            xds_shutdown.cancelled().await
        });

        let result = if self.config.dev.enabled {
            let dev_shutdown = shutdown.clone();
            let dev = api::start_debug_server(&self.config.dev, self.cache.clone(), async move {
                dev_shutdown.cancelled().await
            });
            tokio::try_join!(xds, dev).map(|_| ())
        } else {
            xds.await
        };

        // A server failure stops the background tasks too.
        shutdown.cancel();
        for task in [discovery, kicks, sync] {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        tracing::info!("Control plane shutdown completed");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "gwplane");
    }
}
