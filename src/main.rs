use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gwplane::{
    cli::{Cli, Commands},
    discovery::DiscoveryInputs,
    observability::{init_logging, log_config_info},
    storage::ManifestStore,
    syncer::XdsSyncer,
    xds::SnapshotCache,
    Config, Server, APP_NAME, VERSION,
};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    init_logging(&config.observability)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting gwplane");
    log_config_info(&config);

    let store = ManifestStore::load_dir(cli.manifests())
        .with_context(|| format!("failed to load manifests from {}", cli.manifests().display()))?;

    match cli.command {
        Commands::Serve { .. } => serve(config, store).await,
        Commands::Translate { .. } => translate(config, store).await,
    }
}

async fn serve(config: Config, store: ManifestStore) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    Server::new(config, store).run(shutdown).await?;
    Ok(())
}

/// One sync pass without serving, printing what would be published
async fn translate(config: Config, store: ManifestStore) -> anyhow::Result<()> {
    let store = Arc::new(store);
    let cache = Arc::new(SnapshotCache::new());
    let (_leader_tx, leadership) = watch::channel(true);
    let syncer =
        XdsSyncer::new(store.clone(), store.clone(), cache.clone(), &config.controller, leadership);

    let inputs = DiscoveryInputs::from_index(&store.current());
    let summary = syncer.sync_pass(&inputs).await;
    info!(
        gateways = summary.gateways,
        published = summary.published,
        status_writes = summary.status_writes,
        "Translation complete"
    );

    let index = store.current();
    for gateway in index.gateways() {
        let name = gateway.metadata.namespaced_name();
        println!("---");
        println!("# Gateway {name}");
        if let Some(status) = store.gateway_status(&name) {
            print!("{}", serde_yaml::to_string(&status)?);
        }
    }
    for route in index.http_routes() {
        let name = route.metadata.namespaced_name();
        if let Some(status) = store.route_status(&name) {
            println!("---");
            println!("# HTTPRoute {name}");
            print!("{}", serde_yaml::to_string(&status)?);
        }
    }

    for key in cache.snapshot_keys() {
        if let Some(snapshot) = cache.get_snapshot(&key) {
            println!(
                "# snapshot {key}: clusters={} endpoints={} routes={} listeners={}",
                snapshot.clusters.version(),
                snapshot.endpoints.version(),
                snapshot.routes.version(),
                snapshot.listeners.version(),
            );
        }
    }
    Ok(())
}
