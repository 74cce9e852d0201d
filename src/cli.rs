//! # Command Line Interface
//!
//! Argument parsing for the `gwplane` binary. Flags override the
//! environment-derived configuration.

use crate::config::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gwplane")]
#[command(about = "Gateway API control plane for Envoy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve xDS for the Gateways found in a manifest directory
    Serve {
        /// Directory of YAML manifests
        #[arg(short, long)]
        manifests: PathBuf,

        /// xDS server port
        #[arg(long)]
        xds_port: Option<u16>,

        /// xDS server bind address
        #[arg(long)]
        xds_bind_address: Option<String>,

        /// Address proxies bind their listeners to
        #[arg(long)]
        proxy_bind_address: Option<String>,

        /// Controller name written into route statuses
        #[arg(long)]
        controller_name: Option<String>,

        /// Remove snapshots of deleted Gateways instead of emptying them
        #[arg(long)]
        xds_garbage_collection: bool,

        /// Start the debug HTTP server
        #[arg(long)]
        dev: bool,

        /// Debug HTTP server port
        #[arg(long)]
        dev_port: Option<u16>,
    },

    /// Translate a manifest directory once and print statuses and snapshot versions
    Translate {
        /// Directory of YAML manifests
        #[arg(short, long)]
        manifests: PathBuf,
    },
}

impl Cli {
    /// Apply command-line overrides on top of `config`
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if self.verbose {
            config.observability.log_level = "debug".to_string();
        }
        if self.json_logs {
            config.observability.json_logging = true;
        }

        if let Commands::Serve {
            xds_port,
            xds_bind_address,
            proxy_bind_address,
            controller_name,
            xds_garbage_collection,
            dev,
            dev_port,
            ..
        } = &self.command
        {
            if let Some(port) = xds_port {
                config.xds.port = *port;
            }
            if let Some(addr) = xds_bind_address {
                config.xds.bind_address = addr.clone();
            }
            if let Some(addr) = proxy_bind_address {
                config.controller.proxy_bind_address = addr.clone();
            }
            if let Some(name) = controller_name {
                config.controller.controller_name = name.clone();
            }
            if *xds_garbage_collection {
                config.controller.xds_garbage_collection = true;
            }
            if *dev {
                config.dev.enabled = true;
            }
            if let Some(port) = dev_port {
                config.dev.port = *port;
            }
        }
    }

    pub fn manifests(&self) -> &PathBuf {
        match &self.command {
            Commands::Serve { manifests, .. } | Commands::Translate { manifests } => manifests,
        }
    }
}
