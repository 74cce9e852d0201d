//! # Structured Logging
//!
//! Subscriber setup and span macros. Every log line is a structured event;
//! callers attach identifiers as fields (`gateway = %name`) rather than
//! formatting them into the message.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Returns an error if a
/// global subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config_with_source("Invalid log filter", Box::new(e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logging {
        registry.with(tracing_subscriber::fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(false)).try_init()
    };

    result.map_err(|e| Error::config_with_source("Failed to install tracing subscriber", Box::new(e)))
}

/// Create a tracing span for xDS operations
#[macro_export]
macro_rules! xds_span {
    ($operation:expr, $node_id:expr) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_id = %$node_id,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $node_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_id = %$node_id,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for one Gateway translation
#[macro_export]
macro_rules! translate_span {
    ($gateway:expr) => {
        tracing::info_span!(
            "translate_gateway",
            gateway = %$gateway,
            pass_id = %uuid::Uuid::new_v4()
        )
    };
    ($gateway:expr, $($field:tt)*) => {
        tracing::info_span!(
            "translate_gateway",
            gateway = %$gateway,
            pass_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        xds_address = %config.xds.socket_address(),
        controller_name = %config.controller.controller_name,
        proxy_bind_address = %config.controller.proxy_bind_address,
        xds_garbage_collection = config.controller.xds_garbage_collection,
        dev_mode = config.dev.enabled,
        "Gateway control plane configuration"
    );
}
