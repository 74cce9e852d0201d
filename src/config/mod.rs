//! # Configuration Management
//!
//! Environment-driven configuration. Every setting has a default so the
//! control plane starts with no environment at all; `GWPLANE_*` variables
//! override individual fields and the CLI can override those again.

pub mod settings;

pub use settings::{
    AppConfig, ControllerConfig, DevServerConfig, ObservabilityConfig, XdsConfig,
    DEFAULT_CONTROLLER_NAME,
};

use crate::Result;
use std::str::FromStr;

/// Application configuration
pub type Config = AppConfig;

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            xds: XdsConfig {
                bind_address: env_or("GWPLANE_XDS_BIND_ADDRESS", defaults.xds.bind_address),
                port: parse_env("GWPLANE_XDS_PORT", defaults.xds.port)?,
            },
            controller: ControllerConfig {
                controller_name: env_or(
                    "GWPLANE_CONTROLLER_NAME",
                    defaults.controller.controller_name,
                ),
                proxy_bind_address: env_or(
                    "GWPLANE_PROXY_BIND_ADDRESS",
                    defaults.controller.proxy_bind_address,
                ),
                xds_garbage_collection: bool_env(
                    "GWPLANE_XDS_GARBAGE_COLLECTION",
                    defaults.controller.xds_garbage_collection,
                ),
            },
            dev: DevServerConfig {
                enabled: bool_env("GWPLANE_DEV_MODE", defaults.dev.enabled),
                port: parse_env("GWPLANE_DEV_PORT", defaults.dev.port)?,
            },
            observability: ObservabilityConfig {
                log_level: env_or("GWPLANE_LOG_LEVEL", defaults.observability.log_level),
                json_logging: bool_env("GWPLANE_LOG_JSON", defaults.observability.json_logging),
            },
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
        .unwrap_or(default)
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
