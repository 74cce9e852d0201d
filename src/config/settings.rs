//! # Configuration Settings
//!
//! Defines the configuration structure for the gateway control plane.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default controller name written into HTTPRoute parent statuses
pub const DEFAULT_CONTROLLER_NAME: &str = "gwplane.dev/gateway-controller";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// xDS server configuration
    #[validate(nested)]
    pub xds: XdsConfig,

    /// Translation and status configuration
    #[validate(nested)]
    pub controller: ControllerConfig,

    /// Dev-mode debug server configuration
    #[validate(nested)]
    pub dev: DevServerConfig,

    /// Logging configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.dev.enabled && self.dev.port == self.xds.port {
            return Err(Error::validation("Debug server and xDS ports cannot be the same"));
        }
        Ok(())
    }
}

/// xDS server configuration for Envoy communication
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct XdsConfig {
    /// xDS server bind address
    #[validate(length(min = 1, message = "xDS bind address cannot be empty"))]
    pub bind_address: String,

    /// xDS server port
    #[validate(range(min = 1, message = "xDS port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 18000 }
    }
}

impl XdsConfig {
    /// Get the xDS server socket address string
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Settings that shape translation output and status write-back
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ControllerConfig {
    /// Controller name recorded in route parent statuses
    #[validate(length(min = 1, message = "Controller name cannot be empty"))]
    pub controller_name: String,

    /// Address the generated proxy listeners bind to
    #[validate(length(min = 1, message = "Proxy bind address cannot be empty"))]
    pub proxy_bind_address: String,

    /// Remove snapshots of deleted Gateways instead of resetting them to empty
    pub xds_garbage_collection: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            proxy_bind_address: "::".to_string(),
            xds_garbage_collection: false,
        }
    }
}

/// Debug HTTP server, only started in dev mode
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DevServerConfig {
    pub enabled: bool,

    #[validate(range(min = 1, message = "Debug server port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self { enabled: false, port: 10010 }
    }
}

impl DevServerConfig {
    pub fn socket_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level or full `EnvFilter` directive (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false }
    }
}
