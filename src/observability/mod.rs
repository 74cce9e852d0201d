//! # Observability
//!
//! Structured logging for the control plane.

pub mod logging;

pub use logging::{init_logging, log_config_info};
