//! # Error Handling
//!
//! Error types for the gateway control plane. Translation problems never show
//! up here: they are reported as status conditions. This module covers the
//! faults that abort an operation (configuration, I/O, transport, storage).

pub mod types;

pub use types::{Error, Result};
