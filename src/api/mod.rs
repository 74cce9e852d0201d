//! # Debug HTTP Interface
//!
//! Dev-mode only. Lists snapshot cache keys and dumps a snapshot as text.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::build_router;
pub use server::start_debug_server;
