//! gRPC services served to Envoy

pub mod ads;

pub use ads::{run_ads_stream, AdsService};
