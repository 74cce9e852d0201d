use super::handlers::{get_snapshot, index, list_keys};
use crate::xds::SnapshotCache;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn build_router(cache: Arc<SnapshotCache>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/xds", get(list_keys))
        .route("/xds/{key}", get(get_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(cache)
}
