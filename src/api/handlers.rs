use super::ApiError;
use crate::xds::SnapshotCache;
use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

const INDEX: &str = "gwplane debug server\n\n\
    GET /xds         list snapshot cache keys\n\
    GET /xds/{key}   dump the snapshot stored under key\n";

pub async fn index() -> &'static str {
    INDEX
}

pub async fn list_keys(State(cache): State<Arc<SnapshotCache>>) -> Json<Vec<String>> {
    Json(cache.snapshot_keys())
}

pub async fn get_snapshot(
    State(cache): State<Arc<SnapshotCache>>,
    Path(key): Path<String>,
) -> Result<String, ApiError> {
    let snapshot = cache
        .get_snapshot(&key)
        .ok_or_else(|| ApiError::NotFound(format!("no snapshot for key {key}")))?;
    Ok(format!("{snapshot:#?}"))
}
