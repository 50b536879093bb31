use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;

use super::service::SearchNode;
use super::types::ClusterStatus;

pub async fn handle_status(Extension(node): Extension<Arc<SearchNode>>) -> (StatusCode, Json<ClusterStatus>) {
    (StatusCode::OK, Json(node.status().await))
}
