use axum::extract::{DefaultBodyLimit, Multipart, Query};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::sync::Arc;

use super::coordinator::QueryCoordinator;
use super::protocol::*;
use crate::error::Result;
use crate::scoring::types::ScoreTable;
use crate::worker::handlers::{file_response, read_upload};
use crate::worker::protocol::{DownloadParams, MAX_UPLOAD_BYTES};

pub fn routes(coordinator: Arc<QueryCoordinator>) -> Router {
    Router::new()
        .route(ENDPOINT_START, post(handle_start))
        .route(
            ENDPOINT_UPLOAD,
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(ENDPOINT_DOWNLOAD, get(handle_download))
        .layer(Extension(coordinator))
}

pub async fn handle_start(
    Extension(coordinator): Extension<Arc<QueryCoordinator>>,
    query: String,
) -> Result<(StatusCode, Json<ScoreTable>)> {
    coordinator.ensure_leader().await?;
    let table = coordinator.start(&query).await?;
    Ok((StatusCode::OK, Json(table)))
}

pub async fn handle_upload(
    Extension(coordinator): Extension<Arc<QueryCoordinator>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResult>)> {
    coordinator.ensure_leader().await?;
    let (file_name, bytes) = read_upload(multipart).await?;
    let placement = coordinator
        .upload_to_least_loaded_worker(&file_name, bytes)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResult {
            status: format!("File {} uploaded to {}", placement.document, placement.worker),
            worker: placement.worker,
            document: placement.document,
        }),
    ))
}

pub async fn handle_download(
    Extension(coordinator): Extension<Arc<QueryCoordinator>>,
    Query(params): Query<DownloadParams>,
) -> Result<Response> {
    coordinator.ensure_leader().await?;
    let file = coordinator.leader_download(&params.path).await?;
    Ok(file_response(file))
}
