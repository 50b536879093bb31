use axum::extract::{DefaultBodyLimit, Multipart, Query};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::sync::Arc;

use super::protocol::*;
use super::service::{LocalFile, WorkerService};
use crate::error::{Error, Result};

pub fn routes(worker: Arc<WorkerService>) -> Router {
    Router::new()
        .route(ENDPOINT_PROCESS, post(handle_process))
        .route(ENDPOINT_SCORE, post(handle_score))
        .route(
            ENDPOINT_UPLOAD,
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(ENDPOINT_DOWNLOAD, get(handle_download))
        .route(ENDPOINT_INDEX_SIZE, get(handle_index_size))
        .layer(Extension(worker))
}

pub async fn handle_process(
    Extension(worker): Extension<Arc<WorkerService>>,
    query: String,
) -> (StatusCode, Json<ProcessResponse>) {
    let documents = worker.process(&query);
    (StatusCode::OK, Json(ProcessResponse { documents }))
}

pub async fn handle_score(
    Extension(worker): Extension<Arc<WorkerService>>,
    query: String,
) -> (StatusCode, Json<ScoreResponse>) {
    let scores = worker.score(&query);
    (StatusCode::OK, Json(ScoreResponse { scores }))
}

pub async fn handle_upload(
    Extension(worker): Extension<Arc<WorkerService>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let (file_name, bytes) = read_upload(multipart).await?;
    let document = worker.upload(&file_name, &bytes).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            status: format!("File {} uploaded", document),
            document,
        }),
    ))
}

pub async fn handle_download(
    Extension(worker): Extension<Arc<WorkerService>>,
    Query(params): Query<DownloadParams>,
) -> Result<Response> {
    let file = worker.download(&params.path).await?;
    Ok(file_response(file))
}

pub async fn handle_index_size(Extension(worker): Extension<Arc<WorkerService>>) -> Result<String> {
    Ok(worker.index_size().await?.to_string())
}

/// Pulls the `file` field out of a multipart upload.
pub async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidRequest("upload has no file name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        return Ok((file_name, bytes.to_vec()));
    }

    Err(Error::InvalidRequest(format!("missing '{}' field", UPLOAD_FIELD)))
}

/// Attachment response carrying the file's bytes.
pub fn file_response(file: LocalFile) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.file_name.replace('"', "")
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response()
}
