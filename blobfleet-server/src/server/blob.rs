use super::{BlobServerState, StoreBlobResponse, response_error};
use blobfleet_core::{BlobId, metadata_from_headers, metadata_headers};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub(crate) async fn alive() -> &'static str {
    "alive"
}

pub(crate) async fn missing() -> Response {
    (StatusCode::NOT_FOUND, "404 - content is not hosted here.").into_response()
}

pub(crate) async fn get_blob(
    State(state): State<Arc<BlobServerState>>,
    Path(raw_id): Path<String>,
) -> Response {
    let id = match BlobId::parse(&raw_id) {
        Ok(id) => id,
        Err(error) => return response_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    match state.storage.get(&id).await {
        Ok(Some(blob)) => (metadata_headers(&blob.metadata), blob.data).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "404 page not found").into_response(),
        Err(error) => {
            tracing::error!("Failed to read blob {}: {}", id, error);
            response_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

pub(crate) async fn head_blob(
    State(state): State<Arc<BlobServerState>>,
    Path(raw_id): Path<String>,
) -> Response {
    let id = match BlobId::parse(&raw_id) {
        Ok(id) => id,
        Err(error) => return response_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    let status = match state.storage.exists(&id).await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(error) => {
            tracing::error!("Failed to probe blob {}: {}", id, error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (status, [(header::CONNECTION, "close")]).into_response()
}

pub(crate) async fn store_blob(
    State(state): State<Arc<BlobServerState>>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let id = match BlobId::parse(&raw_id) {
        Ok(id) => id,
        Err(error) => return response_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    let metadata = metadata_from_headers(&headers);
    let size = body.len();

    if let Err(error) = state.storage.store(&id, body, &metadata).await {
        tracing::error!("Failed to store blob {}: {}", id, error);
        return response_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to write to storage",
        );
    }

    tracing::debug!("Stored blob {} ({} bytes)", id, size);
    (
        StatusCode::OK,
        Json(StoreBlobResponse {
            id: id.to_string(),
            status: "OK".to_string(),
            size,
        }),
    )
        .into_response()
}

pub(crate) async fn list_blobs(State(state): State<Arc<BlobServerState>>) -> Response {
    match state.storage.list().await {
        Ok(ids) => (StatusCode::OK, Json(ids)).into_response(),
        Err(error) => {
            tracing::error!("Failed to list blobs: {}", error);
            response_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}
