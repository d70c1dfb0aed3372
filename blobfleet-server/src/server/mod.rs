use crate::config::ClientConfig;
use blobfleet_core::{
    BlobNodeClient, BlobStorage, FetchBlobOperation, FilesystemStorage, FleetError,
    HttpBlobNodeClient, Result, TopologyRegistry, UploadBlobOperation,
};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

mod api;
mod blob;
mod types;

use api::{api_missing, fetch_blob, head_fetch_blob, upload_blob};
use blob::{alive, get_blob, head_blob, list_blobs, missing, store_blob};
pub(crate) use types::*;

/// Largest request body accepted by either tier.
pub(crate) const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

pub struct BlobServerState {
    pub(crate) storage: Arc<dyn BlobStorage>,
}

pub struct ApiServerState {
    pub(crate) upload_blob_operation: Arc<UploadBlobOperation>,
    pub(crate) fetch_blob_operation: Arc<FetchBlobOperation>,
}

impl ApiServerState {
    pub fn new(topology: Arc<TopologyRegistry>, client: Arc<dyn BlobNodeClient>) -> Self {
        Self {
            upload_blob_operation: Arc::new(UploadBlobOperation::new(
                topology.clone(),
                client.clone(),
            )),
            fetch_blob_operation: Arc::new(FetchBlobOperation::new(topology, client)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobServerOptions {
    pub host: String,
    pub port: u16,
    pub store: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ApiServerOptions {
    pub host: String,
    pub upload_port: u16,
    pub download_port: u16,
}

pub fn blob_server_router(storage: Arc<dyn BlobStorage>) -> Router {
    let state = Arc::new(BlobServerState { storage });

    Router::new()
        .route("/alive", get(alive).fallback(missing))
        .route(
            "/blob/:id",
            get(get_blob)
                .head(head_blob)
                .post(store_blob)
                .fallback(missing),
        )
        .route("/blobs", get(list_blobs).fallback(missing))
        .fallback(missing)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn upload_router(state: Arc<ApiServerState>) -> Router {
    Router::new()
        .route("/upload", post(upload_blob).fallback(api_missing))
        .fallback(api_missing)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn download_router(state: Arc<ApiServerState>) -> Router {
    Router::new()
        .route(
            "/fetch/:id",
            get(fetch_blob).head(head_fetch_blob).fallback(api_missing),
        )
        .fallback(api_missing)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_blob_server(options: BlobServerOptions) -> Result<()> {
    let storage: Arc<dyn BlobStorage> = Arc::new(FilesystemStorage::new(options.store.clone())?);

    let listener = TcpListener::bind((options.host.as_str(), options.port)).await?;
    tracing::info!(
        "blob-server available at http://{}:{}/, uploads will be written beneath {:?}",
        options.host,
        options.port,
        options.store
    );

    axum::serve(listener, blob_server_router(storage))
        .await
        .map_err(|error| FleetError::Http(error.to_string()))?;

    Ok(())
}

pub async fn run_api_server(
    options: ApiServerOptions,
    topology: Arc<TopologyRegistry>,
    client_config: &ClientConfig,
) -> Result<()> {
    let client: Arc<dyn BlobNodeClient> = Arc::new(HttpBlobNodeClient::new(
        client_config.timeout(),
        client_config.connect_timeout(),
    )?);
    let state = Arc::new(ApiServerState::new(topology, client));

    let upload_listener = TcpListener::bind((options.host.as_str(), options.upload_port)).await?;
    let download_listener =
        TcpListener::bind((options.host.as_str(), options.download_port)).await?;
    tracing::info!(
        "Upload service at http://{}:{}/upload",
        options.host,
        options.upload_port
    );
    tracing::info!(
        "Download service at http://{}:{}/fetch/:id",
        options.host,
        options.download_port
    );

    serve_api(upload_listener, download_listener, state).await
}

/// Serves both API listeners until either fails.
pub(crate) async fn serve_api(
    upload_listener: TcpListener,
    download_listener: TcpListener,
    state: Arc<ApiServerState>,
) -> Result<()> {
    let upload = async {
        axum::serve(upload_listener, upload_router(state.clone()))
            .await
            .map_err(|error| FleetError::Http(format!("upload service: {}", error)))
    };
    let download = async {
        axum::serve(download_listener, download_router(state.clone()))
            .await
            .map_err(|error| FleetError::Http(format!("download service: {}", error)))
    };

    tokio::try_join!(upload, download)?;
    Ok(())
}

pub(crate) fn response_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}
