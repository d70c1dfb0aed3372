use super::{ApiServerState, response_error};
use blobfleet_core::{
    BlobMetadata, FetchBlobOperationOutcome, FetchBlobOperationRequest, FleetError,
    UploadBlobOperationRequest, metadata_from_headers, metadata_headers,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub(crate) async fn api_missing() -> Response {
    (StatusCode::NOT_FOUND, "Invalid method or location.").into_response()
}

/// Stores the body on the first blob-server that accepts it and relays that server's
/// acknowledgement.
pub(crate) async fn upload_blob(
    State(state): State<Arc<ApiServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = UploadBlobOperationRequest {
        body,
        metadata: metadata_from_headers(&headers),
    };

    match state.upload_blob_operation.run(request).await {
        Ok(result) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            result.ack,
        )
            .into_response(),
        Err(FleetError::UploadExhausted { attempted }) => {
            tracing::error!("Upload failed: {} blob-server(s) tried", attempted);
            response_error(StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
        }
        Err(error) => {
            tracing::error!("Upload failed: {}", error);
            response_error(StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
        }
    }
}

pub(crate) async fn fetch_blob(
    State(state): State<Arc<ApiServerState>>,
    Path(raw_id): Path<String>,
) -> Response {
    match fetch(&state, raw_id, true).await {
        Some((metadata, body)) => (metadata_headers(&metadata), body).into_response(),
        None => not_found(),
    }
}

pub(crate) async fn head_fetch_blob(
    State(state): State<Arc<ApiServerState>>,
    Path(raw_id): Path<String>,
) -> Response {
    match fetch(&state, raw_id, false).await {
        Some(_) => (StatusCode::OK, [(header::CONNECTION, "close")]).into_response(),
        None => not_found(),
    }
}

async fn fetch(
    state: &ApiServerState,
    raw_id: String,
    include_body: bool,
) -> Option<(BlobMetadata, Bytes)> {
    let outcome = state
        .fetch_blob_operation
        .run(FetchBlobOperationRequest {
            raw_id,
            include_body,
        })
        .await;

    match outcome {
        Ok(FetchBlobOperationOutcome::Found(result)) => {
            Some((result.metadata, result.body.unwrap_or_default()))
        }
        Ok(FetchBlobOperationOutcome::NotFound) => None,
        // An unreachable replica set looks like absence to the caller.
        Err(error) => {
            tracing::warn!("Download failed: {}", error);
            None
        }
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, [(header::CONNECTION, "close")]).into_response()
}

#[cfg(test)]
mod tests {
    use crate::server::{
        ApiServerState, blob_server_router, download_router, serve_api, upload_router,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use blobfleet_core::{
        BlobId, BlobNodeClient, Endpoint, FilesystemStorage, HttpBlobNodeClient,
        RebalanceOperation, RebalanceOperationRequest, TopologyRegistry, content_fingerprint,
        home_group,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    async fn spawn_blob_server() -> (TempDir, Endpoint) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(FilesystemStorage::new(temp_dir.path().to_path_buf()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, blob_server_router(storage)).await.unwrap();
        });
        (temp_dir, Endpoint::parse(&addr.to_string()).unwrap())
    }

    /// An address nothing listens on.
    async fn dead_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Endpoint::parse(&addr.to_string()).unwrap()
    }

    /// Accepts connections and never answers on them.
    async fn silent_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        Endpoint::parse(&addr.to_string()).unwrap()
    }

    fn node_client() -> Arc<dyn BlobNodeClient> {
        Arc::new(HttpBlobNodeClient::new(Duration::from_secs(2), Duration::from_millis(500)).unwrap())
    }

    fn api_state(endpoints: Vec<Endpoint>) -> Arc<ApiServerState> {
        let topology = Arc::new(
            TopologyRegistry::from_servers(endpoints.into_iter().map(|endpoint| ("default", endpoint)))
                .unwrap(),
        );
        Arc::new(ApiServerState::new(topology, node_client()))
    }

    async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_fails_over_and_fetch_strips_extension() {
        let dead = dead_endpoint().await;
        let (dir, live) = spawn_blob_server().await;
        let state = api_state(vec![dead, live]);

        let response = upload_router(state.clone())
            .oneshot(
                Request::post("/upload")
                    .header("X-Mime-Type", "image/png")
                    .body(Body::from("pixels"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let id = content_fingerprint(b"pixels");
        assert_eq!(
            ack,
            serde_json::json!({"id": id, "status": "OK", "size": 6})
        );
        assert!(dir.path().join(&id).exists());

        let response = download_router(state)
            .oneshot(
                Request::get(format!("/fetch/{}.png", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(&body_bytes(response).await[..], b"pixels");
    }

    #[tokio::test]
    async fn test_upload_exhausted_returns_generic_error() {
        let state = api_state(vec![dead_endpoint().await, dead_endpoint().await]);

        let response = upload_router(state)
            .oneshot(Request::post("/upload").body(Body::from("lost")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, serde_json::json!({"error": "upload failed"}));
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found_even_with_dead_nodes() {
        let (_dir, live) = spawn_blob_server().await;
        let state = api_state(vec![dead_endpoint().await, live]);
        let app = download_router(state);

        for request in [
            Request::get("/fetch/abc123").body(Body::empty()).unwrap(),
            Request::head("/fetch/abc123").body(Body::empty()).unwrap(),
            Request::get("/fetch/NOT-VALID").body(Body::empty()).unwrap(),
        ] {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(response.headers()[header::CONNECTION], "close");
        }
    }

    #[tokio::test]
    async fn test_head_fetch_finds_blob() {
        let (_dir, live) = spawn_blob_server().await;
        let state = api_state(vec![live]);

        let response = upload_router(state.clone())
            .oneshot(Request::post("/upload").body(Body::from("probe")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = download_router(state)
            .oneshot(
                Request::head(format!("/fetch/{}", content_fingerprint(b"probe")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_other_routes_are_invalid() {
        let state = api_state(Vec::new());

        let cases = [
            (upload_router(state.clone()), Request::get("/upload")),
            (upload_router(state.clone()), Request::post("/fetch/abc")),
            (download_router(state.clone()), Request::post("/fetch/abc")),
            (download_router(state), Request::get("/")),
        ];

        for (app, request) in cases {
            let response = app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(
                &body_bytes(response).await[..],
                b"Invalid method or location."
            );
        }
    }

    #[tokio::test]
    async fn test_end_to_end_upload_rebalance_download() {
        let (_dir1, n1) = spawn_blob_server().await;
        let (_dir2, n2) = spawn_blob_server().await;
        let (_dir3, n3) = spawn_blob_server().await;
        let topology = Arc::new(
            TopologyRegistry::from_servers(vec![("a", n1), ("b", n2), ("b", n3)]).unwrap(),
        );
        let client = node_client();

        let upload_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let download_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upload_addr = upload_listener.local_addr().unwrap();
        let download_addr = download_listener.local_addr().unwrap();
        let state = Arc::new(ApiServerState::new(topology.clone(), client.clone()));
        tokio::spawn(serve_api(upload_listener, download_listener, state));

        let http = reqwest::Client::new();
        let ack: serde_json::Value = http
            .post(format!("http://{}/upload", upload_addr))
            .body("end to end")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = BlobId::parse(ack["id"].as_str().unwrap()).unwrap();
        assert_eq!(id.as_str(), content_fingerprint(b"end to end"));

        let report = RebalanceOperation::new(topology.clone(), client.clone())
            .run(RebalanceOperationRequest::default())
            .await
            .unwrap();
        assert_eq!(report.nodes_scanned, 3);
        assert_eq!(report.failures, 0);

        let snapshot = topology.snapshot().await;
        let home = home_group(id.as_str(), &snapshot).unwrap();
        for endpoint in &home.endpoints {
            assert!(client.blob_exists(endpoint, &id).await.unwrap(), "{}", endpoint);
        }

        let response = http
            .get(format!("http://{}/fetch/{}.txt", download_addr, id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "end to end");

        let response = http
            .get(format!("http://{}/fetch/{}", download_addr, "0000"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_unresponsive_node_times_out_and_is_skipped() {
        let silent = silent_endpoint().await;
        let (dir, live) = spawn_blob_server().await;
        let topology = Arc::new(
            TopologyRegistry::from_servers(vec![("default", silent), ("default", live)]).unwrap(),
        );
        let client: Arc<dyn BlobNodeClient> = Arc::new(
            HttpBlobNodeClient::new(Duration::from_millis(300), Duration::from_millis(300))
                .unwrap(),
        );
        let state = Arc::new(ApiServerState::new(topology, client));
        let started = std::time::Instant::now();

        let response = upload_router(state.clone())
            .oneshot(Request::post("/upload").body(Body::from("patience")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = content_fingerprint(b"patience");
        assert!(dir.path().join(&id).exists());

        let response = download_router(state.clone())
            .oneshot(
                Request::get(format!("/fetch/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], b"patience");

        let response = download_router(state)
            .oneshot(
                Request::head(format!("/fetch/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
