use crate::{BlobId, BlobMetadata, Endpoint, FleetError, Result, metadata_from_headers, metadata_headers};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url, header};
use std::time::Duration;

pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_NODE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBlob {
    pub body: Bytes,
    pub metadata: BlobMetadata,
}

/// Outbound calls from the routing tier and the Rebalancer to a single storage node.
///
/// Transport failures, timeouts and unexpected statuses are all reported as `Err`; callers
/// walking a search path treat them as "try the next candidate".
#[async_trait]
pub trait BlobNodeClient: Send + Sync {
    /// Writes `body` and returns the node's acknowledgement body unchanged.
    async fn store_blob(
        &self,
        endpoint: &Endpoint,
        id: &BlobId,
        body: Bytes,
        metadata: &BlobMetadata,
    ) -> Result<Bytes>;

    /// `Ok(None)` when the node answers not-found.
    async fn fetch_blob(&self, endpoint: &Endpoint, id: &BlobId) -> Result<Option<FetchedBlob>>;

    async fn blob_exists(&self, endpoint: &Endpoint, id: &BlobId) -> Result<bool>;

    /// Raw inventory; entries are validated by the caller.
    async fn list_blobs(&self, endpoint: &Endpoint) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct HttpBlobNodeClient {
    client: Client,
}

impl HttpBlobNodeClient {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|error| FleetError::Config(format!("failed to build http client: {}", error)))?;

        Ok(Self { client })
    }

    pub fn blob_url(&self, endpoint: &Endpoint, id: &BlobId) -> Result<Url> {
        Url::parse(&format!("{}/blob/{}", endpoint, id))
            .map_err(|error| FleetError::Http(error.to_string()))
    }

    pub fn list_url(&self, endpoint: &Endpoint) -> Result<Url> {
        Url::parse(&format!("{}/blobs", endpoint))
            .map_err(|error| FleetError::Http(error.to_string()))
    }
}

#[async_trait]
impl BlobNodeClient for HttpBlobNodeClient {
    async fn store_blob(
        &self,
        endpoint: &Endpoint,
        id: &BlobId,
        body: Bytes,
        metadata: &BlobMetadata,
    ) -> Result<Bytes> {
        let mut headers = metadata_headers(metadata);
        headers
            .entry(header::CONTENT_TYPE)
            .or_insert(header::HeaderValue::from_static("application/octet-stream"));

        let response = self
            .client
            .post(self.blob_url(endpoint, id)?)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FleetError::Http(format!(
                "blob write failed: endpoint={} status={} id={}",
                endpoint,
                response.status(),
                id
            )));
        }

        Ok(response.bytes().await?)
    }

    async fn fetch_blob(&self, endpoint: &Endpoint, id: &BlobId) -> Result<Option<FetchedBlob>> {
        let response = self.client.get(self.blob_url(endpoint, id)?).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(FleetError::Http(format!(
                "blob read failed: endpoint={} status={} id={}",
                endpoint,
                response.status(),
                id
            )));
        }

        let metadata = metadata_from_headers(response.headers());
        let body = response.bytes().await?;

        Ok(Some(FetchedBlob { body, metadata }))
    }

    async fn blob_exists(&self, endpoint: &Endpoint, id: &BlobId) -> Result<bool> {
        let response = self.client.head(self.blob_url(endpoint, id)?).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(FleetError::Http(format!(
                "blob probe failed: endpoint={} status={} id={}",
                endpoint, status, id
            ))),
        }
    }

    async fn list_blobs(&self, endpoint: &Endpoint) -> Result<Vec<String>> {
        let response = self.client.get(self.list_url(endpoint)?).send().await?;

        if !response.status().is_success() {
            return Err(FleetError::Http(format!(
                "blob listing failed: endpoint={} status={}",
                endpoint,
                response.status()
            )));
        }

        Ok(response.json::<Vec<String>>().await?)
    }
}
