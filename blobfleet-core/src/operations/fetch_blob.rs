use crate::{
    BlobId, BlobMetadata, BlobNodeClient, Endpoint, Result, TopologyRegistry, ordered_search_path,
};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct FetchBlobOperation {
    topology: Arc<TopologyRegistry>,
    client: Arc<dyn BlobNodeClient>,
}

#[derive(Debug, Clone)]
pub struct FetchBlobOperationRequest {
    /// Id as requested, possibly with a file extension such as `.png`.
    pub raw_id: String,
    /// `false` only probes for existence (HEAD).
    pub include_body: bool,
}

#[derive(Debug, Clone)]
pub struct FetchBlobOperationResult {
    pub id: BlobId,
    pub endpoint: Endpoint,
    pub metadata: BlobMetadata,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub enum FetchBlobOperationOutcome {
    Found(FetchBlobOperationResult),
    NotFound,
}

impl FetchBlobOperation {
    pub fn new(topology: Arc<TopologyRegistry>, client: Arc<dyn BlobNodeClient>) -> Self {
        Self { topology, client }
    }

    pub async fn run(&self, request: FetchBlobOperationRequest) -> Result<FetchBlobOperationOutcome> {
        let FetchBlobOperationRequest {
            raw_id,
            include_body,
        } = request;

        let id = match BlobId::parse_stripping_extension(&raw_id) {
            Ok(id) => id,
            Err(error) => {
                tracing::debug!("Rejecting fetch for {:?}: {}", raw_id, error);
                return Ok(FetchBlobOperationOutcome::NotFound);
            }
        };

        let topology = self.topology.snapshot().await;

        for endpoint in ordered_search_path(id.as_str(), &topology) {
            tracing::debug!("Attempting retrieval of {} from {}", id, endpoint);

            if include_body {
                match self.client.fetch_blob(&endpoint, &id).await {
                    Ok(Some(fetched)) => {
                        tracing::debug!("Found {} on {} ({} bytes)", id, endpoint, fetched.body.len());
                        return Ok(FetchBlobOperationOutcome::Found(FetchBlobOperationResult {
                            id,
                            endpoint,
                            metadata: fetched.metadata,
                            body: Some(fetched.body),
                        }));
                    }
                    Ok(None) => tracing::debug!("{} not present on {}", id, endpoint),
                    Err(error) => tracing::debug!("Error fetching {} from {}: {}", id, endpoint, error),
                }
            } else {
                match self.client.blob_exists(&endpoint, &id).await {
                    Ok(true) => {
                        return Ok(FetchBlobOperationOutcome::Found(FetchBlobOperationResult {
                            id,
                            endpoint,
                            metadata: BlobMetadata::new(),
                            body: None,
                        }));
                    }
                    Ok(false) => tracing::debug!("{} not present on {}", id, endpoint),
                    Err(error) => tracing::debug!("Error probing {} on {}: {}", id, endpoint, error),
                }
            }
        }

        Ok(FetchBlobOperationOutcome::NotFound)
    }
}
