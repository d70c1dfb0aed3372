use crate::{
    BlobId, BlobMetadata, BlobNodeClient, Endpoint, FleetError, Result, TopologyRegistry,
    content_fingerprint, ordered_search_path,
};
use bytes::Bytes;
use std::sync::Arc;

/// Writes one copy of an upload to the first storage node that accepts it.
///
/// Further copies are left to the Rebalancer, so the caller is acknowledged as soon as a
/// single durable copy exists.
#[derive(Clone)]
pub struct UploadBlobOperation {
    topology: Arc<TopologyRegistry>,
    client: Arc<dyn BlobNodeClient>,
}

#[derive(Debug, Clone)]
pub struct UploadBlobOperationRequest {
    pub body: Bytes,
    pub metadata: BlobMetadata,
}

#[derive(Debug, Clone)]
pub struct UploadBlobOperationResult {
    pub id: BlobId,
    pub endpoint: Endpoint,
    /// Acknowledgement body exactly as returned by the accepting node.
    pub ack: Bytes,
    pub attempts: usize,
}

impl UploadBlobOperation {
    pub fn new(topology: Arc<TopologyRegistry>, client: Arc<dyn BlobNodeClient>) -> Self {
        Self { topology, client }
    }

    pub async fn run(&self, request: UploadBlobOperationRequest) -> Result<UploadBlobOperationResult> {
        let UploadBlobOperationRequest { body, metadata } = request;

        let id = BlobId::parse(&content_fingerprint(&body))?;
        let topology = self.topology.snapshot().await;
        let candidates = ordered_search_path(id.as_str(), &topology);

        for (index, endpoint) in candidates.iter().enumerate() {
            match self
                .client
                .store_blob(endpoint, &id, body.clone(), &metadata)
                .await
            {
                Ok(ack) => {
                    tracing::info!(
                        "Stored blob {} ({} bytes) on {} after {} attempt(s)",
                        id,
                        body.len(),
                        endpoint,
                        index + 1
                    );
                    return Ok(UploadBlobOperationResult {
                        id,
                        endpoint: endpoint.clone(),
                        ack,
                        attempts: index + 1,
                    });
                }
                Err(error) => {
                    tracing::warn!("Upload of {} to {} failed: {}", id, endpoint, error);
                }
            }
        }

        Err(FleetError::UploadExhausted {
            attempted: candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeFleet};
    use crate::{MIME_TYPE_KEY, home_group};

    fn ep(raw: &str) -> Endpoint {
        Endpoint::parse(raw).unwrap()
    }

    fn setup(entries: &[(&str, &str)]) -> (Arc<FakeFleet>, UploadBlobOperation) {
        let fleet = Arc::new(FakeFleet::default());
        let registry = TopologyRegistry::from_servers(
            entries.iter().map(|(group, endpoint)| (*group, ep(endpoint))),
        )
        .unwrap();
        let operation = UploadBlobOperation::new(Arc::new(registry), fleet.clone());
        (fleet, operation)
    }

    fn request(body: &str) -> UploadBlobOperationRequest {
        UploadBlobOperationRequest {
            body: Bytes::from(body.to_string()),
            metadata: BlobMetadata::new(),
        }
    }

    #[tokio::test]
    async fn test_writes_exactly_one_copy() {
        let (fleet, operation) = setup(&[("default", "n1:1"), ("default", "n2:1")]);

        let result = operation.run(request("payload")).await.unwrap();

        assert_eq!(result.id.as_str(), content_fingerprint(b"payload"));
        assert_eq!(result.endpoint, ep("n1:1"));
        assert_eq!(result.attempts, 1);
        assert!(fleet.holds(&ep("n1:1"), &result.id));
        assert!(!fleet.holds(&ep("n2:1"), &result.id));
        assert_eq!(fleet.calls(), vec![(Call::Store, ep("n1:1"))]);
    }

    #[tokio::test]
    async fn test_fails_over_to_the_only_reachable_node() {
        let (fleet, operation) =
            setup(&[("default", "n1:1"), ("default", "n2:1"), ("default", "n3:1")]);
        fleet.set_down(&ep("n1:1"));
        fleet.set_read_only(&ep("n2:1"));

        let result = operation.run(request("failover")).await.unwrap();

        assert_eq!(result.endpoint, ep("n3:1"));
        assert_eq!(result.attempts, 3);
        let expected_ack = format!(
            "{{\"id\":\"{}\",\"status\":\"OK\",\"size\":8,\"node\":\"http://n3:1\"}}",
            result.id
        );
        assert_eq!(result.ack, Bytes::from(expected_ack));
    }

    #[tokio::test]
    async fn test_all_nodes_down_is_exhaustion() {
        let (fleet, operation) = setup(&[("a", "n1:1"), ("b", "n2:1")]);
        fleet.set_down(&ep("n1:1"));
        fleet.set_down(&ep("n2:1"));

        let error = operation.run(request("nowhere")).await.unwrap_err();
        assert!(matches!(error, FleetError::UploadExhausted { attempted: 2 }));
    }

    #[tokio::test]
    async fn test_empty_topology_is_exhaustion() {
        let (_, operation) = setup(&[]);

        let error = operation.run(request("nowhere")).await.unwrap_err();
        assert!(matches!(error, FleetError::UploadExhausted { attempted: 0 }));
    }

    #[tokio::test]
    async fn test_prefers_home_group_and_keeps_metadata() {
        let entries = [("a", "n1:1"), ("b", "n2:1"), ("b", "n3:1")];
        let (fleet, operation) = setup(&entries);

        let body = (0..1000)
            .map(|n| format!("body{}", n))
            .find(|body| {
                let mut topology = crate::Topology::default();
                for (group, endpoint) in entries {
                    topology.add_server(group, ep(endpoint)).unwrap();
                }
                home_group(&content_fingerprint(body.as_bytes()), &topology)
                    .map(|group| group.name == "b")
                    .unwrap_or(false)
            })
            .unwrap();

        let mut metadata = BlobMetadata::new();
        metadata.insert(MIME_TYPE_KEY.to_string(), "text/plain".to_string());
        let result = operation
            .run(UploadBlobOperationRequest {
                body: Bytes::from(body),
                metadata: metadata.clone(),
            })
            .await
            .unwrap();

        assert_eq!(result.endpoint, ep("n2:1"));
        assert_eq!(fleet.get(&ep("n2:1"), &result.id).unwrap().metadata, metadata);
    }
}
