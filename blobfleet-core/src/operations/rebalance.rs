use crate::{
    BlobId, BlobNodeClient, Endpoint, FetchedBlob, FleetError, Result, Topology,
    TopologyRegistry, home_group, ordered_search_path,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// How many endpoints of a blob's home group should hold a copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    /// `None` means every endpoint of the home group.
    #[serde(default)]
    pub copies_per_group: Option<usize>,
}

impl ReplicationPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.copies_per_group == Some(0) {
            return Err(FleetError::Config(
                "copies_per_group must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn desired_copies(&self, group_size: usize) -> usize {
        self.copies_per_group
            .map_or(group_size, |copies| copies.min(group_size))
    }
}

/// One reconciliation pass over the whole fleet.
///
/// Copies outside a blob's home group are never removed; they remain as fallback
/// replicas for the download path.
#[derive(Clone)]
pub struct RebalanceOperation {
    topology: Arc<TopologyRegistry>,
    client: Arc<dyn BlobNodeClient>,
}

#[derive(Debug, Clone, Default)]
pub struct RebalanceOperationRequest {
    pub policy: ReplicationPolicy,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceOperationResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub nodes_scanned: usize,
    pub nodes_unreachable: usize,
    pub blobs_seen: usize,
    pub invalid_entries: usize,
    pub copies_planned: usize,
    /// Missing home-group copies whose target node could not be inventoried.
    pub copies_skipped: usize,
    pub copies_repaired: usize,
    pub failures: usize,
    pub errors: Vec<String>,
}

struct Inventory {
    holders: BTreeMap<BlobId, HashSet<Endpoint>>,
    reachable: HashSet<Endpoint>,
}

impl RebalanceOperation {
    pub fn new(topology: Arc<TopologyRegistry>, client: Arc<dyn BlobNodeClient>) -> Self {
        Self { topology, client }
    }

    pub async fn run(&self, request: RebalanceOperationRequest) -> Result<RebalanceOperationResult> {
        let RebalanceOperationRequest { policy, dry_run } = request;
        policy.validate()?;

        let topology = self.topology.snapshot().await;
        let mut result = RebalanceOperationResult {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            dry_run,
            nodes_scanned: 0,
            nodes_unreachable: 0,
            blobs_seen: 0,
            invalid_entries: 0,
            copies_planned: 0,
            copies_skipped: 0,
            copies_repaired: 0,
            failures: 0,
            errors: Vec::new(),
        };

        let inventory = self.collect_inventory(&topology, &mut result).await;
        result.blobs_seen = inventory.holders.len();

        for (id, holders) in &inventory.holders {
            let Some(home) = home_group(id.as_str(), &topology) else {
                continue;
            };

            let desired = policy.desired_copies(home.endpoints.len());
            let present = home
                .endpoints
                .iter()
                .filter(|endpoint| holders.contains(*endpoint))
                .count();
            if present >= desired {
                continue;
            }

            let targets: Vec<&Endpoint> = home
                .endpoints
                .iter()
                .filter(|endpoint| {
                    !holders.contains(*endpoint) && inventory.reachable.contains(*endpoint)
                })
                .take(desired - present)
                .collect();

            let skipped = desired - present - targets.len();
            if skipped > 0 {
                result.copies_skipped += skipped;
                tracing::warn!(
                    "{} is missing {} copy(ies) in group '{}' on unreachable servers",
                    id,
                    skipped,
                    home.name
                );
            }
            if targets.is_empty() {
                continue;
            }

            result.copies_planned += targets.len();
            if dry_run {
                for target in &targets {
                    tracing::info!("[dry-run] would copy {} to {} (group '{}')", id, target, home.name);
                }
                continue;
            }

            let Some(source) = self.read_from_holders(id, holders, &topology).await else {
                result.failures += targets.len();
                result
                    .errors
                    .push(format!("{}: no holder could serve the blob", id));
                continue;
            };

            for target in targets {
                match self
                    .client
                    .store_blob(target, id, source.body.clone(), &source.metadata)
                    .await
                {
                    Ok(_) => {
                        result.copies_repaired += 1;
                        tracing::info!("Copied {} to {} (group '{}')", id, target, home.name);
                    }
                    Err(error) => {
                        result.failures += 1;
                        result.errors.push(format!("{} -> {}: {}", id, target, error));
                        tracing::warn!("Failed to copy {} to {}: {}", id, target, error);
                    }
                }
            }
        }

        result.finished_at = Utc::now();
        tracing::info!(
            "Rebalance finished: nodes={} unreachable={} blobs={} planned={} skipped={} repaired={} failures={}",
            result.nodes_scanned,
            result.nodes_unreachable,
            result.blobs_seen,
            result.copies_planned,
            result.copies_skipped,
            result.copies_repaired,
            result.failures
        );

        Ok(result)
    }

    async fn collect_inventory(
        &self,
        topology: &Topology,
        result: &mut RebalanceOperationResult,
    ) -> Inventory {
        let mut holders: BTreeMap<BlobId, HashSet<Endpoint>> = BTreeMap::new();
        let mut reachable = HashSet::new();

        for server in topology.servers() {
            result.nodes_scanned += 1;

            let entries = match self.client.list_blobs(&server.endpoint).await {
                Ok(entries) => entries,
                Err(error) => {
                    result.nodes_unreachable += 1;
                    result.failures += 1;
                    result
                        .errors
                        .push(format!("{}: inventory failed: {}", server.endpoint, error));
                    tracing::warn!("Skipping {}: inventory failed: {}", server.endpoint, error);
                    continue;
                }
            };

            for entry in entries {
                match BlobId::parse(&entry) {
                    Ok(id) => {
                        holders.entry(id).or_default().insert(server.endpoint.clone());
                    }
                    Err(_) => {
                        result.invalid_entries += 1;
                        tracing::debug!("Ignoring listing entry {:?} from {}", entry, server.endpoint);
                    }
                }
            }

            reachable.insert(server.endpoint);
        }

        Inventory { holders, reachable }
    }

    /// Reads the blob from its holders, home group first.
    async fn read_from_holders(
        &self,
        id: &BlobId,
        holders: &HashSet<Endpoint>,
        topology: &Topology,
    ) -> Option<FetchedBlob> {
        for endpoint in ordered_search_path(id.as_str(), topology) {
            if !holders.contains(&endpoint) {
                continue;
            }

            match self.client.fetch_blob(&endpoint, id).await {
                Ok(Some(fetched)) => return Some(fetched),
                Ok(None) => tracing::debug!("{} vanished from {} during rebalance", id, endpoint),
                Err(error) => tracing::warn!("Failed to read {} from {}: {}", id, endpoint, error),
            }
        }

        None
    }
}
