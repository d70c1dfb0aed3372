//! In-memory fleet used by operation tests.

use crate::{BlobId, BlobMetadata, BlobNodeClient, Endpoint, FetchedBlob, FleetError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Store,
    Fetch,
    Exists,
    List,
}

#[derive(Default)]
pub(crate) struct FakeFleet {
    blobs: Mutex<HashMap<Endpoint, BTreeMap<BlobId, FetchedBlob>>>,
    junk_listings: Mutex<HashMap<Endpoint, Vec<String>>>,
    down: Mutex<HashSet<Endpoint>>,
    read_only: Mutex<HashSet<Endpoint>>,
    calls: Mutex<Vec<(Call, Endpoint)>>,
}

impl FakeFleet {
    pub(crate) fn put(&self, endpoint: &Endpoint, id: &BlobId, body: &str, metadata: BlobMetadata) {
        self.blobs
            .lock()
            .unwrap()
            .entry(endpoint.clone())
            .or_default()
            .insert(
                id.clone(),
                FetchedBlob {
                    body: Bytes::from(body.to_string()),
                    metadata,
                },
            );
    }

    pub(crate) fn get(&self, endpoint: &Endpoint, id: &BlobId) -> Option<FetchedBlob> {
        self.blobs
            .lock()
            .unwrap()
            .get(endpoint)
            .and_then(|blobs| blobs.get(id).cloned())
    }

    pub(crate) fn holds(&self, endpoint: &Endpoint, id: &BlobId) -> bool {
        self.get(endpoint, id).is_some()
    }

    pub(crate) fn set_down(&self, endpoint: &Endpoint) {
        self.down.lock().unwrap().insert(endpoint.clone());
    }

    /// The node stays readable but rejects every write.
    pub(crate) fn set_read_only(&self, endpoint: &Endpoint) {
        self.read_only.lock().unwrap().insert(endpoint.clone());
    }

    pub(crate) fn add_junk_listing(&self, endpoint: &Endpoint, entry: &str) {
        self.junk_listings
            .lock()
            .unwrap()
            .entry(endpoint.clone())
            .or_default()
            .push(entry.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<(Call, Endpoint)> {
        self.calls.lock().unwrap().clone()
    }

    fn enter(&self, call: Call, endpoint: &Endpoint) -> Result<()> {
        self.calls.lock().unwrap().push((call, endpoint.clone()));
        if self.down.lock().unwrap().contains(endpoint) {
            return Err(FleetError::Http(format!("connection refused: {}", endpoint)));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobNodeClient for FakeFleet {
    async fn store_blob(
        &self,
        endpoint: &Endpoint,
        id: &BlobId,
        body: Bytes,
        metadata: &BlobMetadata,
    ) -> Result<Bytes> {
        self.enter(Call::Store, endpoint)?;
        if self.read_only.lock().unwrap().contains(endpoint) {
            return Err(FleetError::Http(format!(
                "blob write failed: endpoint={} status=500",
                endpoint
            )));
        }

        let size = body.len();
        self.blobs
            .lock()
            .unwrap()
            .entry(endpoint.clone())
            .or_default()
            .insert(
                id.clone(),
                FetchedBlob {
                    body,
                    metadata: metadata.clone(),
                },
            );

        Ok(Bytes::from(format!(
            "{{\"id\":\"{}\",\"status\":\"OK\",\"size\":{},\"node\":\"{}\"}}",
            id, size, endpoint
        )))
    }

    async fn fetch_blob(&self, endpoint: &Endpoint, id: &BlobId) -> Result<Option<FetchedBlob>> {
        self.enter(Call::Fetch, endpoint)?;
        Ok(self.get(endpoint, id))
    }

    async fn blob_exists(&self, endpoint: &Endpoint, id: &BlobId) -> Result<bool> {
        self.enter(Call::Exists, endpoint)?;
        Ok(self.holds(endpoint, id))
    }

    async fn list_blobs(&self, endpoint: &Endpoint) -> Result<Vec<String>> {
        self.enter(Call::List, endpoint)?;
        let mut entries: Vec<String> = self
            .blobs
            .lock()
            .unwrap()
            .get(endpoint)
            .map(|blobs| blobs.keys().map(|id| id.to_string()).collect())
            .unwrap_or_default();
        if let Some(junk) = self.junk_listings.lock().unwrap().get(endpoint) {
            entries.extend(junk.iter().cloned());
        }
        Ok(entries)
    }
}
