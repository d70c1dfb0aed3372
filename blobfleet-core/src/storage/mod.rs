//! Storage Node contract.
//!
//! A node owns one local content store and knows nothing about topology. Ids reach this
//! layer as [`BlobId`](crate::BlobId), so malformed ids are rejected before any I/O.

pub mod filesystem;

pub use filesystem::FilesystemStorage;

use crate::{BlobId, BlobMetadata, Result};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub metadata: BlobMetadata,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn exists(&self, id: &BlobId) -> Result<bool>;

    async fn get(&self, id: &BlobId) -> Result<Option<StoredBlob>>;

    /// Replaces any previous content and metadata stored under `id`.
    async fn store(&self, id: &BlobId, data: Bytes, metadata: &BlobMetadata) -> Result<()>;

    async fn list(&self) -> Result<Vec<BlobId>>;
}
