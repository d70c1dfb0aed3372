//! Blobfleet Core - routing, failover and replication for a sharded blob store
//!
//! Blobs are content-addressed and placed on a fleet of plain storage nodes:
//! - SHA-256 fingerprints pick a home group for every blob
//! - uploads and downloads walk the home group first, then every other group
//! - an on-demand rebalancer copies blobs into their home groups

pub mod blob_id;
pub mod client;
pub mod error;
pub mod metadata;
pub mod operations;
pub mod routing;
pub mod storage;
pub mod topology;

#[cfg(test)]
mod testing;

pub use blob_id::{BlobId, is_valid_blob_id, strip_extension};
pub use client::{
    BlobNodeClient, DEFAULT_NODE_CONNECT_TIMEOUT, DEFAULT_NODE_TIMEOUT, FetchedBlob,
    HttpBlobNodeClient,
};
pub use error::{FleetError, Result};
pub use metadata::{
    BlobMetadata, METADATA_HEADER_PREFIX, MIME_TYPE_KEY, metadata_from_headers, metadata_headers,
};
pub use operations::*;
pub use routing::{content_fingerprint, home_group, home_group_index, ordered_search_path};
pub use storage::{BlobStorage, FilesystemStorage, StoredBlob};
pub use topology::{DEFAULT_GROUP, Endpoint, Group, ServerEntry, Topology, TopologyRegistry};
