use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

/// Acknowledgement of a successful `POST /blob/{id}`, relayed verbatim by the API tier.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoreBlobResponse {
    pub(crate) id: String,
    pub(crate) status: String,
    pub(crate) size: usize,
}
