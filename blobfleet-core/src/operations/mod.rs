pub mod fetch_blob;
pub mod rebalance;
pub mod upload_blob;

pub use fetch_blob::{
    FetchBlobOperation, FetchBlobOperationOutcome, FetchBlobOperationRequest,
    FetchBlobOperationResult,
};
pub use rebalance::{
    RebalanceOperation, RebalanceOperationRequest, RebalanceOperationResult, ReplicationPolicy,
};
pub use upload_blob::{
    UploadBlobOperation, UploadBlobOperationRequest, UploadBlobOperationResult,
};
