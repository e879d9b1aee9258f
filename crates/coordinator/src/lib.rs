//! Coordinator side of filemesh: storage node membership, durable file
//! metadata, the upload and download lifecycles, and the stale upload reaper.

pub mod cleanup;
pub mod download;
pub mod metadata;
pub mod node_control;
pub mod registry;
pub mod service;
pub mod upload;

use filemesh_protocol::constants::{
    WS_ERR_CODE_CAPACITY_EXHAUSTED, WS_ERR_CODE_CONFLICT, WS_ERR_CODE_NODE_UNAVAILABLE,
    WS_ERR_CODE_NOT_FOUND, WS_ERR_CODE_SIZE_MISMATCH,
};

pub use cleanup::CleanupReaper;
pub use download::{DownloadCoordinator, DownloadTicket};
pub use metadata::{FileRecord, MetadataStore};
pub use node_control::{NodeControl, NodeControlError, RpcNodeControl};
pub use registry::{NodeRegistry, StorageNode};
pub use service::CoordinatorService;
pub use upload::{InitiateUploadOutcome, UploadCoordinator, UploadStatus};

/// Failures reported to coordinator callers.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("No available data nodes")]
    CapacityExhausted,

    #[error("File size mismatch: expected {expected}, actual {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("storage node unavailable: {0}")]
    NodeUnavailable(String),
}

impl CoordinatorError {
    /// Wire error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            CoordinatorError::NotFound(_) => WS_ERR_CODE_NOT_FOUND,
            CoordinatorError::Conflict(_) => WS_ERR_CODE_CONFLICT,
            CoordinatorError::CapacityExhausted => WS_ERR_CODE_CAPACITY_EXHAUSTED,
            CoordinatorError::SizeMismatch { .. } => WS_ERR_CODE_SIZE_MISMATCH,
            CoordinatorError::NodeUnavailable(_) => WS_ERR_CODE_NODE_UNAVAILABLE,
        }
    }

    pub(crate) fn unknown_upload(upload_id: &str) -> Self {
        CoordinatorError::NotFound(format!("Unknown uploadId: {upload_id}"))
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use filemesh_protocol::messages::UploadStatsResponse;

    use crate::node_control::{NodeControl, NodeControlError};

    /// In-memory stand-in for the storage nodes.
    #[derive(Default)]
    pub struct FakeNodes {
        pub stats: Mutex<HashMap<String, UploadStatsResponse>>,
        pub deleted: Mutex<Vec<(String, String)>>,
        /// Addresses whose calls fail as if the node were down.
        pub down: Mutex<HashSet<String>>,
    }

    impl FakeNodes {
        pub fn set_stats(&self, upload_id: &str, chunks_count: u32, bytes_written: u64) {
            self.stats.lock().unwrap().insert(
                upload_id.to_string(),
                UploadStatsResponse {
                    upload_id: upload_id.to_string(),
                    chunks_count,
                    bytes_written,
                },
            );
        }

        pub fn take_down(&self, address: &str) {
            self.down.lock().unwrap().insert(address.to_string());
        }

        fn check_up(&self, address: &str) -> Result<(), NodeControlError> {
            if self.down.lock().unwrap().contains(address) {
                Err(NodeControlError::InvalidAddress(format!("{address} is down")))
            } else {
                Ok(())
            }
        }
    }

    impl NodeControl for FakeNodes {
        async fn upload_stats(
            &self,
            node_address: &str,
            upload_id: &str,
        ) -> Result<UploadStatsResponse, NodeControlError> {
            self.check_up(node_address)?;
            Ok(self
                .stats
                .lock()
                .unwrap()
                .get(upload_id)
                .cloned()
                .unwrap_or(UploadStatsResponse {
                    upload_id: upload_id.to_string(),
                    chunks_count: 0,
                    bytes_written: 0,
                }))
        }

        async fn delete_upload(
            &self,
            node_address: &str,
            upload_id: &str,
        ) -> Result<bool, NodeControlError> {
            self.check_up(node_address)?;
            self.deleted
                .lock()
                .unwrap()
                .push((node_address.to_string(), upload_id.to_string()));
            self.stats.lock().unwrap().remove(upload_id);
            Ok(true)
        }
    }
}
