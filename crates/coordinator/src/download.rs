use std::sync::Arc;

use filemesh_protocol::FileStatus;
use filemesh_protocol::messages::InitiateDownloadResponse;
use tracing::debug;

use crate::CoordinatorError;
use crate::metadata::MetadataStore;

/// Everything a client needs to read a file straight from its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTicket {
    pub upload_id: String,
    pub node_address: String,
    pub file_size: u64,
    pub chunk_size: u32,
}

impl From<DownloadTicket> for InitiateDownloadResponse {
    fn from(t: DownloadTicket) -> Self {
        InitiateDownloadResponse {
            upload_id: t.upload_id,
            node_address: t.node_address,
            file_size: t.file_size,
            chunk_size: t.chunk_size,
        }
    }
}

/// Resolves finalized files to the node that holds them.
pub struct DownloadCoordinator {
    metadata: Arc<MetadataStore>,
    chunk_size: u32,
}

impl DownloadCoordinator {
    pub fn new(metadata: Arc<MetadataStore>, chunk_size: u32) -> Self {
        Self {
            metadata,
            chunk_size,
        }
    }

    /// Only finalized files can be downloaded.
    pub fn initiate_download(&self, file_path: &str) -> Result<DownloadTicket, CoordinatorError> {
        let record = self
            .metadata
            .find_by_file_path(file_path)
            .ok_or_else(|| CoordinatorError::NotFound(format!("File not found: {file_path}")))?;

        if record.status != FileStatus::Finalized {
            return Err(CoordinatorError::Conflict(format!(
                "File is not finalized: {file_path}"
            )));
        }

        debug!(upload_id = %record.upload_id, file_path, "download resolved");
        Ok(DownloadTicket {
            upload_id: record.upload_id,
            node_address: record.node_address,
            file_size: record.file_size,
            chunk_size: self.chunk_size,
        })
    }
}
