//! Upload lifecycle: initiate or resume, progress, finalize, status.

use std::sync::Arc;

use filemesh_protocol::FileStatus;
use filemesh_protocol::messages::{InitiateUploadResponse, UploadStatusResponse};
use tracing::{info, warn};

use crate::metadata::{FileRecord, MetadataStore, OwnershipError};
use crate::node_control::NodeControl;
use crate::registry::NodeRegistry;
use crate::{CoordinatorError, now_millis};

/// Where and from which offset a client should stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateUploadOutcome {
    pub upload_id: String,
    pub node_address: String,
    pub chunk_size: u32,
    pub resumed: bool,
    pub last_chunk_index: i64,
    pub bytes_uploaded: u64,
}

impl From<InitiateUploadOutcome> for InitiateUploadResponse {
    fn from(o: InitiateUploadOutcome) -> Self {
        InitiateUploadResponse {
            upload_id: o.upload_id,
            node_address: o.node_address,
            chunk_size: o.chunk_size,
            resumed: o.resumed,
            last_chunk_index: o.last_chunk_index,
            bytes_uploaded: o.bytes_uploaded,
        }
    }
}

/// Read-only projection of an upload record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    pub upload_id: String,
    pub status: FileStatus,
    pub bytes_uploaded: u64,
    pub last_chunk_index: i64,
}

impl From<UploadStatus> for UploadStatusResponse {
    fn from(s: UploadStatus) -> Self {
        UploadStatusResponse {
            upload_id: s.upload_id,
            status: s.status,
            bytes_uploaded: s.bytes_uploaded,
            last_chunk_index: s.last_chunk_index,
        }
    }
}

/// Drives uploads from initiation to finalization.
///
/// The storage node, not this coordinator, is the source of truth for how
/// many bytes arrived; finalization asks the node before committing.
pub struct UploadCoordinator<C> {
    registry: Arc<NodeRegistry>,
    metadata: Arc<MetadataStore>,
    nodes: Arc<C>,
    chunk_size: u32,
}

impl<C: NodeControl> UploadCoordinator<C> {
    pub fn new(
        registry: Arc<NodeRegistry>,
        metadata: Arc<MetadataStore>,
        nodes: Arc<C>,
        chunk_size: u32,
    ) -> Self {
        Self {
            registry,
            metadata,
            nodes,
            chunk_size,
        }
    }

    /// Starts an upload of `file_path`, or resumes the one in progress when
    /// `resume` is set.
    ///
    /// A fresh initiate over an in-progress upload supersedes it. A path
    /// that is already finalized is a conflict.
    pub fn initiate_upload(
        &self,
        file_path: &str,
        file_size: u64,
        resume: bool,
    ) -> Result<InitiateUploadOutcome, CoordinatorError> {
        let existing = self.metadata.find_by_file_path(file_path);

        if let Some(record) = &existing {
            if resume && record.status == FileStatus::Uploading {
                info!(
                    upload_id = %record.upload_id,
                    file_path,
                    last_chunk_index = record.last_chunk_index,
                    "resuming upload"
                );
                return Ok(InitiateUploadOutcome {
                    upload_id: record.upload_id.clone(),
                    node_address: record.node_address.clone(),
                    chunk_size: self.chunk_size,
                    resumed: true,
                    last_chunk_index: record.last_chunk_index,
                    bytes_uploaded: record.bytes_uploaded,
                });
            }
            if record.status == FileStatus::Finalized {
                return Err(CoordinatorError::Conflict(format!(
                    "File already exists and finalized for path: {file_path}"
                )));
            }
        }

        let node = self
            .registry
            .choose_node_for_upload()
            .ok_or(CoordinatorError::CapacityExhausted)?;

        let record = FileRecord {
            file_path: file_path.to_string(),
            upload_id: uuid::Uuid::new_v4().to_string(),
            node_address: node.address(),
            status: FileStatus::Uploading,
            file_size,
            created_at: now_millis(),
            finalized_at: None,
            last_chunk_index: -1,
            bytes_uploaded: 0,
        };
        if let Some(previous) = existing {
            info!(
                superseded = %previous.upload_id,
                upload_id = %record.upload_id,
                file_path,
                "fresh upload supersedes one in progress"
            );
        }
        info!(
            upload_id = %record.upload_id,
            file_path,
            file_size,
            node_id = %node.node_id,
            "upload initiated"
        );

        let outcome = InitiateUploadOutcome {
            upload_id: record.upload_id.clone(),
            node_address: record.node_address.clone(),
            chunk_size: self.chunk_size,
            resumed: false,
            last_chunk_index: -1,
            bytes_uploaded: 0,
        };
        if let Err(owner) = self.metadata.claim_path(record) {
            // Finalized between the lookup above and the claim.
            warn!(upload_id = %owner.upload_id, file_path, "path finalized during initiate");
            return Err(CoordinatorError::Conflict(format!(
                "File already exists and finalized for path: {file_path}"
            )));
        }
        Ok(outcome)
    }

    /// Overwrites the recorded progress of an upload.
    pub fn record_progress(
        &self,
        upload_id: &str,
        last_chunk_index: i64,
        bytes_uploaded: u64,
    ) -> Result<(), CoordinatorError> {
        self.metadata
            .update(upload_id, |record| {
                record.last_chunk_index = last_chunk_index;
                record.bytes_uploaded = bytes_uploaded;
            })
            .map(|_| ())
            .ok_or_else(|| CoordinatorError::unknown_upload(upload_id))
    }

    /// Marks an upload complete once its node holds exactly the declared
    /// number of bytes.
    ///
    /// On a size mismatch the record stays resumable.
    pub async fn finalize_upload(
        &self,
        upload_id: &str,
        file_path: &str,
    ) -> Result<(), CoordinatorError> {
        let record = self
            .metadata
            .find_by_upload_id(upload_id)
            .ok_or_else(|| CoordinatorError::unknown_upload(upload_id))?;

        if record.file_path != file_path {
            return Err(CoordinatorError::Conflict("File path mismatch".to_string()));
        }
        if record.status == FileStatus::Finalized {
            return Ok(());
        }
        let owns_path = self
            .metadata
            .find_by_file_path(file_path)
            .is_some_and(|current| current.upload_id == upload_id);
        if !owns_path {
            return Err(superseded(upload_id, file_path));
        }

        let stats = self
            .nodes
            .upload_stats(&record.node_address, upload_id)
            .await
            .map_err(|e| {
                warn!(upload_id, node_address = %record.node_address, "stats query failed: {e}");
                CoordinatorError::NodeUnavailable(e.to_string())
            })?;

        if stats.bytes_written != record.file_size {
            warn!(
                upload_id,
                expected = record.file_size,
                actual = stats.bytes_written,
                "finalize rejected"
            );
            return Err(CoordinatorError::SizeMismatch {
                expected: record.file_size,
                actual: stats.bytes_written,
            });
        }

        // The path may have been superseded while the node was queried.
        self.metadata
            .update_if_owner(upload_id, |record| {
                record.status = FileStatus::Finalized;
                record.finalized_at = Some(now_millis());
                record.last_chunk_index = i64::from(stats.chunks_count) - 1;
                record.bytes_uploaded = stats.bytes_written;
            })
            .map_err(|e| match e {
                OwnershipError::Unknown => CoordinatorError::unknown_upload(upload_id),
                OwnershipError::Superseded => superseded(upload_id, file_path),
            })?;
        info!(upload_id, file_path, bytes = stats.bytes_written, "upload finalized");
        Ok(())
    }

    pub fn get_upload_status(&self, upload_id: &str) -> Result<UploadStatus, CoordinatorError> {
        let record = self
            .metadata
            .find_by_upload_id(upload_id)
            .ok_or_else(|| CoordinatorError::unknown_upload(upload_id))?;
        Ok(UploadStatus {
            upload_id: record.upload_id,
            status: record.status,
            bytes_uploaded: record.bytes_uploaded,
            last_chunk_index: record.last_chunk_index,
        })
    }
}

fn superseded(upload_id: &str, file_path: &str) -> CoordinatorError {
    CoordinatorError::Conflict(format!(
        "Upload {upload_id} was superseded for path: {file_path}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::test_support::FakeNodes;

    struct Fixture {
        _dir: TempDir,
        registry: Arc<NodeRegistry>,
        metadata: Arc<MetadataStore>,
        nodes: Arc<FakeNodes>,
        uploads: UploadCoordinator<FakeNodes>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(NodeRegistry::new(Duration::from_secs(30)));
        let metadata = Arc::new(MetadataStore::open(dir.path().join("metadata.json")));
        let nodes = Arc::new(FakeNodes::default());
        let uploads = UploadCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&metadata),
            Arc::clone(&nodes),
            4,
        );
        Fixture {
            _dir: dir,
            registry,
            metadata,
            nodes,
            uploads,
        }
    }

    #[test]
    fn fresh_initiate_creates_record() {
        let f = fixture();
        f.registry.register("10.0.0.1", 9091);

        let out = f.uploads.initiate_upload("/a.bin", 26, false).unwrap();
        assert!(!out.resumed);
        assert_eq!(out.last_chunk_index, -1);
        assert_eq!(out.bytes_uploaded, 0);
        assert_eq!(out.chunk_size, 4);
        assert_eq!(out.node_address, "10.0.0.1:9091");

        let record = f.metadata.find_by_upload_id(&out.upload_id).unwrap();
        assert_eq!(record.file_path, "/a.bin");
        assert_eq!(record.status, FileStatus::Uploading);
        assert_eq!(record.file_size, 26);
        assert!(record.created_at > 0);
    }

    #[test]
    fn no_live_node_is_capacity_exhausted() {
        let f = fixture();
        let err = f.uploads.initiate_upload("/a", 1, false).unwrap_err();
        assert!(matches!(err, CoordinatorError::CapacityExhausted));
        assert!(f.metadata.find_all().is_empty());
    }

    #[test]
    fn resume_without_record_behaves_like_fresh() {
        let f = fixture();
        f.registry.register("h", 1);
        let out = f.uploads.initiate_upload("/a", 10, true).unwrap();
        assert!(!out.resumed);
        assert_eq!(out.last_chunk_index, -1);
        assert!(f.metadata.find_by_upload_id(&out.upload_id).is_some());
    }

    #[test]
    fn resume_returns_recorded_progress_without_writing() {
        let f = fixture();
        f.registry.register("h", 1);
        let first = f.uploads.initiate_upload("/a", 26, false).unwrap();
        f.uploads.record_progress(&first.upload_id, 2, 12).unwrap();

        // Even with no live node, a resume needs no selection.
        let reg_nodes = f.registry.active_nodes();
        f.registry.unregister(&reg_nodes[0].node_id);

        let resumed = f.uploads.initiate_upload("/a", 26, true).unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.upload_id, first.upload_id);
        assert_eq!(resumed.node_address, first.node_address);
        assert_eq!(resumed.last_chunk_index, 2);
        assert_eq!(resumed.bytes_uploaded, 12);
        assert_eq!(f.metadata.find_all().len(), 1);
    }

    #[test]
    fn fresh_initiate_supersedes_in_progress_upload() {
        let f = fixture();
        f.registry.register("h", 1);
        let old = f.uploads.initiate_upload("/a", 26, false).unwrap();
        let new = f.uploads.initiate_upload("/a", 26, false).unwrap();

        assert_ne!(old.upload_id, new.upload_id);
        assert_eq!(
            f.metadata.find_by_file_path("/a").unwrap().upload_id,
            new.upload_id
        );
        assert!(f.metadata.find_by_upload_id(&old.upload_id).is_some());
    }

    #[tokio::test]
    async fn superseded_upload_cannot_finalize() {
        let f = fixture();
        f.registry.register("h", 1);
        let old = f.uploads.initiate_upload("/a", 4, false).unwrap();
        f.uploads.initiate_upload("/a", 4, false).unwrap();
        f.nodes.set_stats(&old.upload_id, 1, 4);

        let err = f.uploads.finalize_upload(&old.upload_id, "/a").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict(_)));
    }

    #[tokio::test]
    async fn progress_on_superseded_upload_keeps_new_owner() {
        let f = fixture();
        f.registry.register("h", 1);
        let old = f.uploads.initiate_upload("/a", 4, false).unwrap();
        let new = f.uploads.initiate_upload("/a", 4, false).unwrap();

        f.uploads.record_progress(&old.upload_id, 0, 4).unwrap();
        assert_eq!(
            f.metadata.find_by_file_path("/a").unwrap().upload_id,
            new.upload_id
        );
        assert_eq!(
            f.uploads.get_upload_status(&old.upload_id).unwrap().bytes_uploaded,
            4
        );

        f.nodes.set_stats(&new.upload_id, 1, 4);
        f.uploads.finalize_upload(&new.upload_id, "/a").await.unwrap();
        assert_eq!(
            f.metadata.find_by_file_path("/a").unwrap().status,
            FileStatus::Finalized
        );
    }

    #[test]
    fn guarded_update_refuses_superseded_upload() {
        let f = fixture();
        f.registry.register("h", 1);
        let old = f.uploads.initiate_upload("/a", 4, false).unwrap();
        let new = f.uploads.initiate_upload("/a", 4, false).unwrap();

        let err = f
            .metadata
            .update_if_owner(&old.upload_id, |r| r.status = FileStatus::Finalized)
            .unwrap_err();
        assert_eq!(err, OwnershipError::Superseded);

        let owner = f.metadata.find_by_file_path("/a").unwrap();
        assert_eq!(owner.upload_id, new.upload_id);
        assert_eq!(owner.status, FileStatus::Uploading);
        assert_eq!(
            f.metadata.find_by_upload_id(&old.upload_id).unwrap().status,
            FileStatus::Uploading
        );
    }

    #[tokio::test]
    async fn finalize_commits_node_stats() {
        let f = fixture();
        f.registry.register("h", 1);
        let out = f.uploads.initiate_upload("/a", 26, false).unwrap();
        f.nodes.set_stats(&out.upload_id, 7, 26);

        f.uploads.finalize_upload(&out.upload_id, "/a").await.unwrap();

        let record = f.metadata.find_by_upload_id(&out.upload_id).unwrap();
        assert_eq!(record.status, FileStatus::Finalized);
        assert_eq!(record.last_chunk_index, 6);
        assert_eq!(record.bytes_uploaded, 26);
        assert!(record.finalized_at.is_some());

        let status = f.uploads.get_upload_status(&out.upload_id).unwrap();
        assert_eq!(status.status, FileStatus::Finalized);
    }

    #[tokio::test]
    async fn size_mismatch_keeps_upload_resumable() {
        let f = fixture();
        f.registry.register("h", 1);
        let out = f.uploads.initiate_upload("/a", 26, false).unwrap();
        f.nodes.set_stats(&out.upload_id, 5, 20);

        let err = f.uploads.finalize_upload(&out.upload_id, "/a").await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::SizeMismatch {
                expected: 26,
                actual: 20
            }
        ));
        assert_eq!(
            f.uploads.get_upload_status(&out.upload_id).unwrap().status,
            FileStatus::Uploading
        );

        let resumed = f.uploads.initiate_upload("/a", 26, true).unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.upload_id, out.upload_id);

        f.nodes.set_stats(&out.upload_id, 7, 26);
        f.uploads.finalize_upload(&out.upload_id, "/a").await.unwrap();
    }

    #[tokio::test]
    async fn finalize_rejects_unknown_and_mismatched_path() {
        let f = fixture();
        f.registry.register("h", 1);
        let out = f.uploads.initiate_upload("/a", 1, false).unwrap();

        let err = f.uploads.finalize_upload("nope", "/a").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));

        let err = f.uploads.finalize_upload(&out.upload_id, "/b").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict(m) if m == "File path mismatch"));
    }

    #[tokio::test]
    async fn unreachable_node_fails_finalize() {
        let f = fixture();
        f.registry.register("h", 1);
        let out = f.uploads.initiate_upload("/a", 1, false).unwrap();
        f.nodes.take_down(&out.node_address);

        let err = f.uploads.finalize_upload(&out.upload_id, "/a").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NodeUnavailable(_)));
        assert_eq!(
            f.uploads.get_upload_status(&out.upload_id).unwrap().status,
            FileStatus::Uploading
        );
    }

    #[tokio::test]
    async fn finalized_path_rejects_new_upload() {
        let f = fixture();
        f.registry.register("h", 1);
        let out = f.uploads.initiate_upload("/a", 3, false).unwrap();
        f.nodes.set_stats(&out.upload_id, 1, 3);
        f.uploads.finalize_upload(&out.upload_id, "/a").await.unwrap();

        for resume in [false, true] {
            let err = f.uploads.initiate_upload("/a", 3, resume).unwrap_err();
            assert!(matches!(err, CoordinatorError::Conflict(_)));
        }
    }

    #[test]
    fn progress_and_status_for_unknown_upload() {
        let f = fixture();
        assert!(matches!(
            f.uploads.record_progress("ghost", 0, 1),
            Err(CoordinatorError::NotFound(_))
        ));
        assert!(matches!(
            f.uploads.get_upload_status("ghost"),
            Err(CoordinatorError::NotFound(_))
        ));
    }

    #[test]
    fn initiate_spreads_uploads_across_nodes() {
        let f = fixture();
        f.registry.register("h", 1);
        f.registry.register("h", 2);

        let a = f.uploads.initiate_upload("/a", 1, false).unwrap();
        let b = f.uploads.initiate_upload("/b", 1, false).unwrap();
        assert_ne!(a.node_address, b.node_address);
    }
}
