//! Periodic removal of abandoned uploads.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metadata::MetadataStore;
use crate::node_control::NodeControl;
use crate::now_millis;

/// Deletes uploads that stayed in progress longer than `stale_after`.
///
/// Node-side deletion is best-effort: the metadata record goes away even if
/// the node could not be reached.
pub struct CleanupReaper<C> {
    metadata: Arc<MetadataStore>,
    nodes: Arc<C>,
    stale_after: Duration,
}

impl<C: NodeControl> CleanupReaper<C> {
    pub fn new(metadata: Arc<MetadataStore>, nodes: Arc<C>, stale_after: Duration) -> Self {
        Self {
            metadata,
            nodes,
            stale_after,
        }
    }

    /// One sweep. Returns the number of records removed.
    pub async fn reap_once(&self) -> usize {
        let stale_ms = i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX);
        let deadline = now_millis().saturating_sub(stale_ms);
        let stale = self.metadata.find_stale_uploads_older_than(deadline);
        if stale.is_empty() {
            debug!("no stale uploads");
            return 0;
        }

        let mut reaped = 0;
        for candidate in &stale {
            // Re-checked under the lock: a finalize may have landed since the scan.
            let Some(record) = self.metadata.delete_if_stale(&candidate.upload_id, deadline) else {
                debug!(upload_id = %candidate.upload_id, "upload no longer stale, skipped");
                continue;
            };
            match self
                .nodes
                .delete_upload(&record.node_address, &record.upload_id)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(
                    upload_id = %record.upload_id,
                    node_address = %record.node_address,
                    "node declined to delete stale upload"
                ),
                Err(e) => warn!(
                    upload_id = %record.upload_id,
                    node_address = %record.node_address,
                    "failed to delete stale upload on node: {e}"
                ),
            }
            info!(upload_id = %record.upload_id, file_path = %record.file_path, "stale upload reaped");
            reaped += 1;
        }
        reaped
    }

    /// Sweeps every `interval` until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        info!(interval_ms = interval.as_millis() as u64, "cleanup reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    self.reap_once().await;
                }
            }
        }
        info!("cleanup reaper stopped");
    }
}
