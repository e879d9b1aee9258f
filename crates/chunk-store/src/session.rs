use filemesh_protocol::UploadSummary;
use tracing::warn;

use crate::store::ChunkStore;

/// Accumulates the outcome of one upload stream on one connection.
///
/// The first chunk fixes the upload id. After the first failure the session
/// is poisoned: later chunks are dropped and the summary reports the error.
#[derive(Debug)]
pub struct UploadStreamSession {
    upload_id: Option<String>,
    last_chunk_index: i64,
    total_bytes: u64,
    error: Option<String>,
}

impl Default for UploadStreamSession {
    fn default() -> Self {
        Self {
            upload_id: None,
            last_chunk_index: -1,
            total_bytes: 0,
            error: None,
        }
    }
}

impl UploadStreamSession {
    /// Applies one chunk through `store`.
    pub async fn accept(
        &mut self,
        store: &ChunkStore,
        upload_id: &str,
        chunk_index: u32,
        data: &[u8],
        checksum: &str,
    ) {
        if self.error.is_some() {
            return;
        }

        match &self.upload_id {
            None => self.upload_id = Some(upload_id.to_string()),
            Some(current) if current != upload_id => {
                warn!(current = %current, got = upload_id, "upload stream switched upload id");
                self.error = Some(format!(
                    "stream for {current} received a chunk for {upload_id}"
                ));
                return;
            }
            Some(_) => {}
        }

        match store.append_chunk(upload_id, chunk_index, data, checksum).await {
            Ok(_) => {
                self.last_chunk_index = chunk_index as i64;
                self.total_bytes += data.len() as u64;
            }
            Err(e) => {
                warn!(upload_id, chunk_index, "chunk append failed: {e}");
                self.error = Some(e.to_string());
            }
        }
    }

    /// Returns `true` once a chunk failed.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Ends the stream and resets the session for the next one.
    pub fn finish(&mut self) -> UploadSummary {
        let done = std::mem::take(self);
        UploadSummary {
            upload_id: done.upload_id.unwrap_or_default(),
            uploaded_chunks: (done.last_chunk_index + 1) as u32,
            uploaded_bytes: done.total_bytes,
            success: done.error.is_none(),
            error_message: done.error,
        }
    }
}
