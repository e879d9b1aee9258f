use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::reader::ChunkReader;
use crate::{ChunkStoreError, checksum_bytes, validate_upload_id};

/// Name of the data file inside each upload directory.
const DATA_FILE: &str = "file.bin";

/// Write counters for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStats {
    pub upload_id: String,
    /// Index of the most recent chunk plus one.
    pub chunks_written: u32,
    pub bytes_written: u64,
}

impl ChunkStats {
    fn empty(upload_id: &str) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            chunks_written: 0,
            bytes_written: 0,
        }
    }
}

/// Append-only per-upload storage rooted at one directory.
///
/// Layout: `<root>/<upload_id>/file.bin`. Stats live in memory only and
/// are lost on restart.
pub struct ChunkStore {
    root: PathBuf,
    stats: DashMap<String, ChunkStats>,
    /// One FIFO lock per upload: appends for the same upload are applied in
    /// the order they were requested.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stats: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_id)
    }

    /// Path of the data file for `upload_id`.
    pub fn data_path(&self, upload_id: &str) -> PathBuf {
        self.upload_dir(upload_id).join(DATA_FILE)
    }

    fn lock_for(&self, upload_id: &str) -> Arc<Mutex<()>> {
        let entry = self.locks.entry(upload_id.to_string()).or_default();
        Arc::clone(&entry)
    }

    /// Waits for the upload's lock. A waiter whose lock was retired by a
    /// delete while it queued moves on to the current one.
    async fn lock_upload(&self, upload_id: &str) -> OwnedMutexGuard<()> {
        loop {
            let lock = self.lock_for(upload_id);
            let guard = Arc::clone(&lock).lock_owned().await;
            let current = self
                .locks
                .get(upload_id)
                .is_some_and(|entry| Arc::ptr_eq(&entry, &lock));
            if current {
                return guard;
            }
        }
    }

    /// Appends one chunk to the upload's data file.
    ///
    /// Creates the upload directory and file on first use. A non-empty
    /// `checksum` must be the SHA-256 hex digest of `data`, otherwise nothing
    /// is written.
    pub async fn append_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        data: &[u8],
        checksum: &str,
    ) -> Result<ChunkStats, ChunkStoreError> {
        validate_upload_id(upload_id)?;

        if !checksum.is_empty() && checksum_bytes(data) != checksum {
            return Err(ChunkStoreError::ChecksumMismatch {
                upload_id: upload_id.to_string(),
                chunk_index,
            });
        }

        let next_index = chunk_index
            .checked_add(1)
            .ok_or_else(|| ChunkStoreError::ChunkIndexOverflow {
                upload_id: upload_id.to_string(),
                chunk_index,
            })?;

        let _guard = self.lock_upload(upload_id).await;

        let dir = self.upload_dir(upload_id);
        tokio::fs::create_dir_all(&dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(DATA_FILE))
            .await?;
        file.write_all(data).await?;
        file.flush().await?;

        let mut stats = self
            .stats
            .entry(upload_id.to_string())
            .or_insert_with(|| ChunkStats::empty(upload_id));
        if chunk_index != stats.chunks_written {
            warn!(
                upload_id,
                chunk_index,
                expected = stats.chunks_written,
                "chunk index out of sequence"
            );
        }
        stats.chunks_written = next_index;
        stats.bytes_written += data.len() as u64;
        Ok(stats.clone())
    }

    /// Opens a sequential reader over the upload's data file.
    ///
    /// Fails with [`ChunkStoreError::NotFound`] if nothing was ever written.
    pub async fn read_chunks(
        &self,
        upload_id: &str,
        chunk_size: usize,
    ) -> Result<ChunkReader, ChunkStoreError> {
        validate_upload_id(upload_id)?;

        let path = self.data_path(upload_id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(ChunkStoreError::NotFound(upload_id.to_string()));
        }
        ChunkReader::open(&path, chunk_size).await
    }

    /// Removes everything stored for `upload_id`.
    ///
    /// Best-effort: individual removal failures are logged, never returned.
    pub async fn delete_upload(&self, upload_id: &str) {
        if let Err(e) = validate_upload_id(upload_id) {
            warn!(upload_id, "refusing to delete: {e}");
            return;
        }

        let guard = self.lock_upload(upload_id).await;
        let dir = self.upload_dir(upload_id);
        if let Err(e) = tokio::task::spawn_blocking(move || remove_tree(&dir)).await {
            warn!(upload_id, "delete task failed: {e}");
        }
        self.stats.remove(upload_id);
        // Retired while still held, so queued appenders switch to a fresh lock.
        self.locks.remove(upload_id);
        drop(guard);
        debug!(upload_id, "upload deleted");
    }

    /// Returns the upload's counters, or zeroes if it is unknown.
    pub fn get_stats(&self, upload_id: &str) -> ChunkStats {
        self.stats
            .get(upload_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| ChunkStats::empty(upload_id))
    }
}

/// Removes `path` and everything below it, children before parents.
fn remove_tree(path: &Path) {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(path = %path.display(), "cannot stat for delete: {e}");
            return;
        }
    };

    if meta.is_dir() {
        match std::fs::read_dir(path) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    remove_tree(&entry.path());
                }
            }
            Err(e) => warn!(path = %path.display(), "cannot list for delete: {e}"),
        }
        if let Err(e) = std::fs::remove_dir(path) {
            warn!(path = %path.display(), "failed to remove directory: {e}");
        }
    } else if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), "failed to remove file: {e}");
    }
}
