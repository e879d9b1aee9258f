//! Durable file metadata: an in-memory index mirrored to a JSON snapshot.
//!
//! Every mutation rewrites the whole snapshot before returning. The file is
//! written beside the target and renamed over it, so a crash leaves either
//! the previous snapshot or the new one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use filemesh_protocol::FileStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Errors reading or writing the snapshot. Logged, never surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why an ownership-guarded update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipError {
    Unknown,
    /// A newer upload holds the path slot.
    Superseded,
}

/// Everything the coordinator knows about one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_path: String,
    pub upload_id: String,
    /// `host:port` of the storage node holding the bytes.
    pub node_address: String,
    pub status: FileStatus,
    pub file_size: u64,
    /// Epoch milliseconds.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<i64>,
    #[serde(default = "no_chunks")]
    pub last_chunk_index: i64,
    #[serde(default)]
    pub bytes_uploaded: u64,
}

fn no_chunks() -> i64 {
    -1
}

#[derive(Default)]
struct Indexes {
    by_file_path: HashMap<String, Arc<FileRecord>>,
    by_upload_id: HashMap<String, Arc<FileRecord>>,
}

impl Indexes {
    fn from_records(records: Vec<FileRecord>) -> Self {
        let mut idx = Indexes::default();
        for record in records {
            let record = Arc::new(record);
            let newer = idx
                .by_file_path
                .get(&record.file_path)
                .is_none_or(|existing| existing.created_at <= record.created_at);
            if newer {
                idx.by_file_path
                    .insert(record.file_path.clone(), Arc::clone(&record));
            }
            idx.by_upload_id.insert(record.upload_id.clone(), record);
        }
        idx
    }

    fn owns_path(&self, record: &FileRecord) -> bool {
        self.by_file_path
            .get(&record.file_path)
            .is_some_and(|owner| owner.upload_id == record.upload_id)
    }

    /// Replaces the record by upload id. The path slot is taken only when
    /// it is free or already held by this upload.
    fn upsert(&mut self, record: Arc<FileRecord>) {
        let free = !self.by_file_path.contains_key(&record.file_path);
        if free || self.owns_path(&record) {
            self.by_file_path
                .insert(record.file_path.clone(), Arc::clone(&record));
        }
        self.by_upload_id.insert(record.upload_id.clone(), record);
    }

    fn remove(&mut self, record: &FileRecord) {
        self.by_upload_id.remove(&record.upload_id);
        if self.owns_path(record) {
            self.by_file_path.remove(&record.file_path);
        }
    }

    fn snapshot(&self) -> Vec<&FileRecord> {
        let mut all: Vec<&FileRecord> = self.by_upload_id.values().map(|r| r.as_ref()).collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.upload_id.cmp(&b.upload_id))
        });
        all
    }
}

/// Index of file records keyed by path and by upload id.
///
/// A fresh upload of a path that already has an in-progress upload takes
/// over the path slot; the older record stays reachable by upload id until
/// it is finalized or reaped.
pub struct MetadataStore {
    path: PathBuf,
    inner: RwLock<Indexes>,
}

impl MetadataStore {
    /// Loads the snapshot at `path`.
    ///
    /// A missing snapshot is created empty. An empty, unreadable or corrupt
    /// one is logged and the store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match load_records(&path) {
            Ok(records) => records,
            Err(e) => {
                error!(path = %path.display(), "failed to load metadata, starting empty: {e}");
                Vec::new()
            }
        };
        info!(path = %path.display(), records = records.len(), "metadata loaded");
        Self {
            path,
            inner: RwLock::new(Indexes::from_records(records)),
        }
    }

    pub fn find_by_file_path(&self, file_path: &str) -> Option<FileRecord> {
        let idx = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        idx.by_file_path.get(file_path).map(|r| FileRecord::clone(r))
    }

    pub fn find_by_upload_id(&self, upload_id: &str) -> Option<FileRecord> {
        let idx = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        idx.by_upload_id.get(upload_id).map(|r| FileRecord::clone(r))
    }

    /// Uploads still in progress that were created before `deadline_ms`.
    pub fn find_stale_uploads_older_than(&self, deadline_ms: i64) -> Vec<FileRecord> {
        let idx = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        idx.by_upload_id
            .values()
            .filter(|r| r.status == FileStatus::Uploading && r.created_at < deadline_ms)
            .map(|r| FileRecord::clone(r))
            .collect()
    }

    pub fn find_all(&self) -> Vec<FileRecord> {
        let idx = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        idx.snapshot().into_iter().cloned().collect()
    }

    /// Inserts or replaces a record and persists the snapshot.
    ///
    /// The record takes the path slot only if the slot is free or already
    /// belongs to this upload, so a superseded upload never reclaims it.
    pub fn save(&self, record: FileRecord) {
        let mut idx = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        idx.upsert(Arc::new(record));
        self.persist(&idx);
    }

    /// Registers a fresh upload as the owner of its path, superseding any
    /// upload still in progress there.
    ///
    /// Fails with the current owner if the path is already finalized.
    pub fn claim_path(&self, record: FileRecord) -> Result<(), FileRecord> {
        let mut idx = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let finalized = idx
            .by_file_path
            .get(&record.file_path)
            .filter(|owner| owner.status == FileStatus::Finalized);
        if let Some(owner) = finalized {
            return Err(FileRecord::clone(owner));
        }
        let record = Arc::new(record);
        idx.by_file_path
            .insert(record.file_path.clone(), Arc::clone(&record));
        idx.by_upload_id.insert(record.upload_id.clone(), record);
        self.persist(&idx);
        Ok(())
    }

    /// Applies `f` to an existing record under the write lock. Returns the
    /// updated record, or `None` if the upload is unknown.
    pub fn update(&self, upload_id: &str, f: impl FnOnce(&mut FileRecord)) -> Option<FileRecord> {
        let mut idx = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut record = FileRecord::clone(idx.by_upload_id.get(upload_id)?);
        f(&mut record);
        idx.upsert(Arc::new(record.clone()));
        self.persist(&idx);
        Some(record)
    }

    /// Like [`update`](Self::update), but only while the upload still owns
    /// its path slot. The ownership check and the write happen under one lock.
    pub fn update_if_owner(
        &self,
        upload_id: &str,
        f: impl FnOnce(&mut FileRecord),
    ) -> Result<FileRecord, OwnershipError> {
        let mut idx = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let current = idx
            .by_upload_id
            .get(upload_id)
            .ok_or(OwnershipError::Unknown)?;
        if !idx.owns_path(current) {
            return Err(OwnershipError::Superseded);
        }
        let mut record = FileRecord::clone(current);
        f(&mut record);
        idx.upsert(Arc::new(record.clone()));
        self.persist(&idx);
        Ok(record)
    }

    /// Removes an upload only if it is still in progress and was created
    /// before `deadline_ms`. Returns the removed record.
    pub fn delete_if_stale(&self, upload_id: &str, deadline_ms: i64) -> Option<FileRecord> {
        let mut idx = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let record = idx.by_upload_id.get(upload_id)?;
        if record.status != FileStatus::Uploading || record.created_at >= deadline_ms {
            return None;
        }
        let record = FileRecord::clone(record);
        idx.remove(&record);
        self.persist(&idx);
        Some(record)
    }

    /// Removes a record and persists the snapshot.
    ///
    /// The path slot is only cleared if it still belongs to this upload.
    pub fn delete(&self, record: &FileRecord) {
        let mut idx = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        idx.remove(record);
        self.persist(&idx);
    }

    /// Writes the snapshot while the caller holds the write lock, so
    /// snapshots land in mutation order.
    fn persist(&self, idx: &Indexes) {
        let records = idx.snapshot();
        if let Err(e) = write_snapshot(&self.path, &records) {
            error!(path = %self.path.display(), "failed to persist metadata: {e}");
        } else {
            debug!(records = records.len(), "metadata persisted");
        }
    }
}

fn load_records(path: &Path) -> Result<Vec<FileRecord>, MetadataError> {
    if !path.exists() {
        write_snapshot(path, &[])?;
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&data)?)
}

fn write_snapshot(path: &Path, records: &[&FileRecord]) -> Result<(), MetadataError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
