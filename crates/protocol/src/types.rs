use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a file record.
///
/// A record only ever moves from `Uploading` to `Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Uploading,
    Finalized,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploading => "UPLOADING",
            FileStatus::Finalized => "FINALIZED",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one upload stream, as reported by a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    /// Upload the stream wrote to (empty if the stream carried no chunks).
    pub upload_id: String,
    pub uploaded_chunks: u32,
    pub uploaded_bytes: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
