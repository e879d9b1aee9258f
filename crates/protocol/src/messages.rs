use serde::{Deserialize, Serialize};

use crate::types::FileStatus;

// ---------------------------------------------------------------------------
// Coordinator requests
// ---------------------------------------------------------------------------

/// Starts (or resumes) an upload of `file_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub file_path: String,
    pub file_size: u64,
    #[serde(default)]
    pub resume: bool,
}

/// Completes an upload once all bytes are on the storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    pub file_path: String,
}

/// Looks up where a finalized file can be read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateDownloadRequest {
    pub file_path: String,
}

/// Queries an upload's status by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUploadStatusRequest {
    pub upload_id: String,
}

/// Client-reported progress of an in-flight upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProgressRequest {
    pub upload_id: String,
    pub last_chunk_index: i64,
    pub bytes_uploaded: u64,
}

/// Announces a storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeRequest {
    pub host: String,
    pub port: u16,
}

/// Removes a storage node from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterNodeRequest {
    pub node_id: String,
}

/// Liveness signal from a storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub node_id: String,
}

// ---------------------------------------------------------------------------
// Coordinator responses
// ---------------------------------------------------------------------------

/// Where and how to stream a new or resumed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub upload_id: String,
    pub node_address: String,
    pub chunk_size: u32,
    pub resumed: bool,
    pub last_chunk_index: i64,
    pub bytes_uploaded: u64,
}

/// Result of finalization. Failures are carried in-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

/// Where to stream a finalized file from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateDownloadResponse {
    pub upload_id: String,
    pub node_address: String,
    pub file_size: u64,
    pub chunk_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub status: FileStatus,
    pub bytes_uploaded: u64,
    pub last_chunk_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProgressResponse {
    /// `false` when the upload id is unknown.
    pub recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeResponse {
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    /// `false` tells the node it must register again.
    pub known: bool,
}

// ---------------------------------------------------------------------------
// Storage node requests
// ---------------------------------------------------------------------------

/// Asks a node to stream an upload's bytes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStreamRequest {
    pub upload_id: String,
    /// Piece size; the node's configured size is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUploadRequest {
    pub upload_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUploadStatsRequest {
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Storage node responses
// ---------------------------------------------------------------------------

/// Terminates a download stream after the last binary frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStreamEnd {
    pub upload_id: String,
    pub chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUploadResponse {
    pub success: bool,
}

/// Authoritative write counters for one upload on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatsResponse {
    pub upload_id: String,
    pub chunks_count: u32,
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_upload_request_defaults_resume() {
        let req: InitiateUploadRequest =
            serde_json::from_str(r#"{"filePath":"/a/b.bin","fileSize":26}"#).unwrap();
        assert_eq!(req.file_path, "/a/b.bin");
        assert_eq!(req.file_size, 26);
        assert!(!req.resume);
    }

    #[test]
    fn finalize_response_omits_error_on_success() {
        let resp = FinalizeUploadResponse {
            success: true,
            error_message: None,
            error_code: None,
        };
        assert_eq!(serde_json::to_string(&resp).unwrap(), r#"{"success":true}"#);
    }

    #[test]
    fn upload_status_uses_camel_case() {
        let resp = UploadStatusResponse {
            upload_id: "u1".into(),
            status: FileStatus::Uploading,
            bytes_uploaded: 8,
            last_chunk_index: 1,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["uploadId"], "u1");
        assert_eq!(json["status"], "UPLOADING");
        assert_eq!(json["lastChunkIndex"], 1);
    }

    #[test]
    fn download_stream_request_chunk_size_optional() {
        let req: DownloadStreamRequest = serde_json::from_str(r#"{"uploadId":"u1"}"#).unwrap();
        assert_eq!(req.chunk_size, None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("chunkSize"));
    }
}
