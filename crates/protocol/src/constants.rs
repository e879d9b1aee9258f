use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// This acts as a read deadline: if nothing arrives within this window
/// the connection is considered dead. Set high enough to tolerate a storage
/// node that is busy appending a long run of queued chunks.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Timeout for unary request/response operations.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default chunk size used for uploads and downloads (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// WebSocket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Client -> coordinator
    #[serde(rename = "initiate_upload")]
    InitiateUpload,
    #[serde(rename = "finalize_upload")]
    FinalizeUpload,
    #[serde(rename = "initiate_download")]
    InitiateDownload,
    #[serde(rename = "get_upload_status")]
    GetUploadStatus,
    #[serde(rename = "report_progress")]
    ReportProgress,

    // Storage node -> coordinator
    #[serde(rename = "register_node")]
    RegisterNode,
    #[serde(rename = "unregister_node")]
    UnregisterNode,
    #[serde(rename = "heartbeat")]
    Heartbeat,

    // Client/coordinator -> storage node
    #[serde(rename = "upload_stream_end")]
    UploadStreamEnd,
    #[serde(rename = "download_stream")]
    DownloadStream,
    #[serde(rename = "delete_upload")]
    DeleteUpload,
    #[serde(rename = "get_upload_stats")]
    GetUploadStats,

    // Responses
    #[serde(rename = "initiate_upload_response")]
    InitiateUploadResponse,
    #[serde(rename = "finalize_upload_response")]
    FinalizeUploadResponse,
    #[serde(rename = "initiate_download_response")]
    InitiateDownloadResponse,
    #[serde(rename = "upload_status")]
    UploadStatus,
    #[serde(rename = "report_progress_response")]
    ReportProgressResponse,
    #[serde(rename = "register_node_response")]
    RegisterNodeResponse,
    #[serde(rename = "unregister_node_response")]
    UnregisterNodeResponse,
    #[serde(rename = "heartbeat_response")]
    HeartbeatResponse,
    #[serde(rename = "upload_stream_result")]
    UploadStreamResult,
    #[serde(rename = "download_stream_end")]
    DownloadStreamEnd,
    #[serde(rename = "delete_upload_response")]
    DeleteUploadResponse,
    #[serde(rename = "upload_stats")]
    UploadStats,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Binary frame type carrying one upload chunk (client -> node).
pub const FRAME_UPLOAD_CHUNK: &str = "upload_chunk";

/// Binary frame type carrying one download chunk (node -> client).
pub const FRAME_DOWNLOAD_CHUNK: &str = "download_chunk";

/// Common WebSocket error codes.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_NOT_FOUND: i32 = 404;
pub const WS_ERR_CODE_CONFLICT: i32 = 409;
pub const WS_ERR_CODE_SIZE_MISMATCH: i32 = 422;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
/// The coordinator could not reach the storage node holding an upload.
pub const WS_ERR_CODE_NODE_UNAVAILABLE: i32 = 502;
/// No live storage node can take a new upload.
pub const WS_ERR_CODE_CAPACITY_EXHAUSTED: i32 = 503;
