//! Client library for filemesh.
//!
//! Talks to the coordinator for placement and bookkeeping and streams file
//! content directly to and from storage nodes.

mod client;
mod download;
mod upload;

use filemesh_chunk_store::ChunkStoreError;
use filemesh_rpc_client::RpcError;

pub use client::StorageClient;
pub use upload::UploadReport;

/// Errors from client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("local read failed: {0}")]
    Read(#[from] ChunkStoreError),

    /// The storage node rejected part of the upload stream.
    #[error("upload stream failed: {0}")]
    StreamFailed(String),

    /// The coordinator refused to finalize the upload.
    #[error("finalize rejected: {message}")]
    Rejected { code: Option<i32>, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}
