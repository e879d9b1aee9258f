//! Chunk storage for filemesh storage nodes.
//!
//! Each upload is an append-only data file under its own directory. Chunks
//! for one upload are applied strictly in call order; different uploads
//! never contend.

mod reader;
mod session;
mod store;
mod validation;

use sha2::{Digest, Sha256};

pub use filemesh_protocol::DEFAULT_CHUNK_SIZE;
pub use reader::{Chunk, ChunkReader};
pub use session::UploadStreamSession;
pub use store::{ChunkStats, ChunkStore};
pub use validation::validate_upload_id;

/// Errors produced by the chunk store.
#[derive(Debug, thiserror::Error)]
pub enum ChunkStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no data for upload: {0}")]
    NotFound(String),

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("checksum mismatch for chunk {chunk_index} of {upload_id}")]
    ChecksumMismatch { upload_id: String, chunk_index: u32 },

    #[error("chunk index {chunk_index} out of range for {upload_id}")]
    ChunkIndexOverflow { upload_id: String, chunk_index: u32 },
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_known_value() {
        assert_eq!(
            checksum_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
