//! Wire protocol shared by the filemesh coordinator, storage nodes and clients.

pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{DEFAULT_CHUNK_SIZE, MessageType};
pub use envelope::{Message, WsError};
pub use types::{FileStatus, UploadSummary};
