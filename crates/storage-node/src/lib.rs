//! Storage node side of filemesh: serves chunk uploads and downloads from a
//! local [`ChunkStore`](filemesh_chunk_store::ChunkStore) and keeps the node
//! registered with its coordinator.

pub mod lifecycle;
pub mod service;

pub use lifecycle::{LifecycleError, NodeMembership};
pub use service::NodeService;
