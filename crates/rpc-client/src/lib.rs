//! WebSocket RPC client for filemesh.
//!
//! One [`RpcClient`] owns one connection and multiplexes unary requests,
//! fire-and-forget binary frames and server-to-client streams over it.

mod client;

mod pumps {
    pub(crate) mod ping;
    pub(crate) mod read;
    pub(crate) mod write;
}

pub use client::{ResponseStream, RpcClient, RpcError, StreamEvent, decode_payload};
