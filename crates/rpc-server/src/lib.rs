//! WebSocket RPC server for filemesh processes.
//!
//! Accepts any number of WebSocket connections, dispatches JSON requests
//! and binary upload frames to a [`Handler`], and manages each
//! connection's lifecycle (ping/pong, graceful shutdown).

mod connection;
mod handler;
mod server;

pub use connection::{SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{RpcServer, ServerConfig};

/// Send buffer capacity per connection.
///
/// Download streams push one binary frame per chunk; senders wait for room
/// instead of dropping, so this only bounds memory per connection.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the RPC server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
