//! RPC WebSocket server.
//!
//! Listens on a TCP port, upgrades every incoming connection to WebSocket,
//! and serves all of them concurrently.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use filemesh_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::ServerError;
use crate::connection;
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

/// The RPC WebSocket server.
///
/// Every accepted connection gets its own read/write pumps and dispatches
/// into the shared [`Handler`].
pub struct RpcServer<H: Handler> {
    port: u16,
    handler: Arc<H>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> RpcServer<H> {
    /// Creates a new server with the given handler.
    pub fn new(config: ServerConfig, handler: Arc<H>) -> Arc<Self> {
        Arc::new(Self {
            port: config.port,
            handler,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`RpcServer::run`] binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Waits until [`RpcServer::run`] has bound the socket and returns the port.
    pub async fn wait_bound(&self) -> u16 {
        loop {
            let p = self.port().await;
            if p > 0 {
                break p;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Gracefully shuts down the server and every open connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("rpc server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("rpc server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Handles a single TCP connection: upgrades to WS and starts the pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        // WebSocket upgrade with size limits matching our protocol constants.
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        tracing::debug!(%peer_addr, "WebSocket connection established");

        connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.handler),
            self.cancel.clone(),
        );

        Ok(())
    }
}
