//! Coordinator-to-node control calls.

use std::future::Future;

use filemesh_protocol::MessageType;
use filemesh_protocol::messages::{
    DeleteUploadRequest, DeleteUploadResponse, GetUploadStatsRequest, UploadStatsResponse,
};
use filemesh_rpc_client::{RpcClient, RpcError};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum NodeControlError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("invalid node address: {0}")]
    InvalidAddress(String),
}

/// Operations the coordinator runs against a storage node.
pub trait NodeControl: Send + Sync + 'static {
    /// Authoritative write counters for `upload_id` on the node.
    fn upload_stats(
        &self,
        node_address: &str,
        upload_id: &str,
    ) -> impl Future<Output = Result<UploadStatsResponse, NodeControlError>> + Send;

    /// Asks the node to drop everything it holds for `upload_id`.
    fn delete_upload(
        &self,
        node_address: &str,
        upload_id: &str,
    ) -> impl Future<Output = Result<bool, NodeControlError>> + Send;
}

/// [`NodeControl`] over the node's RPC endpoint, one connection per call.
#[derive(Debug, Default, Clone)]
pub struct RpcNodeControl;

impl RpcNodeControl {
    pub fn new() -> Self {
        Self
    }

    async fn connect(node_address: &str) -> Result<RpcClient, NodeControlError> {
        validate_address(node_address)?;
        debug!(node_address, "connecting to storage node");
        Ok(RpcClient::connect(node_address).await?)
    }
}

impl NodeControl for RpcNodeControl {
    async fn upload_stats(
        &self,
        node_address: &str,
        upload_id: &str,
    ) -> Result<UploadStatsResponse, NodeControlError> {
        let client = Self::connect(node_address).await?;
        let req = GetUploadStatsRequest {
            upload_id: upload_id.to_string(),
        };
        let result = client.call(MessageType::GetUploadStats, &req).await;
        client.close().await;
        Ok(result?)
    }

    async fn delete_upload(
        &self,
        node_address: &str,
        upload_id: &str,
    ) -> Result<bool, NodeControlError> {
        let client = Self::connect(node_address).await?;
        let req = DeleteUploadRequest {
            upload_id: upload_id.to_string(),
        };
        let result: Result<DeleteUploadResponse, _> =
            client.call(MessageType::DeleteUpload, &req).await;
        client.close().await;
        Ok(result?.success)
    }
}

/// Accepts `host:port` with a numeric port.
fn validate_address(address: &str) -> Result<(), NodeControlError> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(NodeControlError::InvalidAddress(address.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use filemesh_protocol::Message;
    use filemesh_rpc_server::{Handler, HandlerFuture, RpcServer, Sender, ServerConfig};

    struct StubNode;

    impl Handler for StubNode {
        type Session = ();

        fn on_get_upload_stats(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let req: GetUploadStatsRequest = msg.parse_payload().unwrap().unwrap();
                let resp = UploadStatsResponse {
                    upload_id: req.upload_id,
                    chunks_count: 7,
                    bytes_written: 26,
                };
                let _ = sender.reply(&msg, MessageType::UploadStats, &resp).await;
            })
        }

        fn on_delete_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let resp = DeleteUploadResponse { success: true };
                let _ = sender
                    .reply(&msg, MessageType::DeleteUploadResponse, &resp)
                    .await;
            })
        }
    }

    #[test]
    fn address_validation() {
        assert!(validate_address("127.0.0.1:9091").is_ok());
        assert!(validate_address("node-a:1").is_ok());
        assert!(validate_address("no-port").is_err());
        assert!(validate_address(":9091").is_err());
        assert!(validate_address("host:notaport").is_err());
        assert!(validate_address("host:70000").is_err());
    }

    #[tokio::test]
    async fn invalid_address_fails_without_connecting() {
        let control = RpcNodeControl::new();
        let err = control.upload_stats("garbage", "u1").await.unwrap_err();
        assert!(matches!(err, NodeControlError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn stats_and_delete_over_rpc() {
        let server = RpcServer::new(ServerConfig { port: 0 }, Arc::new(StubNode));
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });
        let port = server.wait_bound().await;
        let address = format!("127.0.0.1:{port}");

        let control = RpcNodeControl::new();
        let stats = control.upload_stats(&address, "u1").await.unwrap();
        assert_eq!(
            stats,
            UploadStatsResponse {
                upload_id: "u1".into(),
                chunks_count: 7,
                bytes_written: 26,
            }
        );
        assert!(control.delete_upload(&address, "u1").await.unwrap());

        server.shutdown();
    }
}
